use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::capabilities::QueryKey;
use crate::config::AppConfig;
use crate::navigation::{NavigationState, Route};
use crate::AppError;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(EventId);

// --- Resource ---

/// Server-side event as last seen by this client.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub image: String,
    pub location: String,
    pub date: String,
    pub time: String,
    pub description: String,
}

impl EventRecord {
    /// Overlays submitted form values onto this snapshot.
    #[must_use]
    pub fn merged_with(&self, form: &EventForm) -> Self {
        let mut next = self.clone();
        for (name, value) in form.iter() {
            let slot = match name {
                "title" => &mut next.title,
                "image" => &mut next.image,
                "location" => &mut next.location,
                "date" => &mut next.date,
                "time" => &mut next.time,
                "description" => &mut next.description,
                _ => continue,
            };
            *slot = value.to_string();
        }
        next
    }
}

/// `GET /events/:id` answers either `{ "event": {...} }` or the bare record.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub(crate) enum EventPayload {
    Wrapped { event: EventRecord },
    Bare(EventRecord),
}

impl EventPayload {
    pub(crate) fn into_record(self) -> EventRecord {
        match self {
            EventPayload::Wrapped { event } | EventPayload::Bare(event) => event,
        }
    }
}

/// Submitted form fields normalised into one flat record.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct EventForm(BTreeMap<String, String>);

impl EventForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later duplicates of a field name replace earlier ones.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn from_record(record: &EventRecord) -> Self {
        Self::from_pairs([
            ("title", record.title.as_str()),
            ("description", record.description.as_str()),
            ("date", record.date.as_str()),
            ("time", record.time.as_str()),
            ("image", record.image.as_str()),
            ("location", record.location.as_str()),
        ])
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Body of `PUT /events/:id`.
#[derive(Serialize, Debug)]
pub(crate) struct UpdateEventBody<'a> {
    pub event: &'a EventForm,
}

/// ISO-8601 local date-time for the `datetime` attribute, `None` when either
/// part does not parse.
pub fn machine_timestamp(date: &str, time: &str) -> Option<String> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M:%S"))
        .ok()?;
    Some(
        NaiveDateTime::new(date, time)
            .format("%Y-%m-%dT%H:%M")
            .to_string(),
    )
}

// --- Query and mutation state ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    #[default]
    Pending,
    Error,
    Success,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryState {
    pub status: QueryStatus,
    pub data: Option<EventRecord>,
    pub error: Option<AppError>,
    pub is_fetching: bool,
}

impl QueryState {
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Pending && self.is_fetching
    }

    pub fn fetching(&mut self) {
        self.is_fetching = true;
    }

    pub fn succeeded(&mut self, data: EventRecord) {
        self.status = QueryStatus::Success;
        self.data = Some(data);
        self.error = None;
        self.is_fetching = false;
    }

    /// Keeps the last good data around; cancellation leaves status untouched.
    pub fn failed(&mut self, error: AppError) {
        self.is_fetching = false;
        if error.is_aborted() {
            return;
        }
        self.status = QueryStatus::Error;
        self.error = Some(error);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum MutationState {
    #[default]
    Idle,
    Pending,
    Error(AppError),
    Success,
}

/// Per-instance state of the details screen.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DetailState {
    /// True between "Delete" and either cancel or a resolved delete.
    pub is_deleting: bool,
    pub deletion: MutationState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    Loader(AppError),
    Action(AppError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub config: AppConfig,
    pub route: Route,
    /// Route whose loader is still running; it commits once the loader settles.
    pub pending: Option<Route>,
    pub navigation: NavigationState,
    pub queries: HashMap<QueryKey, QueryState>,
    pub detail: DetailState,
    pub route_error: Option<RouteError>,
    /// Keys this core currently holds an observer on, one entry per observer.
    pub observed: Vec<QueryKey>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            route: Route::Events,
            pending: None,
            navigation: NavigationState::Idle,
            queries: HashMap::new(),
            detail: DetailState::default(),
            route_error: None,
            observed: Vec::new(),
        }
    }
}

impl Model {
    pub fn query(&self, key: &QueryKey) -> Option<&QueryState> {
        self.queries.get(key)
    }

    pub fn query_mut(&mut self, key: &QueryKey) -> &mut QueryState {
        self.queries.entry(key.clone()).or_default()
    }

    pub fn reset_detail(&mut self) {
        self.detail = DetailState::default();
    }
}

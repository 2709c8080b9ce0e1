use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{EventForm, EventId};
use crate::EVENTS_QUERY_ROOT;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Route {
    /// `/events`
    Events,
    /// `/events/{id}`
    EventDetails(EventId),
    /// `/events/{id}/edit`, rendered as a modal over the details page.
    EditEvent(EventId),
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Events => format!("/{EVENTS_QUERY_ROOT}"),
            Route::EventDetails(id) => format!("/{EVENTS_QUERY_ROOT}/{id}"),
            Route::EditEvent(id) => format!("/{EVENTS_QUERY_ROOT}/{id}/edit"),
        }
    }

    pub fn parse(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [root] if *root == EVENTS_QUERY_ROOT => Some(Route::Events),
            // `/events/new` belongs to the create screen.
            [root, "new", ..] if *root == EVENTS_QUERY_ROOT => None,
            [root, id] if *root == EVENTS_QUERY_ROOT => Some(Route::EventDetails(EventId::new(*id))),
            [root, id, "edit"] if *root == EVENTS_QUERY_ROOT => {
                Some(Route::EditEvent(EventId::new(*id)))
            }
            _ => None,
        }
    }

    /// The route `../` leads to.
    pub fn parent(&self) -> Route {
        match self {
            Route::Events | Route::EventDetails(_) => Route::Events,
            Route::EditEvent(id) => Route::EventDetails(id.clone()),
        }
    }

    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            Route::Events => None,
            Route::EventDetails(id) | Route::EditEvent(id) => Some(id),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Router-owned transition state, read-only for views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationState {
    #[default]
    Idle,
    Submitting,
    Loading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormMethod {
    Post,
    Put,
}

impl fmt::Display for FormMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FormMethod::Post => "POST",
            FormMethod::Put => "PUT",
        })
    }
}

/// A form handed to the router instead of being written from the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub route: Route,
    pub method: FormMethod,
    pub form: EventForm,
}

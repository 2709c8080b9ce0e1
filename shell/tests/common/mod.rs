//! In-memory stand-in for the events REST API.

#![allow(dead_code)]

use async_trait::async_trait;
use crux_http::http::Method;
use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use events_shared::client::decode_event;
use events_shared::{EventId, EventRecord, QueryKey};
use events_shell::{HttpExecutor, MemoryQueryStore, QueryStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Default)]
pub struct FakeApi {
    events: Mutex<HashMap<String, EventRecord>>,
    requests: Mutex<Vec<RecordedRequest>>,
    failures: Mutex<HashMap<(Method, String), (u16, String)>>,
    held: Mutex<HashSet<Method>>,
    release: Notify,
}

pub fn event(id: &str, title: &str) -> EventRecord {
    EventRecord {
        id: id.into(),
        title: title.into(),
        image: format!("images/{id}.jpg"),
        location: "Berlin".into(),
        date: "2024-05-17".into(),
        time: "18:30".into(),
        description: format!("About {title}"),
    }
}

/// The record cached for `id`, decoded the way the core reads it.
pub fn cached(store: &MemoryQueryStore<HttpResponse>, id: &str) -> Option<(EventRecord, bool)> {
    let id = EventId::new(id);
    store.get(&QueryKey::event(&id)).map(|snapshot| {
        let record = decode_event(&id, HttpResult::Ok(snapshot.data)).unwrap();
        (record, snapshot.invalidated)
    })
}

impl FakeApi {
    pub fn with_events(records: impl IntoIterator<Item = EventRecord>) -> Arc<Self> {
        let api = Self::default();
        {
            let mut events = api.events.lock().unwrap();
            for record in records {
                events.insert(record.id.clone(), record);
            }
        }
        Arc::new(api)
    }

    pub fn stored(&self, id: &str) -> Option<EventRecord> {
        self.events.lock().unwrap().get(id).cloned()
    }

    /// Answers `method path` with `status` and `body` instead of the normal handler.
    pub fn fail(&self, method: Method, path: &str, status: u16, body: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert((method, path.to_string()), (status, body.to_string()));
    }

    /// Requests with `method` wait until [`FakeApi::release`] is called.
    pub fn hold(&self, method: Method) {
        self.held.lock().unwrap().insert(method);
    }

    pub fn release(&self, method: Method) {
        self.held.lock().unwrap().remove(&method);
        self.release.notify_waiters();
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn respond(status: u16, body: impl Into<Vec<u8>>) -> HttpResult {
        HttpResult::Ok(HttpResponse::status(status).body(body.into()).build())
    }

    fn not_found() -> HttpResult {
        Self::respond(404, r#"{"message":"Event not found"}"#)
    }
}

#[async_trait]
impl HttpExecutor for FakeApi {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let url = Url::parse(&request.url).unwrap();
        let path = url.path().to_string();
        let method: Method = request.method.parse().unwrap();
        let body = (!request.body.is_empty())
            .then(|| serde_json::from_slice::<serde_json::Value>(&request.body).unwrap());

        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            path: path.clone(),
            body: body.clone(),
        });

        loop {
            let released = self.release.notified();
            if !self.held.lock().unwrap().contains(&method) {
                break;
            }
            released.await;
        }

        let failure = self.failures.lock().unwrap().get(&(method, path.clone())).cloned();
        if let Some((status, body)) = failure {
            return Self::respond(status, body);
        }

        let Some(id) = path.strip_prefix("/events/") else {
            return Self::respond(404, r#"{"message":"Not found"}"#);
        };

        let mut events = self.events.lock().unwrap();
        match method {
            Method::Get => match events.get(id) {
                Some(record) => {
                    Self::respond(200, serde_json::json!({ "event": record }).to_string())
                }
                None => Self::not_found(),
            },
            Method::Put => {
                let Some(record) = events.get_mut(id) else {
                    return Self::not_found();
                };
                let form = body
                    .and_then(|mut value| value.get_mut("event").map(serde_json::Value::take))
                    .map(|event| serde_json::from_value(event).unwrap())
                    .unwrap_or_default();
                *record = record.merged_with(&form);
                Self::respond(200, serde_json::json!({ "event": record }).to_string())
            }
            Method::Delete => match events.remove(id) {
                Some(_) => Self::respond(204, Vec::new()),
                None => Self::not_found(),
            },
            _ => Self::respond(405, r#"{"message":"Method not allowed"}"#),
        }
    }
}

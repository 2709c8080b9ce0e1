//! Typed access to the events REST resource.
//!
//! Writes go out through the [`Http`] capability. Reads are described as
//! protocol requests so the shell's query cache can run, dedup and abort
//! them; [`decode_event`] turns whatever the cache answers into a record.

use crux_http::http::Method;
use crux_http::protocol::{HttpHeader, HttpRequest, HttpResponse, HttpResult};
use crux_http::Http;
use tracing::{instrument, warn};
use url::Url;

use crate::model::{EventForm, EventId, EventPayload, EventRecord, UpdateEventBody};
use crate::{AppError, AppResult, ErrorKind, EVENTS_QUERY_ROOT};

const JSON: &str = "application/json";

impl From<crux_http::Error> for AppError {
    fn from(error: crux_http::Error) -> Self {
        match error {
            crux_http::Error::Http(error) => AppError::from_http_status(
                error.code as u16,
                error.body.as_deref().unwrap_or_default(),
            ),
            crux_http::Error::Io(message) => AppError::network(message),
            crux_http::Error::Timeout => AppError::network("request timed out"),
            crux_http::Error::Json(message) => {
                AppError::new(ErrorKind::InvalidResponse).with_internal(message)
            }
            crux_http::Error::Url(message) => {
                AppError::new(ErrorKind::InvalidRequest).with_internal(message)
            }
        }
    }
}

/// `{base}/events/{id}`, with the id percent-encoded as one segment.
pub fn event_url(base_url: &Url, id: &EventId) -> AppResult<Url> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|()| {
            AppError::new(ErrorKind::InvalidRequest)
                .with_internal(format!("base URL '{base_url}' cannot take a path"))
        })?
        .pop_if_empty()
        .push(EVENTS_QUERY_ROOT)
        .push(id.as_str());
    Ok(url)
}

/// Maps a settled `GET /events/:id` to a record. Accepts the `{ "event": .. }`
/// envelope and the bare record, and fills a missing id from the route.
pub fn decode_event(id: &EventId, result: HttpResult) -> AppResult<EventRecord> {
    let response = match result {
        HttpResult::Ok(response) => response,
        HttpResult::Err(error) => return Err(error.into()),
    };

    if !(200..300).contains(&response.status) {
        return Err(AppError::from_http_status(response.status, &response.body));
    }

    let mut record = serde_json::from_slice::<EventPayload>(&response.body)
        .map_err(|e| AppError::new(ErrorKind::InvalidResponse).with_internal(e.to_string()))?
        .into_record();
    if record.id.is_empty() {
        record.id = id.to_string();
    }
    Ok(record)
}

/// Cache entry for `record`, shaped like the server's own response.
pub fn snapshot(record: &EventRecord) -> AppResult<HttpResponse> {
    let body = serde_json::to_vec(&serde_json::json!({ "event": record }))
        .map_err(|e| AppError::new(ErrorKind::InvalidRequest).with_internal(e.to_string()))?;

    Ok(HttpResponse {
        status: 200,
        headers: vec![HttpHeader {
            name: "Content-Type".to_string(),
            value: JSON.to_string(),
        }],
        body,
    })
}

pub struct EventsClient<'a, Ev> {
    http: &'a Http<Ev>,
    base_url: &'a Url,
}

impl<'a, Ev> EventsClient<'a, Ev>
where
    Ev: 'static,
{
    pub fn new(http: &'a Http<Ev>, base_url: &'a Url) -> Self {
        Self { http, base_url }
    }

    /// `GET /events/:id`, for the query cache to run.
    pub fn fetch_request(&self, id: &EventId) -> AppResult<HttpRequest> {
        let url = event_url(self.base_url, id)?;
        Ok(HttpRequest::get(url.as_str()).header("Accept", JSON).build())
    }

    /// `PUT /events/:id` with the form wrapped as `{ "event": ... }`.
    #[instrument(skip(self, form, make_event), fields(event_id = %id, fields = form.len()))]
    pub fn update_event<F>(&self, id: &EventId, form: &EventForm, make_event: F) -> AppResult<()>
    where
        F: FnOnce(AppResult<()>) -> Ev + Send + 'static,
    {
        let request = self
            .http
            .request(Method::Put, event_url(self.base_url, id)?)
            .header("Accept", JSON)
            .body_json(&UpdateEventBody { event: form })
            .map_err(|e| AppError::new(ErrorKind::InvalidRequest).with_internal(e.to_string()))?;

        request.send(move |result| make_event(settle("PUT", result)));
        Ok(())
    }

    /// `DELETE /events/:id`
    #[instrument(skip(self, make_event), fields(event_id = %id))]
    pub fn delete_event<F>(&self, id: &EventId, make_event: F) -> AppResult<()>
    where
        F: FnOnce(AppResult<()>) -> Ev + Send + 'static,
    {
        self.http
            .request(Method::Delete, event_url(self.base_url, id)?)
            .header("Accept", JSON)
            .send(move |result| make_event(settle("DELETE", result)));
        Ok(())
    }
}

fn settle<T>(method: &str, result: crux_http::Result<T>) -> AppResult<()> {
    result.map(|_| ()).map_err(|error| {
        let error = AppError::from(error);
        warn!(%method, error = %error, "Request failed");
        error
    })
}

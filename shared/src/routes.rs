//! Route-bound data functions: the edit loader and the edit action.
//!
//! Both suspend on the shell. The loader answers through
//! [`Event::RouteLoaded`] before the edit route commits, and the action
//! answers through [`Event::ActionSettled`] before its redirect is followed.

use tracing::{debug, info, instrument};

use crate::capabilities::{Capabilities, QueryKey, QueryOutput};
use crate::client::{decode_event, EventsClient};
use crate::config::AppConfig;
use crate::event::Event;
use crate::model::{EventId, EventRecord};
use crate::navigation::{FormMethod, Route, Submission};
use crate::{AppError, AppResult, ErrorKind, DEFAULT_STALE_TIME};

/// Asks the cache for a snapshot of `["events", id]` no older than the
/// default stale time. Returns `false` for routes without a loader, which
/// commit straight away.
#[instrument(skip(config, caps), fields(route = %route))]
pub fn event_loader(route: &Route, config: &AppConfig, caps: &Capabilities) -> AppResult<bool> {
    let Route::EditEvent(id) = route else {
        return Ok(false);
    };

    let fetch = EventsClient::new(&caps.http, &config.api_base_url).fetch_request(id)?;
    let loaded = route.clone();
    let loaded_id = id.clone();
    debug!("Loader ensuring snapshot");
    caps.query
        .ensure(QueryKey::event(id), DEFAULT_STALE_TIME, fetch, move |output| {
            Event::RouteLoaded {
                route: loaded,
                result: loader_result(&loaded_id, output),
            }
        });
    Ok(true)
}

fn loader_result(id: &EventId, output: QueryOutput) -> AppResult<EventRecord> {
    match output {
        QueryOutput::Settled(result) => decode_event(id, result),
        QueryOutput::Aborted => Err(AppError::aborted()),
        other => Err(AppError::new(ErrorKind::InvalidResponse)
            .with_internal(format!("unexpected loader output {other:?}"))),
    }
}

/// Sends a submitted edit as `PUT /events/:id`. The outcome comes back as
/// [`Event::ActionSettled`].
#[instrument(skip(submission, config, caps), fields(route = %submission.route))]
pub fn edit_event_action(
    submission: &Submission,
    config: &AppConfig,
    caps: &Capabilities,
) -> AppResult<()> {
    let Route::EditEvent(id) = &submission.route else {
        return Err(AppError::new(ErrorKind::InvalidRequest)
            .with_internal(format!("no edit action for {}", submission.route)));
    };

    if submission.method != FormMethod::Put {
        return Err(AppError::new(ErrorKind::InvalidRequest)
            .with_internal(format!("edit action expects PUT, got {}", submission.method)));
    }

    let settled = submission.clone();
    EventsClient::new(&caps.http, &config.api_base_url).update_event(
        id,
        &submission.form,
        move |result| Event::ActionSettled {
            submission: settled,
            result,
        },
    )
}

/// Invalidates the `events` namespace and follows the redirect once the
/// observed keys have refetched.
pub fn finish_edit_action(submission: &Submission, caps: &Capabilities) -> Route {
    let redirect = submission.route.parent();
    caps.query
        .refetch(QueryKey::events(), Event::Navigate(redirect.clone()));
    info!(%redirect, "Edit saved");
    redirect
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::capabilities::{Effect, QueryOperation};
    use crate::model::{EventForm, Model};
    use crate::navigation::NavigationState;
    use assert_matches::assert_matches;
    use crux_core::testing::AppTester;
    use crux_core::testing::Update;
    use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};

    /// Runs capability calls made outside `update`. `CloseEdit` away from the
    /// edit route changes nothing.
    fn flush(app: &AppTester<App, Effect>) -> Update<Effect, Event> {
        app.update(Event::CloseEdit, &mut Model::default())
    }

    fn submission(route: Route) -> Submission {
        Submission {
            route,
            method: FormMethod::Put,
            form: EventForm::new().with("title", "New"),
        }
    }

    #[test]
    fn test_loader_skips_routes_without_data() {
        let app = AppTester::<App, Effect>::default();
        let caps = app.as_ref();

        assert_eq!(
            event_loader(&Route::Events, &AppConfig::default(), caps),
            Ok(false)
        );
        assert_eq!(
            event_loader(
                &Route::EventDetails(EventId::new("42")),
                &AppConfig::default(),
                caps
            ),
            Ok(false)
        );
    }

    #[test]
    fn test_loader_ensures_with_zero_window() {
        let app = AppTester::<App, Effect>::default();
        let mut model = Model::default();
        let route = Route::EditEvent(EventId::new("42"));

        let update = app.update(Event::Navigate(route.clone()), &mut model);
        assert_eq!(model.navigation, NavigationState::Loading);
        assert_eq!(model.pending, Some(route));

        let ensure = update
            .effects
            .into_iter()
            .find_map(|effect| match effect {
                Effect::Query(request) => Some(request),
                _ => None,
            })
            .unwrap();
        assert_matches!(
            &ensure.operation,
            QueryOperation::Ensure { key, stale_time, fetch }
                if *key == QueryKey::event(&EventId::new("42"))
                    && *stale_time == DEFAULT_STALE_TIME
                    && fetch.url == "http://localhost:3000/events/42"
                    && fetch.method == "GET"
        );
    }

    #[test]
    fn test_loader_result_mapping() {
        let id = EventId::new("42");
        let found = HttpResponse::ok()
            .json(serde_json::json!({"event": {"id": "42", "title": "Meetup"}}))
            .build();
        assert_eq!(
            loader_result(&id, QueryOutput::Settled(HttpResult::Ok(found)))
                .unwrap()
                .title,
            "Meetup"
        );

        let missing = HttpResponse::status(404)
            .body(r#"{"message":"Event not found"}"#)
            .build();
        let error = loader_result(&id, QueryOutput::Settled(HttpResult::Ok(missing))).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NotFound);

        assert!(loader_result(&id, QueryOutput::Aborted)
            .unwrap_err()
            .is_aborted());
    }

    #[test]
    fn test_action_sends_put_and_reports_settled() {
        let app = AppTester::<App, Effect>::default();
        let submission = submission(Route::EditEvent(EventId::new("42")));

        edit_event_action(&submission, &AppConfig::default(), app.as_ref()).unwrap();
        let mut request = flush(&app)
            .effects
            .into_iter()
            .find_map(Effect::into_http)
            .unwrap();
        let HttpRequest { method, url, body, .. } = &request.operation;
        assert_eq!(method, "PUT");
        assert_eq!(url, "http://localhost:3000/events/42");
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(body).unwrap(),
            serde_json::json!({"event": {"title": "New"}})
        );

        let response = HttpResult::Ok(HttpResponse::ok().body("{}").build());
        let update = app.resolve(&mut request, response).unwrap();
        assert_eq!(
            update.events,
            vec![Event::ActionSettled {
                submission,
                result: Ok(()),
            }]
        );
    }

    #[test]
    fn test_action_surfaces_validation_message() {
        let app = AppTester::<App, Effect>::default();
        let submission = submission(Route::EditEvent(EventId::new("42")));

        edit_event_action(&submission, &AppConfig::default(), app.as_ref()).unwrap();
        let mut request = flush(&app)
            .effects
            .into_iter()
            .find_map(Effect::into_http)
            .unwrap();

        let response = HttpResult::Ok(
            HttpResponse::status(422)
                .body(r#"{"message":"Title is required"}"#)
                .build(),
        );
        let update = app.resolve(&mut request, response).unwrap();
        assert_matches!(
            &update.events[..],
            [Event::ActionSettled { result: Err(error), .. }]
                if error.message.as_deref() == Some("Title is required")
        );
    }

    #[test]
    fn test_action_rejects_other_routes() {
        let app = AppTester::<App, Effect>::default();

        let error = edit_event_action(
            &submission(Route::EventDetails(EventId::new("42"))),
            &AppConfig::default(),
            app.as_ref(),
        )
        .unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);

        let mut posted = submission(Route::EditEvent(EventId::new("42")));
        posted.method = FormMethod::Post;
        let error = edit_event_action(&posted, &AppConfig::default(), app.as_ref()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_finish_refetches_then_redirects() {
        let app = AppTester::<App, Effect>::default();
        let submission = submission(Route::EditEvent(EventId::new("42")));

        let redirect = finish_edit_action(&submission, app.as_ref());
        assert_eq!(redirect, Route::EventDetails(EventId::new("42")));

        let mut refetch = flush(&app)
            .effects
            .into_iter()
            .find_map(Effect::into_query)
            .unwrap();
        assert_eq!(
            refetch.operation,
            QueryOperation::Refetch {
                prefix: QueryKey::events()
            }
        );

        let update = app.resolve(&mut refetch, QueryOutput::Refetched).unwrap();
        assert_eq!(update.events, vec![Event::Navigate(redirect)]);
    }
}

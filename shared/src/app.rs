//! The Crux app: `update` turns events into capability requests, `view`
//! projects the model. Route transitions are owned here; the shell only
//! mirrors the committed location.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, QueryKey, QueryOutput, RefetchType};
use crate::client::{decode_event, EventsClient};
use crate::config::EditStrategy;
use crate::event::Event;
use crate::model::{
    machine_timestamp, EventId, EventRecord, Model, MutationState, QueryStatus, RouteError,
};
use crate::navigation::{FormMethod, NavigationState, Route, Submission};
use crate::optimistic::OptimisticUpdate;
use crate::routes;
use crate::view::{
    DeleteModalView, DetailContent, EditEventView, ErrorBlockView, EventDetailsView, FormActions,
    HeaderView, LoadedEventView, PageView, ViewModel, ACKNOWLEDGE_LABEL, CANCEL_LABEL,
    DELETE_HEADING, DELETE_LABEL, DELETING_TEXT, EDIT_LABEL, LOADING_TEXT, SENDING_TEXT,
    UPDATE_LABEL,
};
use crate::{
    AppError, DELETE_FAILED_MESSAGE, DETAIL_STALE_TIME, EDIT_VIEW_STALE_TIME,
    FETCH_FAILED_MESSAGE, UPDATE_FAILED_MESSAGE,
};

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        let event_name = event.name();
        if event.is_user_initiated() {
            info!(event = event_name, route = %model.route, "User action");
        } else {
            debug!(event = event_name, "Handling event");
        }

        match event {
            Event::Configure(config) => {
                info!(
                    api_base_url = %config.api_base_url,
                    strategy = ?config.edit_strategy,
                    "Configured"
                );
                model.config = config;
            }

            Event::Navigate(route) => Self::navigate(route, model, caps),

            Event::RouteLoaded { route, result } => {
                if model.pending.as_ref() != Some(&route) {
                    debug!(%route, "Dropping superseded loader result");
                    return;
                }
                model.pending = None;
                match result {
                    Ok(_) => Self::commit(route, model, caps),
                    Err(error) if error.is_aborted() => model.navigation = NavigationState::Idle,
                    Err(error) => Self::loader_failed(route, error, model, caps),
                }
            }

            Event::ActionSettled { submission, result } => match result {
                // Navigation stays `Submitting` until the redirect commits.
                Ok(()) if model.route == submission.route => {
                    routes::finish_edit_action(&submission, caps);
                }
                Ok(()) => {
                    debug!(route = %submission.route, "Edit saved after leaving its route");
                    caps.query.invalidate(QueryKey::events(), RefetchType::Active);
                }
                Err(error) => {
                    if model.navigation == NavigationState::Submitting {
                        model.navigation = NavigationState::Idle;
                    }
                    Self::action_failed(&submission.route, error, model);
                }
            },

            Event::OptimisticSettled {
                route,
                update,
                result,
            } => {
                update.finish(&caps.query, &result);
                if let Err(error) = result {
                    Self::action_failed(&route, error, model);
                }
            }

            Event::QueryFetching { key } => {
                if !model.observed.contains(&key) {
                    return;
                }
                model.query_mut(&key).fetching();
            }

            Event::QueryData { key, data } => {
                if !model.observed.contains(&key) {
                    return;
                }
                model.query_mut(&key).succeeded(data);
            }

            Event::QueryFailed { key, error } => {
                if !model.observed.contains(&key) {
                    return;
                }
                if !error.is_aborted() {
                    warn!(%key, error = %error, "Query failed");
                }
                model.query_mut(&key).failed(error);
            }

            Event::StartDelete => {
                if model.route.event_id().is_none() {
                    return;
                }
                model.detail.is_deleting = true;
            }

            Event::StopDelete => {
                model.reset_detail();
            }

            Event::ConfirmDelete => {
                let Some(id) = model.route.event_id().cloned() else {
                    return;
                };
                if !model.detail.is_deleting || model.detail.deletion == MutationState::Pending {
                    return;
                }
                let sent = EventsClient::new(&caps.http, &model.config.api_base_url)
                    .delete_event(&id, Event::DeleteSettled);
                model.detail.deletion = match sent {
                    Ok(()) => MutationState::Pending,
                    Err(error) => MutationState::Error(error),
                };
            }

            Event::DeleteSettled(Ok(())) => {
                info!("Event deleted, returning to list");
                model.reset_detail();
                caps.query.invalidate(QueryKey::events(), RefetchType::None);
                Self::navigate(Route::Events, model, caps);
            }

            Event::DeleteSettled(Err(error)) => {
                if error.is_aborted() || !model.detail.is_deleting {
                    model.detail.deletion = MutationState::Idle;
                } else {
                    warn!(error = %error, "Delete failed");
                    model.detail.deletion = MutationState::Error(error);
                }
            }

            Event::SubmitEdit(form) => {
                if !matches!(model.route, Route::EditEvent(_))
                    || model.navigation != NavigationState::Idle
                {
                    return;
                }
                let submission = Submission {
                    route: model.route.clone(),
                    method: FormMethod::Put,
                    form,
                };
                match model.config.edit_strategy {
                    EditStrategy::RouterAction => Self::submit(submission, model, caps),
                    EditStrategy::Optimistic => Self::submit_optimistic(submission, model, caps),
                }
            }

            Event::CloseEdit => {
                if !matches!(model.route, Route::EditEvent(_)) {
                    return;
                }
                Self::navigate(model.route.parent(), model, caps);
            }
        }

        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        let page = match (&model.route_error, &model.route) {
            (Some(RouteError::Loader(error)), _) => PageView::RouteError(ErrorBlockView::new(
                error.user_facing_message(FETCH_FAILED_MESSAGE),
            )),
            (Some(RouteError::Action(error)), _) => PageView::RouteError(ErrorBlockView::new(
                error.user_facing_message(UPDATE_FAILED_MESSAGE),
            )),
            (None, Route::Events) => PageView::EventsList,
            (None, Route::EventDetails(id)) => PageView::EventDetails(Self::details_view(model, id)),
            (None, Route::EditEvent(id)) => {
                let mut details = Self::details_view(model, id);
                details.edit_modal = Some(Self::edit_view(model, id));
                PageView::EventDetails(details)
            }
        };

        ViewModel {
            route: model.route.path(),
            navigation: model.navigation,
            header: HeaderView::default(),
            page,
        }
    }
}

impl App {
    /// Query observers a committed route holds. The edit modal renders over
    /// the details page, so it carries both.
    fn observations(route: &Route) -> Vec<(EventId, Duration)> {
        match route {
            Route::Events => Vec::new(),
            Route::EventDetails(id) => vec![(id.clone(), DETAIL_STALE_TIME)],
            Route::EditEvent(id) => vec![
                (id.clone(), DETAIL_STALE_TIME),
                (id.clone(), EDIT_VIEW_STALE_TIME),
            ],
        }
    }

    /// Runs the route's loader when it has one, otherwise commits at once.
    fn navigate(route: Route, model: &mut Model, caps: &Capabilities) {
        match routes::event_loader(&route, &model.config, caps) {
            Ok(true) => {
                debug!(%route, "Waiting for loader");
                model.pending = Some(route);
                model.navigation = NavigationState::Loading;
            }
            Ok(false) => Self::commit(route, model, caps),
            Err(error) => Self::loader_failed(route, error, model, caps),
        }
    }

    fn commit(route: Route, model: &mut Model, caps: &Capabilities) {
        model.pending = None;
        model.navigation = NavigationState::Idle;
        model.route_error = None;

        // New observers go first so a key shared by both routes never drops
        // to zero and cancels its fetch.
        let previous = std::mem::take(&mut model.observed);
        for (id, stale_time) in Self::observations(&route) {
            Self::observe(&id, stale_time, model, caps);
        }
        for key in previous {
            if !model.observed.contains(&key) {
                model.queries.remove(&key);
            }
            caps.query.unobserve(key);
        }

        Self::enter(route, model, caps);
    }

    fn observe(id: &EventId, stale_time: Duration, model: &mut Model, caps: &Capabilities) {
        let key = QueryKey::event(id);
        model.observed.push(key.clone());

        let fetch = EventsClient::new(&caps.http, &model.config.api_base_url).fetch_request(id);
        match fetch {
            Ok(fetch) => {
                let id = id.clone();
                let observed = key.clone();
                caps.query.observe(key, stale_time, fetch, move |output| {
                    query_event(observed.clone(), &id, output)
                });
            }
            Err(error) => model.query_mut(&key).failed(error),
        }
    }

    /// Moves the location to `route` without touching observers.
    fn enter(route: Route, model: &mut Model, caps: &Capabilities) {
        if model.route.event_id() != route.event_id() {
            model.reset_detail();
        }
        caps.navigation.push(route.clone());
        model.route = route;
    }

    fn loader_failed(route: Route, error: AppError, model: &mut Model, caps: &Capabilities) {
        warn!(%route, error = %error, "Route loader failed");
        for key in std::mem::take(&mut model.observed) {
            model.queries.remove(&key);
            caps.query.unobserve(key);
        }
        model.pending = None;
        model.navigation = NavigationState::Idle;
        Self::enter(route, model, caps);
        model.route_error = Some(RouteError::Loader(error));
    }

    /// Shows an action failure on the route it was submitted from. Once the
    /// router has moved elsewhere the failure has nothing to render over.
    fn action_failed(route: &Route, error: AppError, model: &mut Model) {
        if error.is_aborted() {
            return;
        }
        if model.route != *route {
            info!(
                %route,
                current = %model.route,
                error = %error,
                "Dropping action failure for a route no longer shown"
            );
            return;
        }
        warn!(%route, error = %error, "Route action failed");
        model.route_error = Some(RouteError::Action(error));
    }

    fn submit(submission: Submission, model: &mut Model, caps: &Capabilities) {
        match routes::edit_event_action(&submission, &model.config, caps) {
            Ok(()) => model.navigation = NavigationState::Submitting,
            Err(error) => Self::action_failed(&submission.route, error, model),
        }
    }

    /// Writes the edit into the cache, sends it and leaves for the detail
    /// page without waiting. The write reconciles in `OptimisticSettled`.
    fn submit_optimistic(submission: Submission, model: &mut Model, caps: &Capabilities) {
        let Route::EditEvent(id) = &submission.route else {
            return;
        };
        let key = QueryKey::event(id);
        let previous = model.query(&key).and_then(|state| state.data.clone());
        let next = previous
            .clone()
            .unwrap_or_else(|| EventRecord {
                id: id.to_string(),
                ..EventRecord::default()
            })
            .merged_with(&submission.form);
        let redirect = submission.route.parent();

        let update = match OptimisticUpdate::begin(&caps.query, key.clone(), previous.as_ref(), &next)
        {
            Ok(update) => update,
            Err(error) => {
                Self::action_failed(&submission.route, error, model);
                return;
            }
        };
        model.query_mut(&key).succeeded(next);

        let settled = update.clone();
        let settled_route = redirect.clone();
        let sent = EventsClient::new(&caps.http, &model.config.api_base_url).update_event(
            id,
            &submission.form,
            move |result| Event::OptimisticSettled {
                route: settled_route,
                update: settled,
                result,
            },
        );
        if let Err(error) = sent {
            update.finish(&caps.query, &Err::<(), _>(error.clone()));
            Self::action_failed(&submission.route, error, model);
            return;
        }

        info!(%redirect, "Optimistic edit sent, leaving before it settles");
        Self::navigate(redirect, model, caps);
    }

    fn details_view(model: &Model, id: &EventId) -> EventDetailsView {
        let query = model.query(&QueryKey::event(id));

        let content = match query {
            Some(state) if state.status == QueryStatus::Error => {
                let message = state.error.as_ref().map_or_else(
                    || FETCH_FAILED_MESSAGE.to_string(),
                    |e| e.user_facing_message(FETCH_FAILED_MESSAGE),
                );
                DetailContent::Error(ErrorBlockView::new(message))
            }
            Some(state) if state.status == QueryStatus::Success => match &state.data {
                Some(record) => DetailContent::Loaded(Self::loaded_view(model, record, id)),
                None => DetailContent::Loading {
                    text: LOADING_TEXT.into(),
                },
            },
            _ => DetailContent::Loading {
                text: LOADING_TEXT.into(),
            },
        };

        let delete_modal = model.detail.is_deleting.then(|| {
            let busy = model.detail.deletion == MutationState::Pending;
            DeleteModalView {
                heading: DELETE_HEADING.into(),
                busy: busy.then(|| DELETING_TEXT.to_string()),
                actions_visible: !busy,
                cancel_label: CANCEL_LABEL.into(),
                confirm_label: DELETE_LABEL.into(),
                error: match &model.detail.deletion {
                    MutationState::Error(error) => Some(ErrorBlockView::new(
                        error.user_facing_message(DELETE_FAILED_MESSAGE),
                    )),
                    _ => None,
                },
            }
        });

        EventDetailsView {
            content,
            delete_modal,
            edit_modal: None,
        }
    }

    fn loaded_view(model: &Model, record: &EventRecord, id: &EventId) -> LoadedEventView {
        let image_url = model
            .config
            .image_base_url
            .join(&record.image)
            .map_or_else(|_| record.image.clone(), String::from);

        LoadedEventView {
            title: record.title.clone(),
            image_url,
            image_alt: record.title.clone(),
            location: record.location.clone(),
            date_label: format!("{} @ {}", record.date, record.time),
            datetime: machine_timestamp(&record.date, &record.time),
            description: record.description.clone(),
            delete_label: DELETE_LABEL.into(),
            edit_label: EDIT_LABEL.into(),
            edit_href: Route::EditEvent(id.clone()).path(),
        }
    }

    fn edit_view(model: &Model, id: &EventId) -> EditEventView {
        let parent = Route::EventDetails(id.clone()).path();
        let Some(state) = model.query(&QueryKey::event(id)) else {
            return EditEventView::Empty;
        };

        // Cached data wins over a failed background refetch.
        if let Some(record) = &state.data {
            let actions = if model.navigation == NavigationState::Submitting {
                FormActions::Busy {
                    text: SENDING_TEXT.into(),
                }
            } else {
                FormActions::Idle {
                    cancel_label: CANCEL_LABEL.into(),
                    cancel_href: parent,
                    submit_label: UPDATE_LABEL.into(),
                }
            };
            return EditEventView::Form {
                initial: record.clone(),
                actions,
            };
        }

        match (&state.status, &state.error) {
            (QueryStatus::Error, error) => EditEventView::Error {
                error: ErrorBlockView::new(error.as_ref().map_or_else(
                    || UPDATE_FAILED_MESSAGE.to_string(),
                    |e| e.user_facing_message(UPDATE_FAILED_MESSAGE),
                )),
                acknowledge_label: ACKNOWLEDGE_LABEL.into(),
                acknowledge_href: parent,
            },
            _ => EditEventView::Empty,
        }
    }
}

/// Maps one cache output for `["events", id]` to the event the app handles.
fn query_event(key: QueryKey, id: &EventId, output: QueryOutput) -> Event {
    match output {
        QueryOutput::Fetching => Event::QueryFetching { key },
        QueryOutput::Settled(result) => match decode_event(id, result) {
            Ok(data) => Event::QueryData { key, data },
            Err(error) => Event::QueryFailed { key, error },
        },
        QueryOutput::Aborted | QueryOutput::Released | QueryOutput::Refetched => {
            Event::QueryFailed {
                key,
                error: AppError::aborted(),
            }
        }
    }
}

use crate::capabilities::QueryKey;
use crate::config::AppConfig;
use crate::model::{EventForm, EventRecord};
use crate::navigation::{Route, Submission};
use crate::optimistic::OptimisticUpdate;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Configure(AppConfig),

    // Router
    Navigate(Route),
    RouteLoaded {
        route: Route,
        result: AppResult<EventRecord>,
    },
    ActionSettled {
        submission: Submission,
        result: AppResult<()>,
    },
    OptimisticSettled {
        /// Where the router went while the write was in flight.
        route: Route,
        update: OptimisticUpdate,
        result: AppResult<()>,
    },

    // Query cache
    QueryFetching {
        key: QueryKey,
    },
    QueryData {
        key: QueryKey,
        data: EventRecord,
    },
    QueryFailed {
        key: QueryKey,
        error: AppError,
    },

    // Details screen
    StartDelete,
    StopDelete,
    ConfirmDelete,
    DeleteSettled(AppResult<()>),

    // Edit modal
    SubmitEdit(EventForm),
    CloseEdit,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Configure(_) => "configure",
            Event::Navigate(_) => "navigate",
            Event::RouteLoaded { .. } => "route_loaded",
            Event::ActionSettled { .. } => "action_settled",
            Event::OptimisticSettled { .. } => "optimistic_settled",
            Event::QueryFetching { .. } => "query_fetching",
            Event::QueryData { .. } => "query_data",
            Event::QueryFailed { .. } => "query_failed",
            Event::StartDelete => "start_delete",
            Event::StopDelete => "stop_delete",
            Event::ConfirmDelete => "confirm_delete",
            Event::DeleteSettled(_) => "delete_settled",
            Event::SubmitEdit(_) => "submit_edit",
            Event::CloseEdit => "close_edit",
        }
    }

    pub fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Event::StartDelete
                | Event::StopDelete
                | Event::ConfirmDelete
                | Event::SubmitEdit(_)
                | Event::CloseEdit
        )
    }
}

use serde::{Deserialize, Serialize};

use crate::model::EventRecord;
use crate::navigation::{NavigationState, Route};
use crate::ERROR_TITLE;

pub const HEADER_LINK_LABEL: &str = "View all Events";
pub const LOADING_TEXT: &str = "Loading...";
pub const DELETE_HEADING: &str = "Are you sure?";
pub const DELETING_TEXT: &str = "Deleting...";
pub const SENDING_TEXT: &str = "Sending data...";
pub const CANCEL_LABEL: &str = "Cancel";
pub const DELETE_LABEL: &str = "Delete";
pub const EDIT_LABEL: &str = "Edit";
pub const UPDATE_LABEL: &str = "Update";
pub const ACKNOWLEDGE_LABEL: &str = "Okay";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ViewModel {
    pub route: String,
    pub navigation: NavigationState,
    pub header: HeaderView,
    pub page: PageView,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HeaderView {
    pub label: String,
    pub href: String,
}

impl Default for HeaderView {
    fn default() -> Self {
        Self {
            label: HEADER_LINK_LABEL.into(),
            href: Route::Events.path(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageView {
    /// The list screen lives elsewhere; this core only knows its route.
    EventsList,
    EventDetails(EventDetailsView),
    RouteError(ErrorBlockView),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBlockView {
    pub title: String,
    pub message: String,
}

impl ErrorBlockView {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            title: ERROR_TITLE.into(),
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EventDetailsView {
    pub content: DetailContent,
    pub delete_modal: Option<DeleteModalView>,
    /// Present on `/events/{id}/edit`, overlaid on the details page.
    pub edit_modal: Option<EditEventView>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DetailContent {
    Loading { text: String },
    Error(ErrorBlockView),
    Loaded(LoadedEventView),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LoadedEventView {
    pub title: String,
    pub image_url: String,
    pub image_alt: String,
    pub location: String,
    /// `"{date} @ {time}"`, as received.
    pub date_label: String,
    /// ISO-8601 local date-time, absent when the parts do not parse.
    pub datetime: Option<String>,
    pub description: String,
    pub delete_label: String,
    pub edit_label: String,
    pub edit_href: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeleteModalView {
    pub heading: String,
    /// Busy text while the delete is in flight.
    pub busy: Option<String>,
    /// Cancel and Delete are hidden while busy.
    pub actions_visible: bool,
    pub cancel_label: String,
    pub confirm_label: String,
    pub error: Option<ErrorBlockView>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EditEventView {
    Error {
        error: ErrorBlockView,
        acknowledge_label: String,
        acknowledge_href: String,
    },
    Form {
        initial: EventRecord,
        actions: FormActions,
    },
    /// Nothing cached yet and no error: render the bare modal.
    Empty,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FormActions {
    Busy {
        text: String,
    },
    Idle {
        cancel_label: String,
        cancel_href: String,
        submit_label: String,
    },
}

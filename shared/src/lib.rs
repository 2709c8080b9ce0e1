// lib.rs - Crux core for the event detail and edit screens

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod app;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod event;
pub mod model;
pub mod navigation;
pub mod optimistic;
pub mod routes;
pub mod view;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use app::App;
pub use capabilities::{Capabilities, Effect, QueryKey, QueryOperation, QueryOutput, RefetchType};
pub use client::EventsClient;
pub use config::{AppConfig, EditStrategy};
pub use crux_core::{render::Render, App as CruxApp, Core, Request};
pub use event::Event;
pub use model::{EventForm, EventId, EventRecord, Model};
pub use navigation::{NavigationState, Route};
pub use view::ViewModel;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/";
pub const EVENTS_QUERY_ROOT: &str = "events";
pub const DETAIL_STALE_TIME: Duration = Duration::from_secs(10);
pub const EDIT_VIEW_STALE_TIME: Duration = Duration::from_secs(10);
pub const DEFAULT_STALE_TIME: Duration = Duration::ZERO;
pub const MAX_CACHED_QUERIES: usize = 500;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const ERROR_TITLE: &str = "An error occurred";
pub const FETCH_FAILED_MESSAGE: &str = "Failed to fetch event details.";
pub const DELETE_FAILED_MESSAGE: &str = "Failed to delete event.";
pub const UPDATE_FAILED_MESSAGE: &str = "Failed to update event details.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Transport,
    NetworkFailure,
    AbortedByUser,
    InvalidRequest,
    InvalidResponse,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Transport => "TRANSPORT_ERROR",
            Self::NetworkFailure => "NETWORK_FAILURE",
            Self::AbortedByUser => "ABORTED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidResponse => "INVALID_RESPONSE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    /// Message taken verbatim from the server's failure payload.
    pub message: Option<String>,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            status: None,
            message: None,
            internal_message: None,
        }
    }

    #[must_use]
    pub fn aborted() -> Self {
        Self::new(ErrorKind::AbortedByUser)
    }

    #[must_use]
    pub fn network(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailure).with_internal(internal)
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        // An empty server message is treated like a missing one.
        self.message = (!message.is_empty()).then_some(message);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::AbortedByUser)
    }

    #[must_use]
    pub fn user_facing_message(&self, fallback: &str) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: &[u8]) -> Self {
        let kind = match status {
            404 => ErrorKind::NotFound,
            _ => ErrorKind::Transport,
        };

        let error = Self::new(kind).with_status(status);

        match serde_json::from_slice::<ApiErrorResponse>(body) {
            Ok(ApiErrorResponse {
                message: Some(message),
            }) => error.with_message(message),
            _ => error.with_internal(format!("HTTP error: {status}")),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(status) = self.status {
            write!(f, " {status}")?;
        }
        if let Some(message) = &self.message {
            write!(f, " {message}")?;
        }
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

pub type AppResult<T> = Result<T, AppError>;

// lib.rs - Async shell that runs the events core against a real HTTP stack

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cache;
pub mod executor;
pub mod shell;
pub mod store;

use thiserror::Error;

pub use cache::QueryCache;
pub use executor::{HttpExecutor, ReqwestExecutor};
pub use shell::Shell;
pub use store::{MemoryQueryStore, QuerySnapshot, QueryStore};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("no route for '{0}'")]
    UnknownRoute(String),
}

//! Effects the core asks the shell to perform.
//!
//! The core never talks to the network, the cache or the location bar
//! itself. Capabilities turn its requests into [`Effect`]s which the shell
//! resolves, and the answers come back as [`crate::Event`]s.

mod navigation;
mod query;

pub use self::navigation::{Navigation, NavigationOperation};
pub use self::query::{Query, QueryKey, QueryOperation, QueryOutput, RefetchType};

pub use crux_core::render::Render;
pub use crux_http::Http;

// The Effect derive implements `WithContext` for the `App` in scope.
use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub query: Query<Event>,
    pub navigation: Navigation<Event>,
    pub render: Render<Event>,
}

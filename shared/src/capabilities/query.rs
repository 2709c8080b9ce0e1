//! Shared query cache, owned by the shell.
//!
//! The core describes what it wants cached (a key, a freshness window and the
//! request that fills it) and the shell keeps the snapshots, counts observers,
//! dedups in-flight fetches and aborts them on cancellation.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::model::EventId;
use crate::EVENTS_QUERY_ROOT;

/// Hierarchical cache key. Invalidation matches on key prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// `["events"]`, the list-level key.
    pub fn events() -> Self {
        Self::new([EVENTS_QUERY_ROOT])
    }

    /// `["events", id]`
    pub fn event(id: &EventId) -> Self {
        Self::new([EVENTS_QUERY_ROOT, id.as_str()])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefetchType {
    /// Mark stale only; the next observer refetches.
    None,
    /// Also refetch every key that currently has an observer.
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum QueryOperation {
    /// Registers one observer on `key`. Answered with a stream of
    /// [`QueryOutput`]s that ends with [`QueryOutput::Released`].
    Observe {
        key: QueryKey,
        stale_time: Duration,
        fetch: HttpRequest,
    },
    /// Releases the oldest observer on `key`.
    Unobserve { key: QueryKey },
    /// Answered once with a snapshot no older than `stale_time`, fetching
    /// (or joining an in-flight fetch) when needed.
    Ensure {
        key: QueryKey,
        stale_time: Duration,
        fetch: HttpRequest,
    },
    Invalidate {
        prefix: QueryKey,
        refetch: RefetchType,
    },
    /// Invalidates `prefix`, refetches its observed keys and answers with
    /// [`QueryOutput::Refetched`] once they have all settled.
    Refetch { prefix: QueryKey },
    /// Replaces the snapshot for `key`, or drops it when `snapshot` is `None`.
    Write {
        key: QueryKey,
        snapshot: Option<HttpResponse>,
    },
    /// Aborts the in-flight fetch for `key`, if any.
    Cancel { key: QueryKey },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum QueryOutput {
    Fetching,
    /// A cached snapshot or the outcome of a fetch.
    Settled(HttpResult),
    /// The fetch was cancelled before it settled.
    Aborted,
    /// The observer was released; nothing follows.
    Released,
    Refetched,
}

impl Operation for QueryOperation {
    type Output = QueryOutput;
}

pub struct Query<Ev> {
    context: CapabilityContext<QueryOperation, Ev>,
}

impl<Ev> Clone for Query<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Query<Ev> {
    type Operation = QueryOperation;
    type MappedSelf<MappedEv> = Query<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Query::new(self.context.map_event(f))
    }
}

impl<Ev> Query<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<QueryOperation, Ev>) -> Self {
        Self { context }
    }

    /// Subscribes to `key` until a matching [`Query::unobserve`]. Every
    /// output except the final release is turned into an event.
    pub fn observe<F>(&self, key: QueryKey, stale_time: Duration, fetch: HttpRequest, make_event: F)
    where
        F: Fn(QueryOutput) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let mut outputs = ctx.stream_from_shell(QueryOperation::Observe {
                key,
                stale_time,
                fetch,
            });

            while let Some(output) = outputs.next().await {
                if output == QueryOutput::Released {
                    break;
                }
                ctx.update_app(make_event(output));
            }
        });
    }

    pub fn unobserve(&self, key: QueryKey) {
        self.notify(QueryOperation::Unobserve { key });
    }

    pub fn ensure<F>(&self, key: QueryKey, stale_time: Duration, fetch: HttpRequest, make_event: F)
    where
        F: FnOnce(QueryOutput) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let output = ctx
                .request_from_shell(QueryOperation::Ensure {
                    key,
                    stale_time,
                    fetch,
                })
                .await;
            ctx.update_app(make_event(output));
        });
    }

    pub fn invalidate(&self, prefix: QueryKey, refetch: RefetchType) {
        self.notify(QueryOperation::Invalidate { prefix, refetch });
    }

    /// Sends `then` back once every observed key under `prefix` has refetched.
    pub fn refetch(&self, prefix: QueryKey, then: Ev)
    where
        Ev: Send,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.request_from_shell(QueryOperation::Refetch { prefix })
                .await;
            ctx.update_app(then);
        });
    }

    pub fn write(&self, key: QueryKey, snapshot: Option<HttpResponse>) {
        self.notify(QueryOperation::Write { key, snapshot });
    }

    pub fn cancel(&self, key: QueryKey) {
        self.notify(QueryOperation::Cancel { key });
    }

    fn notify(&self, operation: QueryOperation) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(operation).await;
        });
    }
}

//! Shell side of the query capability.
//!
//! Holds one stream per observer, de-duplicates fetches per key and aborts a
//! fetch once nothing is waiting on it. Fetches are handed to the shell as
//! [`FetchJob`]s; their results come back through [`QueryCache::fetched`].

use crux_core::{Core, Request};
use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use events_shared::{App, Effect, QueryKey, QueryOperation, QueryOutput, RefetchType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::QueryStore;

/// A fetch the cache wants run.
pub struct FetchJob {
    pub key: QueryKey,
    pub fetch_id: u64,
    pub request: HttpRequest,
    pub token: CancellationToken,
}

struct Observer {
    request: Request<QueryOperation>,
    fetch: HttpRequest,
}

struct InFlight {
    fetch_id: u64,
    token: CancellationToken,
    /// `Ensure` requests answered when this fetch settles.
    waiters: Vec<Request<QueryOperation>>,
}

struct PendingRefetch {
    keys: HashSet<QueryKey>,
    request: Request<QueryOperation>,
}

pub struct QueryCache<S> {
    store: Arc<S>,
    observers: HashMap<QueryKey, VecDeque<Observer>>,
    in_flight: HashMap<QueryKey, InFlight>,
    refetches: Vec<PendingRefetch>,
    jobs: Vec<FetchJob>,
    next_fetch_id: u64,
    shutdown: CancellationToken,
}

type AppCore = Core<Effect, App>;

impl<S> QueryCache<S>
where
    S: QueryStore<HttpResponse>,
{
    pub fn new(store: Arc<S>, shutdown: CancellationToken) -> Self {
        Self {
            store,
            observers: HashMap::new(),
            in_flight: HashMap::new(),
            refetches: Vec::new(),
            jobs: Vec::new(),
            next_fetch_id: 0,
            shutdown,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.observers.get(key).map_or(0, VecDeque::len)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Fetches started since the last call.
    pub fn take_jobs(&mut self) -> Vec<FetchJob> {
        std::mem::take(&mut self.jobs)
    }

    /// Resolves one query request, returning the effects the core emits in
    /// response.
    pub fn handle(&mut self, request: Request<QueryOperation>, core: &AppCore) -> Vec<Effect> {
        match request.operation.clone() {
            QueryOperation::Observe {
                key,
                stale_time,
                fetch,
            } => self.observe(request, key, stale_time, fetch, core),
            QueryOperation::Unobserve { key } => self.unobserve(&key, core),
            QueryOperation::Ensure {
                key,
                stale_time,
                fetch,
            } => self.ensure(request, key, stale_time, fetch, core),
            QueryOperation::Invalidate { prefix, refetch } => {
                let invalidated = self.store.invalidate(&prefix);
                debug!(%prefix, count = invalidated.len(), ?refetch, "Invalidated");
                match refetch {
                    RefetchType::Active => self.refetch_observed(&prefix, core).0,
                    RefetchType::None => Vec::new(),
                }
            }
            QueryOperation::Refetch { prefix } => self.refetch(request, &prefix, core),
            QueryOperation::Write { key, snapshot } => self.write(key, snapshot, core),
            QueryOperation::Cancel { key } => self.cancel(&key, core),
        }
    }

    /// Applies a finished fetch. Results of cancelled or superseded fetches
    /// are dropped.
    pub fn fetched(
        &mut self,
        key: &QueryKey,
        fetch_id: u64,
        result: HttpResult,
        core: &AppCore,
    ) -> Vec<Effect> {
        if self.in_flight.get(key).map(|f| f.fetch_id) != Some(fetch_id) {
            debug!(%key, fetch_id, "Dropping superseded fetch");
            return Vec::new();
        }
        let Some(in_flight) = self.in_flight.remove(key) else {
            return Vec::new();
        };

        if let HttpResult::Ok(response) = &result {
            if (200..300).contains(&response.status) {
                self.store.set(key.clone(), response.clone());
            }
        }

        let output = QueryOutput::Settled(result);
        let mut effects = self.broadcast(key, &output, core);
        for mut waiter in in_flight.waiters {
            effects.extend(core.resolve(&mut waiter, output.clone()));
        }
        effects.extend(self.settle_refetches(key, core));
        effects
    }

    fn observe(
        &mut self,
        request: Request<QueryOperation>,
        key: QueryKey,
        stale_time: Duration,
        fetch: HttpRequest,
        core: &AppCore,
    ) -> Vec<Effect> {
        let mut observer = Observer {
            request,
            fetch: fetch.clone(),
        };
        let mut effects = Vec::new();

        let snapshot = self.store.get(&key);
        let fresh = snapshot
            .as_ref()
            .is_some_and(|s| s.is_fresh(stale_time, Instant::now()));
        if let Some(snapshot) = snapshot {
            effects.extend(core.resolve(
                &mut observer.request,
                QueryOutput::Settled(HttpResult::Ok(snapshot.data)),
            ));
        }
        self.observers
            .entry(key.clone())
            .or_default()
            .push_back(observer);

        if fresh {
            debug!(%key, "Cache hit");
            return effects;
        }

        self.start_fetch(&key, fetch, false);
        effects.extend(self.broadcast(&key, &QueryOutput::Fetching, core));
        effects
    }

    /// Releases the oldest observer on `key`. The fetch is aborted once no
    /// observer and no loader is left waiting on it.
    fn unobserve(&mut self, key: &QueryKey, core: &AppCore) -> Vec<Effect> {
        let Some(observers) = self.observers.get_mut(key) else {
            warn!(%key, "Unobserve without an observer");
            return Vec::new();
        };
        let mut effects = Vec::new();
        if let Some(mut observer) = observers.pop_front() {
            // The stream ends here; its request must not be resolved again.
            effects.extend(core.resolve(&mut observer.request, QueryOutput::Released));
        }
        if !observers.is_empty() {
            return effects;
        }
        self.observers.remove(key);

        if self.in_flight.get(key).is_some_and(|f| f.waiters.is_empty()) {
            if let Some(in_flight) = self.in_flight.remove(key) {
                debug!(%key, "Last observer gone, cancelling fetch");
                in_flight.token.cancel();
            }
            effects.extend(self.settle_refetches(key, core));
        }
        effects
    }

    fn ensure(
        &mut self,
        mut request: Request<QueryOperation>,
        key: QueryKey,
        stale_time: Duration,
        fetch: HttpRequest,
        core: &AppCore,
    ) -> Vec<Effect> {
        if let Some(snapshot) = self.store.get(&key) {
            if snapshot.is_fresh(stale_time, Instant::now()) {
                debug!(%key, "Ensure served from cache");
                return core.resolve(
                    &mut request,
                    QueryOutput::Settled(HttpResult::Ok(snapshot.data)),
                );
            }
        }

        let started = self.start_fetch(&key, fetch, false);
        if let Some(in_flight) = self.in_flight.get_mut(&key) {
            in_flight.waiters.push(request);
        }
        if started {
            self.broadcast(&key, &QueryOutput::Fetching, core)
        } else {
            Vec::new()
        }
    }

    fn refetch(
        &mut self,
        mut request: Request<QueryOperation>,
        prefix: &QueryKey,
        core: &AppCore,
    ) -> Vec<Effect> {
        self.store.invalidate(prefix);
        let (mut effects, keys) = self.refetch_observed(prefix, core);
        if keys.is_empty() {
            effects.extend(core.resolve(&mut request, QueryOutput::Refetched));
        } else {
            debug!(%prefix, count = keys.len(), "Waiting for refetch");
            self.refetches.push(PendingRefetch {
                keys: keys.into_iter().collect(),
                request,
            });
        }
        effects
    }

    fn write(
        &mut self,
        key: QueryKey,
        snapshot: Option<HttpResponse>,
        core: &AppCore,
    ) -> Vec<Effect> {
        match snapshot {
            Some(data) => {
                self.store.set(key.clone(), data.clone());
                self.broadcast(&key, &QueryOutput::Settled(HttpResult::Ok(data)), core)
            }
            None => {
                self.store.remove(&key);
                Vec::new()
            }
        }
    }

    fn cancel(&mut self, key: &QueryKey, core: &AppCore) -> Vec<Effect> {
        let Some(in_flight) = self.in_flight.remove(key) else {
            return Vec::new();
        };
        debug!(%key, "Fetch cancelled");
        in_flight.token.cancel();

        let mut effects = self.broadcast(key, &QueryOutput::Aborted, core);
        for mut waiter in in_flight.waiters {
            effects.extend(core.resolve(&mut waiter, QueryOutput::Aborted));
        }
        effects.extend(self.settle_refetches(key, core));
        effects
    }

    /// Starts a fetch for `key` unless one is running. With `replace` the
    /// running one is cancelled and its waiters move to the new fetch.
    fn start_fetch(&mut self, key: &QueryKey, fetch: HttpRequest, replace: bool) -> bool {
        if !replace && self.in_flight.contains_key(key) {
            debug!(%key, "Joining in-flight fetch");
            return false;
        }
        let waiters = self
            .in_flight
            .remove(key)
            .map(|current| {
                current.token.cancel();
                current.waiters
            })
            .unwrap_or_default();

        let fetch_id = self.next_fetch_id;
        self.next_fetch_id += 1;
        let token = self.shutdown.child_token();
        self.in_flight.insert(
            key.clone(),
            InFlight {
                fetch_id,
                token: token.clone(),
                waiters,
            },
        );

        debug!(%key, fetch_id, "Fetching");
        self.jobs.push(FetchJob {
            key: key.clone(),
            fetch_id,
            request: fetch,
            token,
        });
        true
    }

    /// Refetches every observed key under `prefix`.
    fn refetch_observed(&mut self, prefix: &QueryKey, core: &AppCore) -> (Vec<Effect>, Vec<QueryKey>) {
        let targets: Vec<(QueryKey, HttpRequest)> = self
            .observers
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, observers)| {
                observers
                    .front()
                    .map(|observer| (key.clone(), observer.fetch.clone()))
            })
            .collect();

        let mut effects = Vec::new();
        let mut keys = Vec::with_capacity(targets.len());
        for (key, fetch) in targets {
            self.start_fetch(&key, fetch, true);
            effects.extend(self.broadcast(&key, &QueryOutput::Fetching, core));
            keys.push(key);
        }
        (effects, keys)
    }

    fn broadcast(&mut self, key: &QueryKey, output: &QueryOutput, core: &AppCore) -> Vec<Effect> {
        let Some(observers) = self.observers.get_mut(key) else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        for observer in observers {
            effects.extend(core.resolve(&mut observer.request, output.clone()));
        }
        effects
    }

    /// Answers every pending `Refetch` that was only waiting on `key`.
    fn settle_refetches(&mut self, key: &QueryKey, core: &AppCore) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut pending = Vec::with_capacity(self.refetches.len());
        for mut refetch in std::mem::take(&mut self.refetches) {
            refetch.keys.remove(key);
            if refetch.keys.is_empty() {
                effects.extend(core.resolve(&mut refetch.request, QueryOutput::Refetched));
            } else {
                pending.push(refetch);
            }
        }
        self.refetches = pending;
        effects
    }
}

//! Async runtime around the events core.
//!
//! The shell owns the [`Core`], resolves every [`Effect`] it emits and keeps
//! the location the core pushes. HTTP and cache fetches run on a
//! [`JoinSet`]; their outcomes are applied one at a time by
//! [`Shell::process_next`], so the core only ever runs on the caller's task.

use crux_core::{Core, Request};
use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use events_shared::capabilities::NavigationOperation;
use events_shared::navigation::NavigationState;
use events_shared::{App, AppConfig, Effect, Event, QueryKey, Route, ViewModel};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{FetchJob, QueryCache};
use crate::executor::HttpExecutor;
use crate::store::{MemoryQueryStore, QueryStore};
use crate::ShellError;

enum TaskOutcome {
    Http {
        id: u64,
        result: HttpResult,
    },
    Fetched {
        key: QueryKey,
        fetch_id: u64,
        result: HttpResult,
    },
    Cancelled,
}

pub struct Shell<E, S = MemoryQueryStore<HttpResponse>> {
    core: Core<Effect, App>,
    executor: Arc<E>,
    cache: QueryCache<S>,
    /// Core HTTP requests awaiting their task, by id.
    http: HashMap<u64, Request<HttpRequest>>,
    next_http_id: u64,
    tasks: JoinSet<TaskOutcome>,
    history: Vec<Route>,
    render: watch::Sender<ViewModel>,
    shutdown: CancellationToken,
}

impl<E: HttpExecutor + 'static> Shell<E> {
    /// Shell over a fresh bounded in-memory store.
    pub fn new(executor: E, config: AppConfig) -> Self {
        Self::with_store(executor, Arc::new(MemoryQueryStore::default()), config)
    }
}

impl<E, S> Shell<E, S>
where
    E: HttpExecutor + 'static,
    S: QueryStore<HttpResponse> + 'static,
{
    pub fn with_store(executor: E, store: Arc<S>, config: AppConfig) -> Self {
        let core = Core::<Effect, App>::default();
        let shutdown = CancellationToken::new();
        let (render, _) = watch::channel(core.view());

        let mut shell = Self {
            core,
            executor: Arc::new(executor),
            cache: QueryCache::new(store, shutdown.clone()),
            http: HashMap::new(),
            next_http_id: 0,
            tasks: JoinSet::new(),
            history: Vec::new(),
            render,
            shutdown,
        };
        let effects = shell.core.process_event(Event::Configure(config));
        shell.apply(effects);
        shell
    }

    pub fn view(&self) -> ViewModel {
        self.core.view()
    }

    /// The last route the core committed.
    pub fn location(&self) -> Route {
        self.history.last().cloned().unwrap_or(Route::Events)
    }

    pub fn history(&self) -> &[Route] {
        &self.history
    }

    pub fn store(&self) -> &S {
        self.cache.store()
    }

    /// Receives a fresh [`ViewModel`] after every batch of state changes.
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.render.subscribe()
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.cache.observer_count(key)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.cache.is_fetching(key)
    }

    /// Navigates to `path`. Returns once the route is committed or its
    /// loader has failed; fetches started by the view keep running.
    pub async fn open(&mut self, path: &str) -> Result<(), ShellError> {
        let route = Route::parse(path).ok_or_else(|| ShellError::UnknownRoute(path.to_string()))?;
        self.navigate(route).await;
        Ok(())
    }

    #[instrument(skip(self, route), fields(route = %route))]
    pub async fn navigate(&mut self, route: Route) {
        info!("Navigating");
        self.dispatch(Event::Navigate(route)).await;
    }

    /// Sends `event` to the core and waits until the router is idle again.
    pub async fn dispatch(&mut self, event: Event) {
        let effects = self.core.process_event(event);
        self.apply(effects);
        while self.core.view().navigation != NavigationState::Idle {
            if !self.process_next().await {
                warn!("Router busy with nothing left to run");
                break;
            }
        }
    }

    /// Waits for the next spawned task and applies its outcome. Returns
    /// `false` when nothing is pending.
    pub async fn process_next(&mut self) -> bool {
        let Some(joined) = self.tasks.join_next().await else {
            return false;
        };
        match joined {
            Ok(outcome) => self.complete(outcome),
            Err(error) => warn!(error = %error, "Task failed"),
        }
        true
    }

    /// Applies outcomes until no spawned work is left.
    pub async fn settle(&mut self) {
        while self.process_next().await {}
    }

    fn complete(&mut self, outcome: TaskOutcome) {
        let effects = match outcome {
            TaskOutcome::Http { id, result } => match self.http.remove(&id) {
                Some(mut request) => self.core.resolve(&mut request, result),
                None => Vec::new(),
            },
            TaskOutcome::Fetched {
                key,
                fetch_id,
                result,
            } => self.cache.fetched(&key, fetch_id, result, &self.core),
            TaskOutcome::Cancelled => Vec::new(),
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        let mut dirty = false;

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Render(_) => dirty = true,
                Effect::Http(request) => self.spawn_http(request),
                Effect::Query(request) => {
                    queue.extend(self.cache.handle(request, &self.core));
                    for job in self.cache.take_jobs() {
                        self.spawn_fetch(job);
                    }
                }
                // Notifications; resolving them is an error.
                Effect::Navigation(request) => {
                    let NavigationOperation::Push(route) = &request.operation;
                    debug!(%route, "Location changed");
                    self.history.push(route.clone());
                }
            }
        }

        if dirty {
            self.render.send_replace(self.core.view());
        }
    }

    fn spawn_http(&mut self, request: Request<HttpRequest>) {
        let id = self.next_http_id;
        self.next_http_id += 1;
        let operation = request.operation.clone();
        self.http.insert(id, request);

        let executor = Arc::clone(&self.executor);
        let token = self.shutdown.child_token();
        self.tasks.spawn(async move {
            tokio::select! {
                () = token.cancelled() => TaskOutcome::Cancelled,
                result = executor.execute(operation) => TaskOutcome::Http { id, result },
            }
        });
    }

    fn spawn_fetch(&mut self, job: FetchJob) {
        let FetchJob {
            key,
            fetch_id,
            request,
            token,
        } = job;
        let executor = Arc::clone(&self.executor);
        self.tasks.spawn(async move {
            tokio::select! {
                () = token.cancelled() => TaskOutcome::Cancelled,
                result = executor.execute(request) => TaskOutcome::Fetched { key, fetch_id, result },
            }
        });
    }
}

impl<E, S> Drop for Shell<E, S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

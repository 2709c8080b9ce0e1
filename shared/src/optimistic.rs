//! Speculative cache writes with rollback.
//!
//! Only used when [`crate::EditStrategy::Optimistic`] is configured. Any
//! in-flight fetch for the key is cancelled first, so no older response can
//! land on top of the speculative value while the write is pending.

use crux_http::protocol::HttpResponse;
use tracing::debug;

use crate::capabilities::{Query, QueryKey, RefetchType};
use crate::client::snapshot;
use crate::model::EventRecord;
use crate::AppResult;

/// One speculative write, holding the snapshot it replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticUpdate {
    key: QueryKey,
    previous: Option<HttpResponse>,
}

impl OptimisticUpdate {
    /// Cancels fetches on `key` and writes `next` over `previous`.
    pub fn begin<Ev: 'static>(
        query: &Query<Ev>,
        key: QueryKey,
        previous: Option<&EventRecord>,
        next: &EventRecord,
    ) -> AppResult<Self> {
        let previous = previous.map(snapshot).transpose()?;
        let next = snapshot(next)?;

        query.cancel(key.clone());
        query.write(key.clone(), Some(next));
        debug!(%key, had_previous = previous.is_some(), "Optimistic write");
        Ok(Self { key, previous })
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Puts back whatever was cached before `begin`.
    pub fn rollback<Ev: 'static>(&self, query: &Query<Ev>) {
        query.write(self.key.clone(), self.previous.clone());
        debug!(key = %self.key, "Optimistic write rolled back");
    }

    /// Settles the write: rolls back on failure, then invalidates the key
    /// either way so observers converge on the server's copy.
    pub fn finish<Ev: 'static, T>(self, query: &Query<Ev>, outcome: &AppResult<T>) {
        if outcome.is_err() {
            self.rollback(query);
        }
        query.invalidate(self.key, RefetchType::Active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::capabilities::{Effect, QueryOperation};
    use crate::event::Event;
    use crate::model::{EventId, Model};
    use crate::AppError;
    use crux_core::testing::AppTester;

    fn key() -> QueryKey {
        QueryKey::event(&EventId::new("42"))
    }

    fn record(title: &str) -> EventRecord {
        EventRecord {
            id: "42".into(),
            title: title.into(),
            ..EventRecord::default()
        }
    }

    /// Query operations queued by capability calls made outside `update`.
    fn query_ops(app: &AppTester<App, Effect>) -> Vec<QueryOperation> {
        app.update(Event::CloseEdit, &mut Model::default())
            .effects
            .into_iter()
            .filter_map(Effect::into_query)
            .map(|request| request.operation)
            .collect()
    }

    #[test]
    fn test_begin_cancels_then_writes() {
        let app = AppTester::<App, Effect>::default();
        let query = &app.as_ref().query;

        let update = OptimisticUpdate::begin(query, key(), Some(&record("old")), &record("new"))
            .unwrap();
        assert_eq!(update.key(), &key());

        assert_eq!(
            query_ops(&app),
            vec![
                QueryOperation::Cancel { key: key() },
                QueryOperation::Write {
                    key: key(),
                    snapshot: Some(snapshot(&record("new")).unwrap()),
                },
            ]
        );
    }

    #[test]
    fn test_success_keeps_value_and_invalidates() {
        let app = AppTester::<App, Effect>::default();
        let query = &app.as_ref().query;
        let update = OptimisticUpdate::begin(query, key(), Some(&record("old")), &record("new"))
            .unwrap();
        query_ops(&app);

        update.finish(query, &Ok::<(), AppError>(()));

        assert_eq!(
            query_ops(&app),
            vec![QueryOperation::Invalidate {
                prefix: key(),
                refetch: RefetchType::Active,
            }]
        );
    }

    #[test]
    fn test_failure_restores_previous() {
        let app = AppTester::<App, Effect>::default();
        let query = &app.as_ref().query;
        let update = OptimisticUpdate::begin(query, key(), Some(&record("old")), &record("new"))
            .unwrap();
        query_ops(&app);

        update.finish(query, &Err::<(), _>(AppError::network("refused")));

        assert_eq!(
            query_ops(&app),
            vec![
                QueryOperation::Write {
                    key: key(),
                    snapshot: Some(snapshot(&record("old")).unwrap()),
                },
                QueryOperation::Invalidate {
                    prefix: key(),
                    refetch: RefetchType::Active,
                },
            ]
        );
    }

    #[test]
    fn test_failure_without_previous_clears_entry() {
        let app = AppTester::<App, Effect>::default();
        let query = &app.as_ref().query;
        let update = OptimisticUpdate::begin(query, key(), None, &record("new")).unwrap();
        query_ops(&app);

        update.finish(query, &Err::<(), _>(AppError::network("refused")));

        assert_eq!(
            query_ops(&app)[0],
            QueryOperation::Write {
                key: key(),
                snapshot: None,
            }
        );
    }
}

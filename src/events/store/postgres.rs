//! PostgreSQL [`EventStore`].
//!
//! Claims use `SELECT ... FOR UPDATE SKIP LOCKED` inside [`Database::transaction`], so a
//! concurrent consumer holding the same event id sees nothing instead of blocking, and
//! handler queries made through [`Database`] during the claim join the same transaction.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tracing::info;

use super::{ClaimWork, EventStore};
use crate::database::{Database, DatabaseError, DatabaseResult, IsolationLevel};
use crate::error::Result;
use crate::events::record::{EventFilter, EventRecord};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS courier_events (
    id TEXT PRIMARY KEY,
    event TEXT NOT NULL,
    data JSONB NOT NULL,
    sent_at TIMESTAMPTZ,
    processed_at TIMESTAMPTZ,
    received_at TIMESTAMPTZ NOT NULL,
    rollback BOOLEAN DEFAULT FALSE
)
"#;

const CREATE_INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS courier_events_event_processed_idx
    ON courier_events (event, processed_at)
"#;

const SAVE_SQL: &str = r#"
INSERT INTO courier_events (id, event, data, sent_at, processed_at, received_at, rollback)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (id) DO UPDATE SET received_at = EXCLUDED.received_at
    WHERE courier_events.processed_at IS NULL
RETURNING id, event, data, sent_at, processed_at, received_at, rollback
"#;

const GET_BY_ID_SQL: &str = r#"
SELECT id, event, data, sent_at, processed_at, received_at, rollback
FROM courier_events
WHERE id = $1
"#;

const CLAIM_SQL: &str = r#"
SELECT id, event, data, sent_at, processed_at, received_at, rollback
FROM courier_events
WHERE id = $1 AND processed_at IS NULL
FOR UPDATE SKIP LOCKED
"#;

const MARK_PROCESSED_SQL: &str = r#"
UPDATE courier_events SET processed_at = NOW()
WHERE id = $1
RETURNING id, event, data, sent_at, processed_at, received_at, rollback
"#;

const GET_MULTIPLE_SQL: &str = r#"
SELECT id, event, data, sent_at, processed_at, received_at, rollback
FROM courier_events
WHERE ($1::BOOLEAN IS NULL OR (processed_at IS NOT NULL) = $1)
  AND ($2::TEXT[] IS NULL OR event = ANY($2))
ORDER BY received_at
"#;

const SET_UNPROCESSED_SQL: &str = "UPDATE courier_events SET processed_at = NULL WHERE id = $1";

#[derive(Debug, Clone)]
pub struct PgEventStore {
    db: Database,
    isolation: IsolationLevel,
}

impl PgEventStore {
    /// Store whose claims run at the database's default isolation
    pub fn new(db: Database) -> Self {
        let isolation = db.default_isolation();
        Self { db, isolation }
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Create the events table if it does not exist
    pub async fn migrate(&self) -> DatabaseResult<()> {
        self.db.execute(sqlx::query(CREATE_TABLE_SQL)).await?;
        self.db.execute(sqlx::query(CREATE_INDEX_SQL)).await?;
        info!("Event store schema ready");
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn save(&self, record: EventRecord) -> Result<Option<EventRecord>> {
        let saved = self
            .db
            .fetch_optional(
                sqlx::query_as::<_, EventRecord>(SAVE_SQL)
                    .bind(&record.id)
                    .bind(&record.event)
                    .bind(&record.data)
                    .bind(record.sent_at)
                    .bind(record.processed_at)
                    .bind(record.received_at)
                    .bind(record.rollback),
            )
            .await?;
        Ok(saved)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<EventRecord>> {
        let record = self
            .db
            .fetch_optional(sqlx::query_as::<_, EventRecord>(GET_BY_ID_SQL).bind(id))
            .await?;
        Ok(record)
    }

    async fn tap(&self, id: &str, work: ClaimWork) -> Result<Option<EventRecord>> {
        let db = &self.db;
        db.transaction(self.isolation, || async move {
            let claimed = db
                .fetch_optional(sqlx::query_as::<_, EventRecord>(CLAIM_SQL).bind(id))
                .await?;

            let Some(record) = claimed else {
                return Ok(None);
            };

            work(record).await?;

            let processed = db
                .fetch_optional(sqlx::query_as::<_, EventRecord>(MARK_PROCESSED_SQL).bind(id))
                .await?;
            Ok(processed)
        })
        .await
    }

    fn get_multiple(&self, filter: EventFilter) -> BoxStream<'_, Result<EventRecord>> {
        sqlx::query_as::<_, EventRecord>(GET_MULTIPLE_SQL)
            .bind(filter.processed)
            .bind(filter.event_types)
            .fetch(self.db.pool())
            .map(|row| row.map_err(|e| DatabaseError::from(e).into()))
            .boxed()
    }

    async fn set_unprocessed(&self, id: &str) -> Result<()> {
        self.db
            .execute(sqlx::query(SET_UNPROCESSED_SQL).bind(id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;
    use crate::test_utils::parsed_event;
    use futures::{FutureExt, TryStreamExt};

    // Integration tests require PostgreSQL
    // Run with: DATABASE_URL=postgresql://... cargo test pg_event_store -- --ignored

    async fn store_from_env() -> PgEventStore {
        let config = crate::test_utils::test_database_config();
        let store = PgEventStore::new(Database::connect(&config).await.unwrap());
        store.migrate().await.unwrap();
        store
    }

    fn noop_work() -> ClaimWork {
        Box::new(|_record: EventRecord| async { Ok::<(), CourierError>(()) }.boxed())
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL running"]
    async fn test_pg_event_store_save_tap_cycle() {
        let store = store_from_env().await;
        let id = uuid::Uuid::new_v4().to_string();
        let record = EventRecord::received(&parsed_event(&id, "pg", false));

        assert!(store.save(record.clone()).await.unwrap().is_some());
        let tapped = store.tap(&id, noop_work()).await.unwrap().unwrap();
        assert!(tapped.is_processed());

        assert!(store.save(record).await.unwrap().is_none());
        assert!(store.tap(&id, noop_work()).await.unwrap().is_none());

        store.set_unprocessed(&id).await.unwrap();
        let reloaded = store.get_by_id(&id).await.unwrap().unwrap();
        assert!(!reloaded.is_processed());

        let unprocessed: Vec<_> = store
            .get_multiple(EventFilter::default().processed(false).event_types(["test"]))
            .try_collect()
            .await
            .unwrap();
        assert!(unprocessed.iter().any(|r| r.id == id));
    }
}

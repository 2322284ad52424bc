//! PostgreSQL implementation of OutboxStore.
//!
//! Rows live in `internal_events_outbox`. Ordering uses the `seq` column,
//! which follows insertion order even for rows created in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::domain::internal_events::OutboxEvent;
use crate::ports::{OutboxStore, TransactionalOutboxStore};

/// Embedded migrations for the outbox table.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL implementation of OutboxStore.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgresOutboxStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<(), DomainError> {
        MIGRATOR.run(&self.pool).await.map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to run outbox migrations: {}", e),
            )
        })
    }
}

#[async_trait]
impl<'c> TransactionalOutboxStore<Transaction<'c, Postgres>> for PostgresOutboxStore {
    async fn insert_in(
        &self,
        tx: &mut Transaction<'c, Postgres>,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<OutboxEvent, DomainError> {
        let row = OutboxEvent::new(event_type, payload)?;
        insert_query(&row)
            .execute(&mut **tx)
            .await
            .map_err(|e| insert_error(&e))?;
        Ok(row)
    }
}

fn insert_query(
    row: &OutboxEvent,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO internal_events_outbox (id, event_type, payload, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(row.id)
    .bind(&row.event_type)
    .bind(&row.payload)
    .bind(row.created_at.as_datetime())
}

fn insert_error(e: &sqlx::Error) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Failed to insert outbox event: {}", e),
    )
}

fn row_to_event(row: &PgRow) -> Result<OutboxEvent, DomainError> {
    let map_err = |e: sqlx::Error| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Failed to read outbox row: {}", e),
        )
    };

    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map_err)?;
    let published_at: Option<DateTime<Utc>> = row.try_get("published_at").map_err(map_err)?;

    Ok(OutboxEvent {
        id: row.try_get("id").map_err(map_err)?,
        event_type: row.try_get("event_type").map_err(map_err)?,
        payload: row.try_get("payload").map_err(map_err)?,
        created_at: Timestamp::from_datetime(created_at),
        published_at: published_at.map(Timestamp::from_datetime),
    })
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn insert(
        &self,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<OutboxEvent, DomainError> {
        let row = OutboxEvent::new(event_type, payload)?;
        insert_query(&row)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_error(&e))?;
        Ok(row)
    }

    async fn fetch_unpublished(&self, limit: u32) -> Result<Vec<OutboxEvent>, DomainError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, payload, created_at, published_at
            FROM internal_events_outbox
            WHERE published_at IS NULL
            ORDER BY seq ASC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to fetch unpublished events: {}", e),
            )
        })?;

        rows.iter().map(row_to_event).collect()
    }

    async fn mark_published(&self, id: Uuid, at: Timestamp) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE internal_events_outbox
            SET published_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to mark event published: {}", e),
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::OutboxRowNotFound,
                format!("Outbox row {} not found", id),
            ));
        }

        Ok(())
    }

    async fn delete_published_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            DELETE FROM internal_events_outbox
            WHERE published_at IS NOT NULL AND published_at < $1
            "#,
        )
        .bind(cutoff.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to delete published events: {}", e),
            )
        })?;

        Ok(result.rows_affected())
    }
}

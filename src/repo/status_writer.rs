//! Pluggable store-write path for status changes (SPEC_FULL.md Open
//! Question 2).
//!
//! The source contains both a log-only variant and one that writes
//! directly to the store; rather than guess, the write path is a trait
//! with a default `LoggingStatusWriter` and an optional `PgStatusWriter`,
//! selected by the `status_writer` config key.

use gateway_protocol::StatusEntry;
use sqlx::PgPool;

#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write(&self, entry: &StatusEntry);
}

/// Default: logs what *would* be written, as a simulated upsert
/// (spec.md §2 data/control flow: "a simulated store upsert is logged").
pub struct LoggingStatusWriter;

#[async_trait::async_trait]
impl StatusWriter for LoggingStatusWriter {
    async fn write(&self, entry: &StatusEntry) {
        tracing::debug!(
            host = %entry.host,
            source = %entry.source,
            r#type = %entry.entry_type,
            value = %entry.value,
            "status upsert (log-only writer)"
        );
    }
}

/// Authoritative variant: actually upserts into the external status table.
/// Not wired into `main` by default (see DESIGN.md Open Question 2).
pub struct PgStatusWriter {
    pool: PgPool,
}

impl PgStatusWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StatusWriter for PgStatusWriter {
    async fn write(&self, entry: &StatusEntry) {
        let result = sqlx::query(
            "INSERT INTO server_status (host, source, type, value, sys_time) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (host, source, type) DO UPDATE SET \
               value = EXCLUDED.value, sys_time = EXCLUDED.sys_time",
        )
        .bind(&entry.host)
        .bind(&entry.source)
        .bind(&entry.entry_type)
        .bind(&entry.value)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, host = %entry.host, "status store write failed");
        }
    }
}

//! Device registry + reachability aggregate persistence (spec.md §3 Device,
//! §4.A, §4.B).
//!
//! Grounded on the teacher's `repo/events.rs` query style, but using the
//! runtime-checked `sqlx::query`/`query_as` API rather than the `query!`
//! macro: the macro variant requires either a live `DATABASE_URL` or a
//! checked-in `.sqlx` query cache at build time, neither of which this
//! workspace carries (noted in DESIGN.md).

use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceRow {
    pub address: String,
    pub display_name: String,
    pub hidden: bool,
    pub ping_avg: i64,
    pub ping_success: f64,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Load every registered device address at startup (spec.md §4.A).
pub async fn load_all(pool: &PgPool) -> Result<Vec<DeviceRow>, sqlx::Error> {
    sqlx::query_as::<_, DeviceRow>(
        "SELECT address, display_name, hidden, ping_avg, ping_success, last_ping, last_seen \
         FROM devices ORDER BY address",
    )
    .fetch_all(pool)
    .await
}

/// Insert a new device address if absent (browser `AddDevice` intent,
/// spec.md §4.H).
pub async fn insert_if_absent(pool: &PgPool, address: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO devices (address) VALUES ($1) ON CONFLICT (address) DO NOTHING",
    )
    .bind(address)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert reachability aggregates after a probe cycle (spec.md §4.B).
///
/// `last_ping` is only bumped when `probe_succeeded`; `last_seen` tracks
/// the separate notion of "this probe cycle ran against this address at
/// all" and is bumped to `now()` unconditionally, regardless of outcome.
pub async fn upsert_reachability(
    pool: &PgPool,
    address: &str,
    ping_avg: i64,
    ping_success: f64,
    probe_succeeded: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO devices (address, ping_avg, ping_success, last_ping, last_seen) \
         VALUES ($1, $2, $3, CASE WHEN $4 THEN now() ELSE NULL END, now()) \
         ON CONFLICT (address) DO UPDATE SET \
           ping_avg = EXCLUDED.ping_avg, \
           ping_success = EXCLUDED.ping_success, \
           last_ping = CASE WHEN $4 THEN now() ELSE devices.last_ping END, \
           last_seen = now()",
    )
    .bind(address)
    .bind(ping_avg)
    .bind(ping_success)
    .bind(probe_succeeded)
    .execute(pool)
    .await?;
    Ok(())
}

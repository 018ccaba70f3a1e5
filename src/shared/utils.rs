use anyhow::Context;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;

use crate::config::DatabaseConfig;
use crate::shared::error::QueueError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Runs diesel work on the blocking pool with a connection checked out for
/// the duration of the closure.
pub async fn run_blocking<T, F>(pool: DbPool, f: F) -> Result<T, QueueError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, QueueError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}

pub fn create_pool(config: &DatabaseConfig) -> anyhow::Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(&config.url);
    Pool::builder()
        .max_size(config.max_connections)
        .build(manager)
        .context("failed to build database connection pool")
}

/// Utc bounds of the current service day. The registrar's local midnight is
/// expressed as an offset from Utc so "today" matches the wall clock at the
/// counters rather than the server's clock.
pub fn service_day_bounds(offset_minutes: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = Duration::minutes(i64::from(offset_minutes));
    let local_date = (Utc::now() + offset).date_naive();
    let midnight = local_date.and_time(NaiveTime::MIN).and_utc();
    let start = midnight - offset;
    (start, start + Duration::days(1))
}

/// Local calendar date of the current service day, used as the counter key.
pub fn service_day(offset_minutes: i32) -> chrono::NaiveDate {
    (Utc::now() + Duration::minutes(i64::from(offset_minutes))).date_naive()
}

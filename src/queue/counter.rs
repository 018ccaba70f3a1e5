//! Per-day ticket number allocation.
//!
//! One counter row per service day. The increment is a single upsert so two
//! concurrent allocations for the same date serialize on the row lock and can
//! never hand out the same number; rolling back the surrounding transaction
//! also rolls the increment back, keeping the day's numbers contiguous.

use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rand::Rng;
use std::time::Duration;
use tracing::warn;

use crate::shared::schema::queue_counters;

/// Issues the next queue number for `day`, starting at 1 for a fresh date.
pub fn next_number(conn: &mut PgConnection, day: NaiveDate) -> Result<i32, DieselError> {
    diesel::insert_into(queue_counters::table)
        .values((
            queue_counters::date.eq(day),
            queue_counters::last_number.eq(1),
        ))
        .on_conflict(queue_counters::date)
        .do_update()
        .set(queue_counters::last_number.eq(queue_counters::last_number + 1))
        .returning(queue_counters::last_number)
        .get_result(conn)
}

/// Commit failures worth retrying: the transaction lost a race, not the data.
pub fn is_retryable(error: &DieselError) -> bool {
    matches!(
        error,
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _)
    )
}

/// Linear backoff with jitter between allocation retries.
pub fn backoff(attempt: u32) {
    let jitter = rand::thread_rng().gen_range(0..25);
    let millis = u64::from(attempt) * 50 + jitter;
    warn!("queue number allocation retry {attempt}, backing off {millis}ms");
    std::thread::sleep(Duration::from_millis(millis));
}

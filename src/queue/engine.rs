//! The queue assignment engine: every ticket mutation goes through here, and
//! every mutation is one database transaction. Handlers never decide
//! eligibility from a fetched snapshot: the claim in [`call_next`] selects
//! and marks the candidate inside the same transaction with a row lock, so
//! two staff calling next at once can never take the same ticket.

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use tracing::info;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::queue::counter;
use crate::shared::error::QueueError;
use crate::shared::models::{ServiceWindow, Ticket, TicketStatus, TransactionType};
use crate::shared::schema::{queue_tickets, service_windows};
use crate::shared::utils::{service_day, service_day_bounds};

/// Engine knobs lifted out of [`QueueConfig`] so the engine itself stays
/// free of the HTTP-facing configuration surface.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub window_capacity: i64,
    pub counter_max_retries: u32,
    pub timezone_offset_minutes: i32,
}

impl From<&QueueConfig> for EngineSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            window_capacity: config.window_capacity,
            counter_max_retries: config.counter_max_retries,
            timezone_offset_minutes: config.timezone_offset_minutes,
        }
    }
}

/// A validated registration, ready to insert.
#[derive(Debug, Clone)]
pub struct Registration {
    pub student_name: String,
    pub student_id: Option<String>,
    pub transaction_type: TransactionType,
}

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 100;

/// Validates raw registration input before anything touches the store.
pub fn validate_registration(
    student_name: &str,
    transaction_type: &str,
    student_id: Option<&str>,
) -> Result<Registration, QueueError> {
    let name = student_name.trim();
    if name.is_empty() {
        return Err(QueueError::validation("student name is required"));
    }
    if name.chars().count() < NAME_MIN || name.chars().count() > NAME_MAX {
        return Err(QueueError::validation(format!(
            "student name must be {NAME_MIN} to {NAME_MAX} characters"
        )));
    }

    let Some(transaction_type) = TransactionType::parse(transaction_type) else {
        return Err(QueueError::validation("invalid transaction type"));
    };

    let student_id = match student_id.map(str::trim) {
        None | Some("") => None,
        Some(raw) => {
            if !is_valid_student_id(raw) {
                return Err(QueueError::validation(
                    "invalid student ID format, expected 0000-00000",
                ));
            }
            Some(raw.to_string())
        }
    };

    Ok(Registration {
        student_name: name.to_string(),
        student_id,
        transaction_type,
    })
}

/// Student IDs look like `2024-12345`.
pub fn is_valid_student_id(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes[..4].iter().all(|b| b.is_ascii_digit())
        && bytes[4] == b'-'
        && bytes[5..].iter().all(|b| b.is_ascii_digit())
}

/// Creates a waiting ticket with the next number for the current service day.
/// The counter increment and the insert commit together, so a failed insert
/// never leaves a hole in the day's numbering. Serialization conflicts are
/// retried; persistent failure surfaces as [`QueueError::Allocation`] with
/// nothing persisted.
pub fn create_ticket(
    conn: &mut PgConnection,
    settings: &EngineSettings,
    registration: &Registration,
) -> Result<Ticket, QueueError> {
    let day = service_day(settings.timezone_offset_minutes);
    let mut attempt = 0;

    loop {
        let result = conn.transaction::<Ticket, DieselError, _>(|conn| {
            let number = counter::next_number(conn, day)?;
            let ticket = Ticket {
                id: Uuid::new_v4(),
                queue_number: number,
                student_name: registration.student_name.clone(),
                student_id: registration.student_id.clone(),
                transaction_type: registration.transaction_type.as_str().to_string(),
                status: TicketStatus::Waiting.as_str().to_string(),
                window_id: None,
                created_at: Utc::now(),
                called_at: None,
                completed_at: None,
            };
            diesel::insert_into(queue_tickets::table)
                .values(&ticket)
                .execute(conn)?;
            Ok(ticket)
        });

        match result {
            Ok(ticket) => {
                info!(
                    "ticket {} registered as number {} ({})",
                    ticket.id,
                    ticket.queue_number,
                    registration.transaction_type.as_str()
                );
                return Ok(ticket);
            }
            Err(e) if counter::is_retryable(&e) => {
                attempt += 1;
                if attempt > settings.counter_max_retries {
                    return Err(QueueError::Allocation);
                }
                counter::backoff(attempt);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Transaction types a window may pull next, given its disabled services and
/// an optional staff-requested filter.
pub fn eligible_services(
    disabled: &[String],
    filter: Option<TransactionType>,
) -> Vec<&'static str> {
    match filter {
        Some(f) => {
            if disabled.iter().any(|d| d == f.as_str()) {
                Vec::new()
            } else {
                vec![f.as_str()]
            }
        }
        None => TransactionType::ALL
            .iter()
            .map(|t| t.as_str())
            .filter(|s| !disabled.iter().any(|d| d == s))
            .collect(),
    }
}

/// Claims the oldest eligible waiting ticket for a window.
///
/// The window row is locked first, serializing concurrent call-next on the
/// same window so the capacity check cannot race; the candidate select uses
/// `FOR UPDATE SKIP LOCKED` so concurrent claims across windows never pick
/// the same ticket. `Ok(None)` (nothing eligible, window inactive, or at
/// capacity) is a normal outcome, not a failure.
pub fn call_next(
    conn: &mut PgConnection,
    settings: &EngineSettings,
    window: Uuid,
    filter: Option<TransactionType>,
) -> Result<Option<Ticket>, QueueError> {
    let settings = *settings;
    conn.transaction::<Option<Ticket>, QueueError, _>(move |conn| {
        let window: Option<ServiceWindow> = service_windows::table
            .find(window)
            .for_update()
            .first(conn)
            .optional()?;
        let Some(window) = window else {
            return Err(QueueError::NotFound("window"));
        };
        if !window.is_active {
            return Ok(None);
        }

        let serving: i64 = queue_tickets::table
            .filter(queue_tickets::window_id.eq(window.id))
            .filter(queue_tickets::status.eq(TicketStatus::InProgress.as_str()))
            .count()
            .get_result(conn)?;
        if serving >= settings.window_capacity {
            return Ok(None);
        }

        let allowed = eligible_services(&window.disabled_services, filter);
        if allowed.is_empty() {
            return Ok(None);
        }

        let (day_start, day_end) = service_day_bounds(settings.timezone_offset_minutes);
        let candidate: Option<Ticket> = queue_tickets::table
            .filter(queue_tickets::status.eq(TicketStatus::Waiting.as_str()))
            .filter(queue_tickets::created_at.ge(day_start))
            .filter(queue_tickets::created_at.lt(day_end))
            .filter(queue_tickets::transaction_type.eq_any(&allowed))
            .order((
                queue_tickets::created_at.asc(),
                queue_tickets::queue_number.asc(),
            ))
            .limit(1)
            .for_update()
            .skip_locked()
            .first(conn)
            .optional()?;
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let claimed: Ticket = diesel::update(queue_tickets::table.find(candidate.id))
            .set((
                queue_tickets::status.eq(TicketStatus::InProgress.as_str()),
                queue_tickets::window_id.eq(window.id),
                queue_tickets::called_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        info!(
            "window {} called ticket {} (number {})",
            window.window_number, claimed.id, claimed.queue_number
        );
        Ok(Some(claimed))
    })
}

/// Marks an in-progress ticket completed and frees its window slot. Returns
/// the updated ticket and the window it was served at; `Ok(None)` when the
/// ticket exists but is not in progress (already handled elsewhere).
pub fn complete(
    conn: &mut PgConnection,
    ticket: Uuid,
) -> Result<Option<(Ticket, Option<Uuid>)>, QueueError> {
    conn.transaction::<Option<(Ticket, Option<Uuid>)>, QueueError, _>(|conn| {
        let current: Option<Ticket> = queue_tickets::table
            .find(ticket)
            .for_update()
            .first(conn)
            .optional()?;
        let Some(current) = current else {
            return Err(QueueError::NotFound("ticket"));
        };
        if current.status() != Some(TicketStatus::InProgress) {
            return Ok(None);
        }

        let served_at = current.window_id;
        let updated: Ticket = diesel::update(queue_tickets::table.find(ticket))
            .set((
                queue_tickets::status.eq(TicketStatus::Completed.as_str()),
                queue_tickets::completed_at.eq(Utc::now()),
                queue_tickets::window_id.eq(None::<Uuid>),
            ))
            .get_result(conn)?;

        info!("ticket {} completed", updated.id);
        Ok(Some((updated, served_at)))
    })
}

/// Cancels a waiting ticket. The guarded update only matches while the
/// ticket is still waiting, so a ticket that was called in the meantime is
/// left untouched and reported as `Ok(None)`.
pub fn cancel(conn: &mut PgConnection, ticket: Uuid) -> Result<Option<Ticket>, QueueError> {
    let cancelled: Option<Ticket> = diesel::update(
        queue_tickets::table
            .find(ticket)
            .filter(queue_tickets::status.eq(TicketStatus::Waiting.as_str())),
    )
    .set(queue_tickets::status.eq(TicketStatus::Cancelled.as_str()))
    .get_result(conn)
    .optional()?;

    match cancelled {
        Some(t) => {
            info!("ticket {} cancelled", t.id);
            Ok(Some(t))
        }
        None => {
            let exists: Option<Uuid> = queue_tickets::table
                .find(ticket)
                .select(queue_tickets::id)
                .first(conn)
                .optional()?;
            match exists {
                Some(_) => Ok(None),
                None => Err(QueueError::NotFound("ticket")),
            }
        }
    }
}

/// People ahead plus one. Only defined while the ticket is waiting; asking
/// for anything else is a conflict.
pub fn queue_position(
    conn: &mut PgConnection,
    settings: &EngineSettings,
    ticket: Uuid,
) -> Result<i64, QueueError> {
    let current: Option<Ticket> = queue_tickets::table.find(ticket).first(conn).optional()?;
    let Some(current) = current else {
        return Err(QueueError::NotFound("ticket"));
    };
    if current.status() != Some(TicketStatus::Waiting) {
        return Err(QueueError::conflict("ticket is no longer waiting"));
    }

    let (day_start, day_end) = service_day_bounds(settings.timezone_offset_minutes);
    let ahead: i64 = queue_tickets::table
        .filter(queue_tickets::status.eq(TicketStatus::Waiting.as_str()))
        .filter(queue_tickets::created_at.ge(day_start))
        .filter(queue_tickets::created_at.lt(day_end))
        .filter(queue_tickets::created_at.lt(current.created_at))
        .count()
        .get_result(conn)?;
    Ok(ahead + 1)
}

pub fn get_by_id(conn: &mut PgConnection, ticket: Uuid) -> Result<Ticket, QueueError> {
    queue_tickets::table
        .find(ticket)
        .first(conn)
        .optional()?
        .ok_or(QueueError::NotFound("ticket"))
}

/// Looks a ticket up by its printed number, scoped to the current day since
/// numbers restart every morning.
pub fn get_by_number(
    conn: &mut PgConnection,
    settings: &EngineSettings,
    number: i32,
) -> Result<Ticket, QueueError> {
    let (day_start, day_end) = service_day_bounds(settings.timezone_offset_minutes);
    queue_tickets::table
        .filter(queue_tickets::queue_number.eq(number))
        .filter(queue_tickets::created_at.ge(day_start))
        .filter(queue_tickets::created_at.lt(day_end))
        .first(conn)
        .optional()?
        .ok_or(QueueError::NotFound("ticket"))
}

pub fn list_waiting(
    conn: &mut PgConnection,
    settings: &EngineSettings,
) -> Result<Vec<Ticket>, QueueError> {
    let (day_start, day_end) = service_day_bounds(settings.timezone_offset_minutes);
    Ok(queue_tickets::table
        .filter(queue_tickets::status.eq(TicketStatus::Waiting.as_str()))
        .filter(queue_tickets::created_at.ge(day_start))
        .filter(queue_tickets::created_at.lt(day_end))
        .order((
            queue_tickets::created_at.asc(),
            queue_tickets::queue_number.asc(),
        ))
        .load(conn)?)
}

pub fn list_in_progress(
    conn: &mut PgConnection,
    settings: &EngineSettings,
) -> Result<Vec<Ticket>, QueueError> {
    let (day_start, day_end) = service_day_bounds(settings.timezone_offset_minutes);
    Ok(queue_tickets::table
        .filter(queue_tickets::status.eq(TicketStatus::InProgress.as_str()))
        .filter(queue_tickets::created_at.ge(day_start))
        .filter(queue_tickets::created_at.lt(day_end))
        .order(queue_tickets::called_at.asc())
        .load(conn)?)
}

/// All of today's tickets, for the analytics aggregations.
pub fn list_today(
    conn: &mut PgConnection,
    settings: &EngineSettings,
) -> Result<Vec<Ticket>, QueueError> {
    let (day_start, day_end) = service_day_bounds(settings.timezone_offset_minutes);
    Ok(queue_tickets::table
        .filter(queue_tickets::created_at.ge(day_start))
        .filter(queue_tickets::created_at.lt(day_end))
        .order(queue_tickets::created_at.asc())
        .load(conn)?)
}

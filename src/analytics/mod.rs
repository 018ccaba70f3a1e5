//! Read-only daily aggregates for the staff dashboard. A day's queue is a
//! few hundred rows at most, so the folds run in Rust over today's tickets
//! rather than pushing aggregation into SQL.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::queue::engine::{self, EngineSettings};
use crate::shared::error::QueueError;
use crate::shared::models::{Ticket, TicketStatus};
use crate::shared::state::AppState;
use crate::shared::utils::run_blocking;

#[derive(Debug, Serialize)]
pub struct TodayStats {
    pub total: i64,
    pub waiting: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub cancelled: i64,
    /// Average minutes from registration to completion, completed tickets only.
    pub avg_service_minutes: Option<f64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HourlyBucket {
    pub hour: u32,
    pub count: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TypeBucket {
    pub transaction_type: String,
    pub count: i64,
}

pub fn today_stats(tickets: &[Ticket]) -> TodayStats {
    let mut stats = TodayStats {
        total: tickets.len() as i64,
        waiting: 0,
        in_progress: 0,
        completed: 0,
        cancelled: 0,
        avg_service_minutes: None,
    };

    let mut service_minutes = Vec::new();
    for ticket in tickets {
        match ticket.status() {
            Some(TicketStatus::Waiting) => stats.waiting += 1,
            Some(TicketStatus::InProgress) => stats.in_progress += 1,
            Some(TicketStatus::Completed) => {
                stats.completed += 1;
                if let Some(completed_at) = ticket.completed_at {
                    let elapsed = completed_at - ticket.created_at;
                    service_minutes.push(elapsed.num_seconds() as f64 / 60.0);
                }
            }
            Some(TicketStatus::Cancelled) => stats.cancelled += 1,
            None => {}
        }
    }
    if !service_minutes.is_empty() {
        stats.avg_service_minutes =
            Some(service_minutes.iter().sum::<f64>() / service_minutes.len() as f64);
    }
    stats
}

/// Registrations per local wall-clock hour.
pub fn hourly_distribution(tickets: &[Ticket], offset_minutes: i32) -> Vec<HourlyBucket> {
    let offset = Duration::minutes(i64::from(offset_minutes));
    let mut counts: BTreeMap<u32, i64> = BTreeMap::new();
    for ticket in tickets {
        let hour = (ticket.created_at + offset).hour();
        *counts.entry(hour).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(hour, count)| HourlyBucket { hour, count })
        .collect()
}

pub fn transaction_breakdown(tickets: &[Ticket]) -> Vec<TypeBucket> {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for ticket in tickets {
        *counts.entry(ticket.transaction_type.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(transaction_type, count)| TypeBucket {
            transaction_type: transaction_type.to_string(),
            count,
        })
        .collect()
}

pub async fn today(State(state): State<Arc<AppState>>) -> Result<Json<TodayStats>, QueueError> {
    let settings = EngineSettings::from(&state.config.queue);
    let stats = run_blocking(state.conn.clone(), move |conn| {
        Ok(today_stats(&engine::list_today(conn, &settings)?))
    })
    .await?;
    Ok(Json(stats))
}

pub async fn hourly(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HourlyBucket>>, QueueError> {
    let settings = EngineSettings::from(&state.config.queue);
    let offset = settings.timezone_offset_minutes;
    let buckets = run_blocking(state.conn.clone(), move |conn| {
        Ok(hourly_distribution(
            &engine::list_today(conn, &settings)?,
            offset,
        ))
    })
    .await?;
    Ok(Json(buckets))
}

pub async fn breakdown(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TypeBucket>>, QueueError> {
    let settings = EngineSettings::from(&state.config.queue);
    let buckets = run_blocking(state.conn.clone(), move |conn| {
        Ok(transaction_breakdown(&engine::list_today(conn, &settings)?))
    })
    .await?;
    Ok(Json(buckets))
}

pub fn configure_analytics_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/analytics/today", get(today))
        .route("/api/analytics/hourly", get(hourly))
        .route("/api/analytics/breakdown", get(breakdown))
}

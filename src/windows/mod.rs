//! Service window registry: staff toggle windows on and off, restrict which
//! services a window handles, and pull the next ticket. Disabling a service
//! or deactivating a window only affects future call-next matching; tickets
//! already being served stay where they are.

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::events::ChangeEvent;
use crate::queue::engine::{self, EngineSettings};
use crate::shared::error::QueueError;
use crate::shared::models::{ServiceWindow, Ticket, TransactionType};
use crate::shared::schema::service_windows;
use crate::shared::state::AppState;
use crate::shared::utils::run_blocking;

/// Window as shown to staff and the board: registry row plus the tickets it
/// is currently serving. `current` is the head of that set, kept for
/// single-slot displays.
#[derive(Debug, Serialize)]
pub struct WindowView {
    #[serde(flatten)]
    pub window: ServiceWindow,
    pub in_progress: Vec<Ticket>,
    pub current: Option<Ticket>,
}

#[derive(Debug, Deserialize)]
pub struct SetServicesRequest {
    pub disabled_services: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CallNextRequest {
    pub transaction_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallNextResponse {
    pub ticket: Option<Ticket>,
}

/// Ensures windows numbered `1..=count` exist. Existing rows, including
/// their active flags and disabled services, are left alone.
pub fn seed_windows(conn: &mut PgConnection, count: i32) -> Result<(), QueueError> {
    for number in 1..=count {
        let window = ServiceWindow {
            id: Uuid::new_v4(),
            window_number: number,
            is_active: true,
            disabled_services: Vec::new(),
            created_at: Utc::now(),
        };
        diesel::insert_into(service_windows::table)
            .values(&window)
            .on_conflict(service_windows::window_number)
            .do_nothing()
            .execute(conn)?;
    }
    info!("ensured {count} service windows exist");
    Ok(())
}

fn load_window(conn: &mut PgConnection, id: Uuid) -> Result<ServiceWindow, QueueError> {
    service_windows::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or(QueueError::NotFound("window"))
}

/// Flips the active flag. Negated in the database itself so concurrent
/// toggles each flip the flag instead of racing on a stale read.
pub fn toggle_window(conn: &mut PgConnection, id: Uuid) -> Result<ServiceWindow, QueueError> {
    let updated: Option<ServiceWindow> = diesel::update(service_windows::table.find(id))
        .set(service_windows::is_active.eq(diesel::dsl::not(service_windows::is_active)))
        .get_result(conn)
        .optional()?;
    updated.ok_or(QueueError::NotFound("window"))
}

pub async fn list_windows(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WindowView>>, QueueError> {
    let settings = EngineSettings::from(&state.config.queue);

    let views = run_blocking(state.conn.clone(), move |conn| {
        let windows: Vec<ServiceWindow> = service_windows::table
            .order(service_windows::window_number.asc())
            .load(conn)?;

        let mut by_window: HashMap<Uuid, Vec<Ticket>> = HashMap::new();
        for ticket in engine::list_in_progress(conn, &settings)? {
            if let Some(w) = ticket.window_id {
                by_window.entry(w).or_default().push(ticket);
            }
        }

        Ok(windows
            .into_iter()
            .map(|window| {
                let in_progress = by_window.remove(&window.id).unwrap_or_default();
                let current = in_progress.first().cloned();
                WindowView {
                    window,
                    in_progress,
                    current,
                }
            })
            .collect())
    })
    .await?;
    Ok(Json(views))
}

pub async fn toggle_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceWindow>, QueueError> {
    let window = run_blocking(state.conn.clone(), move |conn| {
        let updated = toggle_window(conn, id)?;
        info!(
            "window {} is now {}",
            updated.window_number,
            if updated.is_active { "active" } else { "inactive" }
        );
        Ok(updated)
    })
    .await?;

    state
        .events
        .publish(ChangeEvent::WindowUpdated { id: window.id });
    Ok(Json(window))
}

pub async fn set_disabled_services(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetServicesRequest>,
) -> Result<Json<ServiceWindow>, QueueError> {
    for service in &req.disabled_services {
        if TransactionType::parse(service).is_none() {
            return Err(QueueError::validation(format!(
                "unknown transaction type: {service}"
            )));
        }
    }

    let window = run_blocking(state.conn.clone(), move |conn| {
        load_window(conn, id)?;
        let updated: ServiceWindow = diesel::update(service_windows::table.find(id))
            .set(service_windows::disabled_services.eq(&req.disabled_services))
            .get_result(conn)?;
        Ok(updated)
    })
    .await?;

    state
        .events
        .publish(ChangeEvent::WindowUpdated { id: window.id });
    Ok(Json(window))
}

/// Pulls the oldest eligible waiting ticket to this window. An empty result
/// is a normal outcome: nothing waiting, window inactive, or at capacity.
pub async fn call_next(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    req: Option<Json<CallNextRequest>>,
) -> Result<Json<CallNextResponse>, QueueError> {
    let Json(req) = req.unwrap_or_default();
    let filter = match req.transaction_type.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            TransactionType::parse(raw)
                .ok_or_else(|| QueueError::validation("invalid transaction type"))?,
        ),
    };

    let settings = EngineSettings::from(&state.config.queue);
    let ticket = run_blocking(state.conn.clone(), move |conn| {
        engine::call_next(conn, &settings, id, filter)
    })
    .await?;

    if let Some(ticket) = &ticket {
        state.events.publish(ChangeEvent::TicketCalled {
            id: ticket.id,
            window_id: id,
        });
    }
    Ok(Json(CallNextResponse { ticket }))
}

pub fn configure_window_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/windows", get(list_windows))
        .route("/api/windows/:id/toggle", post(toggle_active))
        .route("/api/windows/:id/services", put(set_disabled_services))
        .route("/api/windows/:id/call-next", post(call_next))
}

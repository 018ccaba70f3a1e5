pub mod counter;
pub mod engine;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::events::ChangeEvent;
use crate::queue::engine::EngineSettings;
use crate::shared::error::QueueError;
use crate::shared::models::{ServiceWindow, Ticket, TicketStatus};
use crate::shared::state::AppState;
use crate::shared::utils::run_blocking;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub student_name: String,
    pub transaction_type: String,
    pub student_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub position: i64,
}

/// Outcome of complete/cancel. `success: false` means the ticket was not in
/// the required state; already handled, not an error.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<Ticket>,
}

/// One now-serving entry on the public board.
#[derive(Debug, Serialize)]
pub struct ServingEntry {
    pub queue_number: i32,
    pub student_name: String,
    pub transaction_type: String,
    pub window_number: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct DisplayBoard {
    pub serving: Vec<ServingEntry>,
    pub waiting: Vec<Ticket>,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Ticket>), QueueError> {
    if !state.rate_limiter.check(addr.ip()) {
        return Err(QueueError::RateLimited);
    }

    let registration = engine::validate_registration(
        &req.student_name,
        &req.transaction_type,
        req.student_id.as_deref(),
    )?;
    let settings = EngineSettings::from(&state.config.queue);

    let ticket = run_blocking(state.conn.clone(), move |conn| {
        engine::create_ticket(conn, &settings, &registration)
    })
    .await?;

    state.events.publish(ChangeEvent::TicketCreated {
        id: ticket.id,
        queue_number: ticket.queue_number,
    });
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Ticket>>, QueueError> {
    let settings = EngineSettings::from(&state.config.queue);
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            TicketStatus::parse(raw)
                .ok_or_else(|| QueueError::validation("unknown status filter"))?,
        ),
    };

    let tickets = run_blocking(state.conn.clone(), move |conn| match status {
        Some(TicketStatus::Waiting) => engine::list_waiting(conn, &settings),
        Some(TicketStatus::InProgress) => engine::list_in_progress(conn, &settings),
        Some(other) => Ok(engine::list_today(conn, &settings)?
            .into_iter()
            .filter(|t| t.status() == Some(other))
            .collect()),
        None => engine::list_today(conn, &settings),
    })
    .await?;
    Ok(Json(tickets))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, QueueError> {
    let ticket = run_blocking(state.conn.clone(), move |conn| engine::get_by_id(conn, id)).await?;
    Ok(Json(ticket))
}

pub async fn get_ticket_by_number(
    State(state): State<Arc<AppState>>,
    Path(number): Path<i32>,
) -> Result<Json<Ticket>, QueueError> {
    let settings = EngineSettings::from(&state.config.queue);
    let ticket = run_blocking(state.conn.clone(), move |conn| {
        engine::get_by_number(conn, &settings, number)
    })
    .await?;
    Ok(Json(ticket))
}

pub async fn queue_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PositionResponse>, QueueError> {
    let settings = EngineSettings::from(&state.config.queue);
    let position = run_blocking(state.conn.clone(), move |conn| {
        engine::queue_position(conn, &settings, id)
    })
    .await?;
    Ok(Json(PositionResponse { position }))
}

pub async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, QueueError> {
    let cancelled =
        run_blocking(state.conn.clone(), move |conn| engine::cancel(conn, id)).await?;

    match cancelled {
        Some(ticket) => {
            state
                .events
                .publish(ChangeEvent::TicketCancelled { id: ticket.id });
            Ok(Json(ActionResponse {
                success: true,
                ticket: Some(ticket),
            }))
        }
        None => Ok(Json(ActionResponse {
            success: false,
            ticket: None,
        })),
    }
}

pub async fn complete_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, QueueError> {
    let completed =
        run_blocking(state.conn.clone(), move |conn| engine::complete(conn, id)).await?;

    match completed {
        Some((ticket, window_id)) => {
            state.events.publish(ChangeEvent::TicketCompleted {
                id: ticket.id,
                window_id,
            });
            Ok(Json(ActionResponse {
                success: true,
                ticket: Some(ticket),
            }))
        }
        None => Ok(Json(ActionResponse {
            success: false,
            ticket: None,
        })),
    }
}

/// Everything the public board shows in one fetch: who is being served at
/// which window, and the waiting line in call order.
pub async fn display_board(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DisplayBoard>, QueueError> {
    let settings = EngineSettings::from(&state.config.queue);

    let board = run_blocking(state.conn.clone(), move |conn| {
        use crate::shared::schema::service_windows;
        use diesel::prelude::*;

        let serving = engine::list_in_progress(conn, &settings)?;
        let waiting = engine::list_waiting(conn, &settings)?;
        let windows: Vec<ServiceWindow> = service_windows::table
            .order(service_windows::window_number.asc())
            .load(conn)?;
        let numbers: HashMap<Uuid, i32> =
            windows.iter().map(|w| (w.id, w.window_number)).collect();

        let serving = serving
            .into_iter()
            .map(|t| ServingEntry {
                queue_number: t.queue_number,
                student_name: t.student_name,
                transaction_type: t.transaction_type,
                window_number: t.window_id.and_then(|w| numbers.get(&w).copied()),
            })
            .collect();

        Ok(DisplayBoard { serving, waiting })
    })
    .await?;
    Ok(Json(board))
}

pub fn configure_queue_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/queue", get(list_tickets).post(register))
        .route("/api/queue/:id", get(get_ticket))
        .route("/api/queue/number/:number", get(get_ticket_by_number))
        .route("/api/queue/:id/position", get(queue_position))
        .route("/api/queue/:id/cancel", post(cancel_ticket))
        .route("/api/queue/:id/complete", post(complete_ticket))
        .route("/api/display", get(display_board))
}

//! Post-service feedback: one rating per completed ticket, with a keyword
//! sentiment read over the free-text comment. The heavy classifier stays on
//! the client; this heuristic is what the dashboard aggregates run on.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::events::ChangeEvent;
use crate::shared::error::QueueError;
use crate::shared::models::{Feedback, TicketStatus};
use crate::shared::schema::{queue_feedback, queue_tickets};
use crate::shared::state::AppState;
use crate::shared::utils::{run_blocking, service_day_bounds};

const POSITIVE_WORDS: &[&str] = &[
    "thanks", "thank", "great", "good", "fast", "quick", "helpful", "friendly", "excellent",
    "smooth", "easy", "mabilis", "salamat",
];

const NEGATIVE_WORDS: &[&str] = &[
    "slow", "bad", "rude", "problem", "issue", "waited", "waiting", "long", "terrible", "worst",
    "unhelpful", "confusing", "mabagal",
];

/// Keyword sentiment over a comment: label plus a 0..=1 score where 1 is
/// fully positive. No hits reads as neutral at 0.5.
pub fn analyze_sentiment(text: &str) -> (&'static str, f64) {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let positive = words
        .iter()
        .filter(|w| POSITIVE_WORDS.contains(*w))
        .count() as f64;
    let negative = words
        .iter()
        .filter(|w| NEGATIVE_WORDS.contains(*w))
        .count() as f64;

    if positive == 0.0 && negative == 0.0 {
        return ("neutral", 0.5);
    }
    let score = positive / (positive + negative);
    if score > 0.5 {
        ("positive", score)
    } else if score < 0.5 {
        ("negative", score)
    } else {
        ("neutral", score)
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitFeedbackRequest {
    pub queue_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackSummary {
    pub total_feedback: i64,
    pub average_rating: Option<f64>,
    pub positive: i64,
    pub neutral: i64,
    pub negative: i64,
}

/// Feedback joined with the ticket it rates, for the dashboard list.
#[derive(Debug, Serialize)]
pub struct FeedbackEntry {
    #[serde(flatten)]
    pub feedback: Feedback,
    pub queue_number: i32,
    pub transaction_type: String,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SentimentBucket {
    pub sentiment: String,
    pub count: i64,
}

pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitFeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), QueueError> {
    if !(1..=5).contains(&req.rating) {
        return Err(QueueError::validation("rating must be between 1 and 5"));
    }
    let comment = req
        .comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let feedback = run_blocking(state.conn.clone(), move |conn| {
        let ticket_status: Option<String> = queue_tickets::table
            .find(req.queue_id)
            .select(queue_tickets::status)
            .first(conn)
            .optional()?;
        let Some(ticket_status) = ticket_status else {
            return Err(QueueError::NotFound("ticket"));
        };
        if TicketStatus::parse(&ticket_status) != Some(TicketStatus::Completed) {
            return Err(QueueError::conflict(
                "feedback is only accepted for completed tickets",
            ));
        }

        let (sentiment, score) = match &comment {
            Some(text) => {
                let (label, score) = analyze_sentiment(text);
                (Some(label.to_string()), Some(score))
            }
            None => (None, None),
        };

        let feedback = Feedback {
            id: Uuid::new_v4(),
            queue_id: req.queue_id,
            rating: req.rating,
            comment,
            sentiment,
            sentiment_score: score,
            created_at: Utc::now(),
        };
        let inserted = diesel::insert_into(queue_feedback::table)
            .values(&feedback)
            .execute(conn);
        match inserted {
            Ok(_) => Ok(feedback),
            // One row per ticket; a concurrent duplicate loses here.
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Err(
                QueueError::conflict("feedback was already submitted for this ticket"),
            ),
            Err(e) => Err(e.into()),
        }
    })
    .await?;

    state.events.publish(ChangeEvent::FeedbackReceived {
        queue_id: feedback.queue_id,
    });
    Ok((StatusCode::CREATED, Json(feedback)))
}

pub async fn get_feedback_for_ticket(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Feedback>, QueueError> {
    let feedback = run_blocking(state.conn.clone(), move |conn| {
        queue_feedback::table
            .filter(queue_feedback::queue_id.eq(queue_id))
            .first(conn)
            .optional()?
            .ok_or(QueueError::NotFound("feedback"))
    })
    .await?;
    Ok(Json(feedback))
}

pub async fn feedback_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FeedbackSummary>, QueueError> {
    let offset = state.config.queue.timezone_offset_minutes;

    let summary = run_blocking(state.conn.clone(), move |conn| {
        let (day_start, day_end) = service_day_bounds(offset);
        let ratings: Vec<i32> = queue_feedback::table
            .filter(queue_feedback::created_at.ge(day_start))
            .filter(queue_feedback::created_at.lt(day_end))
            .select(queue_feedback::rating)
            .load(conn)?;
        Ok(summarize_ratings(&ratings))
    })
    .await?;
    Ok(Json(summary))
}

pub async fn recent_feedback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<FeedbackEntry>>, QueueError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);

    let entries = run_blocking(state.conn.clone(), move |conn| {
        let rows: Vec<(Feedback, i32, String)> = queue_feedback::table
            .inner_join(queue_tickets::table)
            .select((
                Feedback::as_select(),
                queue_tickets::queue_number,
                queue_tickets::transaction_type,
            ))
            .order(queue_feedback::created_at.desc())
            .limit(limit)
            .load(conn)?;
        Ok(rows
            .into_iter()
            .map(|(feedback, queue_number, transaction_type)| FeedbackEntry {
                feedback,
                queue_number,
                transaction_type,
            })
            .collect())
    })
    .await?;
    Ok(Json(entries))
}

pub async fn sentiment_distribution(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SentimentBucket>>, QueueError> {
    let offset = state.config.queue.timezone_offset_minutes;

    let buckets = run_blocking(state.conn.clone(), move |conn| {
        let (day_start, day_end) = service_day_bounds(offset);
        let sentiments: Vec<Option<String>> = queue_feedback::table
            .filter(queue_feedback::created_at.ge(day_start))
            .filter(queue_feedback::created_at.lt(day_end))
            .select(queue_feedback::sentiment)
            .load(conn)?;

        let mut counts = std::collections::BTreeMap::new();
        for sentiment in sentiments.into_iter().flatten() {
            *counts.entry(sentiment).or_insert(0i64) += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(sentiment, count)| SentimentBucket { sentiment, count })
            .collect())
    })
    .await?;
    Ok(Json(buckets))
}

/// Rating buckets follow the dashboard's convention: 4-5 positive, 3
/// neutral, 1-2 negative.
fn summarize_ratings(ratings: &[i32]) -> FeedbackSummary {
    let total = ratings.len() as i64;
    let average = if ratings.is_empty() {
        None
    } else {
        Some(ratings.iter().map(|r| f64::from(*r)).sum::<f64>() / ratings.len() as f64)
    };
    FeedbackSummary {
        total_feedback: total,
        average_rating: average,
        positive: ratings.iter().filter(|r| **r >= 4).count() as i64,
        neutral: ratings.iter().filter(|r| **r == 3).count() as i64,
        negative: ratings.iter().filter(|r| **r <= 2).count() as i64,
    }
}

pub fn configure_feedback_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/feedback", post(submit_feedback))
        .route("/api/feedback/summary", get(feedback_summary))
        .route("/api/feedback/recent", get(recent_feedback))
        .route("/api/feedback/sentiment", get(sentiment_distribution))
        .route("/api/feedback/ticket/:queue_id", get(get_feedback_for_ticket))
}

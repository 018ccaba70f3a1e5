use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::schema::{queue_feedback, queue_tickets, service_windows};

/// Service categories the registrar offers. Fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    GradeRequest,
    Enrollment,
    DocumentRequest,
    Payment,
    Clearance,
    Other,
}

impl TransactionType {
    pub const ALL: [TransactionType; 6] = [
        TransactionType::GradeRequest,
        TransactionType::Enrollment,
        TransactionType::DocumentRequest,
        TransactionType::Payment,
        TransactionType::Clearance,
        TransactionType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::GradeRequest => "grade_request",
            TransactionType::Enrollment => "enrollment",
            TransactionType::DocumentRequest => "document_request",
            TransactionType::Payment => "payment",
            TransactionType::Clearance => "clearance",
            TransactionType::Other => "other",
        }
    }

    /// Display label as shown on the board and printed tickets.
    pub fn label(&self) -> &'static str {
        match self {
            TransactionType::GradeRequest => "Grade Request",
            TransactionType::Enrollment => "Enrollment",
            TransactionType::DocumentRequest => "Document Request",
            TransactionType::Payment => "Payment",
            TransactionType::Clearance => "Clearance",
            TransactionType::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Option<TransactionType> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }
}

/// Ticket lifecycle. Created as `Waiting`; `InProgress` only via call-next;
/// `Completed` only from `InProgress`; `Cancelled` only from `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Waiting => "waiting",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Completed => "completed",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<TicketStatus> {
        match value {
            "waiting" => Some(TicketStatus::Waiting),
            "in_progress" => Some(TicketStatus::InProgress),
            "completed" => Some(TicketStatus::Completed),
            "cancelled" => Some(TicketStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable, Identifiable)]
#[diesel(table_name = queue_tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub queue_number: i32,
    pub student_name: String,
    pub student_id: Option<String>,
    pub transaction_type: String,
    pub status: String,
    pub window_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn status(&self) -> Option<TicketStatus> {
        TicketStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable, Identifiable)]
#[diesel(table_name = service_windows)]
pub struct ServiceWindow {
    pub id: Uuid,
    pub window_number: i32,
    pub is_active: bool,
    pub disabled_services: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable, Identifiable)]
#[diesel(table_name = queue_feedback)]
pub struct Feedback {
    pub id: Uuid,
    pub queue_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub sentiment: Option<String>,
    pub sentiment_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_type_round_trips() {
        for t in TransactionType::ALL {
            assert_eq!(TransactionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TransactionType::parse("cafeteria"), None);
        assert_eq!(TransactionType::parse("Grade Request"), None);
    }

    #[test]
    fn transaction_type_labels() {
        assert_eq!(TransactionType::GradeRequest.label(), "Grade Request");
        assert_eq!(TransactionType::DocumentRequest.label(), "Document Request");
    }

    #[test]
    fn status_round_trips() {
        for s in [
            TicketStatus::Waiting,
            TicketStatus::InProgress,
            TicketStatus::Completed,
            TicketStatus::Cancelled,
        ] {
            assert_eq!(TicketStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TicketStatus::parse("abandoned"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(TicketStatus::Completed.is_terminal());
        assert!(TicketStatus::Cancelled.is_terminal());
        assert!(!TicketStatus::Waiting.is_terminal());
        assert!(!TicketStatus::InProgress.is_terminal());
    }
}

//! Categories and typed payloads for the events the ledger application emits.
//!
//! Request handlers build one of these payloads and call
//! [`DomainEvent::into_event`]; the worker only ever sees the resulting
//! opaque [`Event`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::model::Event;

pub const HEALTH_REQUEST: &str = "health_request";
pub const USER_LOGGED_IN: &str = "user.logged_in";
pub const USER_REGISTERED: &str = "user.registered";
pub const USER_NAME_UPDATED: &str = "user.name_updated";
pub const USER_AVATAR_UPDATED: &str = "user.avatar_updated";
pub const LEDGER_CREATED: &str = "ledger.created";
pub const LEDGER_EXPENSE_ADDED: &str = "ledger.expense_added";
pub const LEDGER_MANUALLY_CORRECTED: &str = "ledger.manually_corrected";

/// Every category in the catalog.
pub const ALL: &[&str] = &[
    HEALTH_REQUEST,
    USER_LOGGED_IN,
    USER_REGISTERED,
    USER_NAME_UPDATED,
    USER_AVATAR_UPDATED,
    LEDGER_CREATED,
    LEDGER_EXPENSE_ADDED,
    LEDGER_MANUALLY_CORRECTED,
];

/// A typed payload bound to a fixed category.
pub trait DomainEvent: Serialize {
    const CATEGORY: &'static str;

    fn into_event(&self) -> Result<Event> {
        Event::from_payload(Self::CATEGORY, self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRequested {
    pub message: String,
    pub http_status: u16,
}

impl DomainEvent for HealthRequested {
    const CATEGORY: &'static str = HEALTH_REQUEST;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLoggedIn {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
}

impl DomainEvent for UserLoggedIn {
    const CATEGORY: &'static str = USER_LOGGED_IN;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
}

impl DomainEvent for UserRegistered {
    const CATEGORY: &'static str = USER_REGISTERED;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNameUpdated {
    pub user_id: Uuid,
    pub name: String,
}

impl DomainEvent for UserNameUpdated {
    const CATEGORY: &'static str = USER_NAME_UPDATED;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAvatarUpdated {
    pub user_id: Uuid,
    /// Original filename of the uploaded image.
    pub file: String,
}

impl DomainEvent for UserAvatarUpdated {
    const CATEGORY: &'static str = USER_AVATAR_UPDATED;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCreated {
    pub ledger_id: Uuid,
    pub name: String,
    pub members: Vec<Uuid>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl DomainEvent for LedgerCreated {
    const CATEGORY: &'static str = LEDGER_CREATED;
}

/// How an expense is divided among ledger members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareType {
    Equal,
    Percentage,
    Exact,
}

/// One member's portion of an expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub user_id: Uuid,
    /// 0 to 100.
    pub percentage: f64,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseAdded {
    pub ledger_id: Uuid,
    pub paid_by_user_id: Uuid,
    pub amount_cents: i64,
    pub description: String,
    /// Spending category such as "groceries" or "rent", unrelated to the
    /// event category.
    pub category: String,
    pub date: DateTime<Utc>,
    pub share_type: ShareType,
    pub currency: String,
    pub splits: Vec<Split>,
}

impl DomainEvent for ExpenseAdded {
    const CATEGORY: &'static str = LEDGER_EXPENSE_ADDED;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManuallyCorrected {
    pub ledger_id: Uuid,
    pub made_by_user_id: Uuid,
    pub reason: String,
}

impl DomainEvent for ManuallyCorrected {
    const CATEGORY: &'static str = LEDGER_MANUALLY_CORRECTED;
}

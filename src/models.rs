use crate::addons::AddOn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ============ Lead ============

/// Purchase status of a lead. Once `Paid`, a lead never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    PendingPayment,
    Paid,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::PendingPayment => "pending_payment",
            LeadStatus::Paid => "paid",
        }
    }

    /// Parses the stored representation. Anything other than `paid` is pending.
    pub fn from_db(value: &str) -> Self {
        match value {
            "paid" => LeadStatus::Paid,
            _ => LeadStatus::PendingPayment,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, LeadStatus::Paid)
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One customer's purchase intent and outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    /// Always lower-cased.
    pub email: String,
    pub name: String,
    pub birth_date: String,
    pub question: String,
    pub status: LeadStatus,
    /// Add-ons confirmed by payment notifications.
    pub selected_bumps: BTreeSet<AddOn>,
    /// Add-ons ticked in the funnel before paying. Never unlocks content.
    pub requested_bumps: BTreeSet<AddOn>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Result of merging a confirmed payment into a lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdate {
    /// Full add-on set to persist.
    pub bumps: BTreeSet<AddOn>,
    /// Add-ons this confirmation contributed that were not recorded before.
    pub added: BTreeSet<AddOn>,
    /// The lead was pending before this confirmation.
    pub newly_paid: bool,
}

impl PaymentUpdate {
    /// Nothing would change if this update were written.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && !self.newly_paid
    }
}

impl Lead {
    /// Merges add-ons detected on a confirmed payment.
    ///
    /// The stored set only ever grows, and the status always ends up `Paid`.
    pub fn confirm_payment(&self, detected: &BTreeSet<AddOn>) -> PaymentUpdate {
        let added: BTreeSet<AddOn> = detected
            .difference(&self.selected_bumps)
            .copied()
            .collect();
        let bumps = self.selected_bumps.union(detected).copied().collect();

        PaymentUpdate {
            bumps,
            added,
            newly_paid: !self.status.is_paid(),
        }
    }

    pub fn profile(&self) -> LeadProfile {
        LeadProfile {
            name: self.name.clone(),
            birth_date: self.birth_date.clone(),
            question: self.question.clone(),
        }
    }

    pub fn has_bump(&self, addon: AddOn) -> bool {
        self.selected_bumps.contains(&addon)
    }
}

/// User-supplied profile fields fed into reading generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadProfile {
    pub name: String,
    pub birth_date: String,
    pub question: String,
}

/// Lower-cases and trims an email so every lookup uses the same key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============ API Request/Response Models ============

/// Body of `POST /api/leads`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRegistration {
    pub name: String,
    pub email: String,
    #[serde(rename = "birthDate", alias = "birth_date", default)]
    pub birth_date: String,
    #[serde(default)]
    pub question: String,
    #[serde(rename = "selectedBumps", alias = "selected_bumps", default)]
    pub selected_bumps: Vec<AddOn>,
}

/// Acknowledgement returned by `POST /api/leads`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationResponse {
    pub success: bool,
    pub status: PaymentState,
    #[serde(rename = "leadId", default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<Uuid>,
}

/// Payment state as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Paid,
}

impl From<LeadStatus> for PaymentState {
    fn from(status: LeadStatus) -> Self {
        match status {
            LeadStatus::PendingPayment => PaymentState::Pending,
            LeadStatus::Paid => PaymentState::Paid,
        }
    }
}

/// Body of `GET /api/payment/status/:email`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub status: PaymentState,
    #[serde(default)]
    pub bumps: Vec<AddOn>,
}

impl StatusResponse {
    pub fn pending() -> Self {
        Self {
            status: PaymentState::Pending,
            bumps: Vec::new(),
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentState::Paid
    }

    pub fn has_bump(&self, addon: AddOn) -> bool {
        self.bumps.contains(&addon)
    }
}

impl From<&Lead> for StatusResponse {
    fn from(lead: &Lead) -> Self {
        Self {
            status: lead.status.into(),
            bumps: lead.selected_bumps.iter().copied().collect(),
        }
    }
}

/// Body of `POST /api/readings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingQuery {
    #[serde(default)]
    pub email: Option<String>,
}

/// A drawn tarot card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub name: String,
    pub meaning: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Body returned by `POST /api/readings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingResponse {
    pub cards: Vec<Card>,
    pub reading: String,
    /// Confirmed add-ons the reading was generated with.
    #[serde(default)]
    pub bumps: Vec<AddOn>,
}

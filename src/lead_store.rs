//! Persistent lead records keyed by email.

use crate::addons::AddOn;
use crate::errors::AppError;
use crate::models::{normalize_email, Lead, LeadRegistration, LeadStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage for leads.
///
/// Emails are normalised by callers and implementations alike. There is no
/// operation that moves a lead back to `pending_payment`.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Creates a new `pending_payment` lead.
    async fn insert_pending(&self, registration: &LeadRegistration) -> Result<Lead, AppError>;

    /// Most recently created lead for the email.
    async fn latest_for_email(&self, email: &str) -> Result<Option<Lead>, AppError>;

    /// Marks the lead paid and stores its full confirmed add-on set.
    async fn record_payment(&self, lead_id: Uuid, bumps: &BTreeSet<AddOn>)
        -> Result<Lead, AppError>;

    /// Creates a lead that is already paid (payment arrived before any registration).
    async fn insert_paid(
        &self,
        email: &str,
        name: &str,
        bumps: &BTreeSet<AddOn>,
    ) -> Result<Lead, AppError>;
}

/// In-process lead store used in tests and when no database is configured.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: RwLock<Vec<Lead>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored lead, oldest first.
    pub async fn all(&self) -> Vec<Lead> {
        self.leads.read().await.clone()
    }

    /// Stores a lead as-is. Useful for seeding fixtures.
    pub async fn put(&self, lead: Lead) {
        self.leads.write().await.push(lead);
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn insert_pending(&self, registration: &LeadRegistration) -> Result<Lead, AppError> {
        let lead = Lead {
            id: Uuid::new_v4(),
            email: normalize_email(&registration.email),
            name: registration.name.trim().to_string(),
            birth_date: registration.birth_date.trim().to_string(),
            question: registration.question.trim().to_string(),
            status: LeadStatus::PendingPayment,
            selected_bumps: BTreeSet::new(),
            requested_bumps: registration.selected_bumps.iter().copied().collect(),
            created_at: Utc::now(),
            paid_at: None,
        };
        self.leads.write().await.push(lead.clone());
        Ok(lead)
    }

    async fn latest_for_email(&self, email: &str) -> Result<Option<Lead>, AppError> {
        let email = normalize_email(email);
        let leads = self.leads.read().await;
        // Later insertions win ties on created_at.
        Ok(leads
            .iter()
            .enumerate()
            .filter(|(_, lead)| lead.email == email)
            .max_by_key(|(idx, lead)| (lead.created_at, *idx))
            .map(|(_, lead)| lead.clone()))
    }

    async fn record_payment(
        &self,
        lead_id: Uuid,
        bumps: &BTreeSet<AddOn>,
    ) -> Result<Lead, AppError> {
        let mut leads = self.leads.write().await;
        let lead = leads
            .iter_mut()
            .find(|lead| lead.id == lead_id)
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;

        lead.status = LeadStatus::Paid;
        lead.selected_bumps = bumps.clone();
        lead.paid_at.get_or_insert_with(Utc::now);
        Ok(lead.clone())
    }

    async fn insert_paid(
        &self,
        email: &str,
        name: &str,
        bumps: &BTreeSet<AddOn>,
    ) -> Result<Lead, AppError> {
        let now = Utc::now();
        let lead = Lead {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            name: name.trim().to_string(),
            birth_date: String::new(),
            question: String::new(),
            status: LeadStatus::Paid,
            selected_bumps: bumps.clone(),
            requested_bumps: BTreeSet::new(),
            created_at: now,
            paid_at: Some(now),
        };
        self.leads.write().await.push(lead.clone());
        Ok(lead)
    }
}

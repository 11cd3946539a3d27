use crate::addons::{parse_addons, AddOn};
use crate::errors::{AppError, ResultExt};
use crate::lead_store::LeadStore;
use crate::models::{normalize_email, Lead, LeadRegistration, LeadStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::BTreeSet;
use uuid::Uuid;

const LEAD_COLUMNS: &str = "id, email, name, birth_date, question, status, selected_bumps, requested_bumps, created_at, paid_at";

/// Raw `leads` row as stored in Postgres.
#[derive(Debug, FromRow)]
struct LeadRow {
    id: Uuid,
    email: String,
    name: String,
    birth_date: String,
    question: String,
    status: String,
    selected_bumps: Vec<String>,
    requested_bumps: Vec<String>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl From<LeadRow> for Lead {
    fn from(row: LeadRow) -> Self {
        Lead {
            id: row.id,
            email: row.email,
            name: row.name,
            birth_date: row.birth_date,
            question: row.question,
            status: LeadStatus::from_db(&row.status),
            selected_bumps: parse_addons(&row.selected_bumps),
            requested_bumps: parse_addons(&row.requested_bumps),
            created_at: row.created_at,
            paid_at: row.paid_at,
        }
    }
}

fn addon_names<'a>(bumps: impl IntoIterator<Item = &'a AddOn>) -> Vec<String> {
    bumps.into_iter().map(|b| b.as_str().to_string()).collect()
}

/// Postgres-backed lead store.
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn insert_pending(&self, registration: &LeadRegistration) -> Result<Lead, AppError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            INSERT INTO leads (id, email, name, birth_date, question, status, requested_bumps)
            VALUES ($1, $2, $3, $4, $5, 'pending_payment', $6)
            RETURNING {LEAD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(normalize_email(&registration.email))
        .bind(registration.name.trim())
        .bind(registration.birth_date.trim())
        .bind(registration.question.trim())
        .bind(addon_names(&registration.selected_bumps))
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert pending lead")?;

        tracing::debug!("Stored pending lead {} for {}", row.id, row.email);
        Ok(row.into())
    }

    async fn latest_for_email(&self, email: &str) -> Result<Option<Lead>, AppError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            SELECT {LEAD_COLUMNS}
            FROM leads
            WHERE email = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load latest lead")?;

        Ok(row.map(Lead::from))
    }

    async fn record_payment(
        &self,
        lead_id: Uuid,
        bumps: &BTreeSet<AddOn>,
    ) -> Result<Lead, AppError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            UPDATE leads
            SET status = 'paid',
                selected_bumps = $2,
                paid_at = COALESCE(paid_at, now())
            WHERE id = $1
            RETURNING {LEAD_COLUMNS}
            "#
        ))
        .bind(lead_id)
        .bind(addon_names(bumps))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to record payment")?
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;

        Ok(row.into())
    }

    async fn insert_paid(
        &self,
        email: &str,
        name: &str,
        bumps: &BTreeSet<AddOn>,
    ) -> Result<Lead, AppError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            INSERT INTO leads (id, email, name, status, selected_bumps, paid_at)
            VALUES ($1, $2, $3, 'paid', $4, now())
            RETURNING {LEAD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(normalize_email(email))
        .bind(name.trim())
        .bind(addon_names(bumps))
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert paid lead")?;

        Ok(row.into())
    }
}

use crate::addons::{infer_addons, AddOn, OfferCatalog};
use crate::config::Config;
use crate::email_client::AccessMailer;
use crate::errors::{AppError, ResultExt};
use crate::lead_store::LeadStore;
use crate::models::Lead;
use crate::webhook_models::PaymentWebhook;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Why an event was acknowledged without touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingEmail,
    NotAPayment,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingEmail => f.write_str("no customer email in payload"),
            SkipReason::NotAPayment => f.write_str("not a confirmed payment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    /// Merged into an existing lead. Nothing is written when `added` is empty
    /// and the lead was already paid.
    Applied {
        lead_id: Uuid,
        bumps: BTreeSet<AddOn>,
        added: BTreeSet<AddOn>,
        newly_paid: bool,
    },
    /// No lead existed for the email; a paid one was created.
    Created {
        lead_id: Uuid,
        bumps: BTreeSet<AddOn>,
    },
}

/// Merges confirmed payments into the lead store.
///
/// Callers must serialise `apply` per email; `KeyedQueue` does that for the
/// webhook endpoint.
pub struct Reconciler {
    store: Arc<dyn LeadStore>,
    catalog: OfferCatalog,
    config: Arc<Config>,
    mailer: Option<Arc<dyn AccessMailer>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LeadStore>,
        config: Arc<Config>,
        mailer: Option<Arc<dyn AccessMailer>>,
    ) -> Self {
        Self {
            store,
            catalog: config.offer_catalog(),
            config,
            mailer,
        }
    }

    pub async fn apply(&self, event: &PaymentWebhook) -> Result<ReconcileOutcome, AppError> {
        let Some(email) = event.customer_email() else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingEmail));
        };

        if !event.is_payment_confirmed() {
            tracing::info!(
                "Ignoring webhook event {:?} for {}: not a confirmed payment",
                event.event_name(),
                email
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::NotAPayment));
        }

        let offer_id = event.offer_id();
        let detected = infer_addons(&event.product_names(), offer_id.as_deref(), &self.catalog);
        tracing::info!("💰 Payment confirmed for {} (add-ons: {:?})", email, detected);

        let existing = self
            .store
            .latest_for_email(&email)
            .await
            .with_context(|| format!("Failed to load lead for {}", email))?;

        let Some(lead) = existing else {
            let name = event.customer_name().unwrap_or_default();
            let lead = self
                .store
                .insert_paid(&email, &name, &detected)
                .await
                .with_context(|| format!("Failed to create paid lead for {}", email))?;
            tracing::warn!(
                "No lead for {}; created paid lead {} from the payment",
                email,
                lead.id
            );
            self.notify_paid(&lead);
            return Ok(ReconcileOutcome::Created {
                lead_id: lead.id,
                bumps: lead.selected_bumps,
            });
        };

        let update = lead.confirm_payment(&detected);
        if update.is_noop() {
            tracing::debug!("Lead {} already reflects this payment", lead.id);
        } else {
            let stored = self
                .store
                .record_payment(lead.id, &update.bumps)
                .await
                .with_context(|| format!("Failed to record payment for {}", email))?;
            tracing::info!(
                "✅ Lead {} updated: status={}, bumps={:?}",
                stored.id,
                stored.status,
                stored.selected_bumps
            );
            if update.newly_paid {
                self.notify_paid(&stored);
            }
        }

        Ok(ReconcileOutcome::Applied {
            lead_id: lead.id,
            bumps: update.bumps,
            added: update.added,
            newly_paid: update.newly_paid,
        })
    }

    /// Sends the access email in the background. Failures are only logged.
    fn notify_paid(&self, lead: &Lead) {
        let Some(mailer) = self.mailer.clone() else {
            tracing::debug!("Email delivery disabled, not notifying {}", lead.email);
            return;
        };

        let email = lead.email.clone();
        let name = lead.name.clone();
        let link = match self.config.access_link(&email) {
            Ok(link) => link,
            Err(e) => {
                tracing::error!("Cannot build access link for {}: {}", email, e);
                return;
            }
        };
        tokio::spawn(async move {
            if !mailer.send_access_email(&email, &name, &link).await {
                tracing::warn!("Access email for {} was not delivered", email);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead_store::MemoryLeadStore;
    use crate::models::{LeadRegistration, LeadStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AccessMailer for RecordingMailer {
        async fn send_access_email(&self, email: &str, _name: &str, link: &str) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), link.to_string()));
            true
        }
    }

    fn paid_event(email: &str, product: &str) -> PaymentWebhook {
        PaymentWebhook::new(json!({
            "event": "purchase_approved",
            "data": {"customer": {"email": email, "name": "Ana"}, "product": {"name": product}}
        }))
    }

    async fn pending_lead(store: &MemoryLeadStore, email: &str) -> Lead {
        store
            .insert_pending(&LeadRegistration {
                name: "Ana".into(),
                email: email.into(),
                birth_date: "1990-04-12".into(),
                question: "?".into(),
                selected_bumps: vec![],
            })
            .await
            .unwrap()
    }

    fn reconciler(
        store: Arc<MemoryLeadStore>,
        mailer: Option<Arc<dyn AccessMailer>>,
    ) -> Reconciler {
        let config = Config {
            public_app_url: "https://leitura.example".into(),
            ..Config::default()
        };
        Reconciler::new(store, Arc::new(config), mailer)
    }

    #[tokio::test]
    async fn test_first_payment_marks_paid_and_sends_email() {
        let store = Arc::new(MemoryLeadStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let lead = pending_lead(&store, "ana@example.com").await;
        let reconciler = reconciler(store.clone(), Some(mailer.clone()));

        let outcome = reconciler
            .apply(&paid_event("ANA@example.com", "Leitura de Tarot"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                lead_id: lead.id,
                bumps: BTreeSet::new(),
                added: BTreeSet::new(),
                newly_paid: true,
            }
        );

        let stored = store.latest_for_email("ana@example.com").await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Paid);

        for _ in 0..50 {
            if !mailer.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            *mailer.sent.lock().unwrap(),
            vec![(
                "ana@example.com".to_string(),
                "https://leitura.example/?recover=ana%40example.com".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_upsell_payment_adds_bump_without_second_email() {
        let store = Arc::new(MemoryLeadStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        pending_lead(&store, "ana@example.com").await;
        let reconciler = reconciler(store.clone(), Some(mailer.clone()));

        reconciler
            .apply(&paid_event("ana@example.com", "Análise de Alma Gêmea"))
            .await
            .unwrap();
        let outcome = reconciler
            .apply(&paid_event("ana@example.com", "Ritual de Blindagem"))
            .await
            .unwrap();

        match outcome {
            ReconcileOutcome::Applied {
                bumps,
                added,
                newly_paid,
                ..
            } => {
                assert_eq!(bumps, BTreeSet::from([AddOn::Love, AddOn::Protection]));
                assert_eq!(added, BTreeSet::from([AddOn::Protection]));
                assert!(!newly_paid);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skips_without_email_or_confirmation() {
        let store = Arc::new(MemoryLeadStore::new());
        let reconciler = reconciler(store.clone(), None);

        let no_email = PaymentWebhook::new(json!({"event": "purchase_approved", "data": {}}));
        assert_eq!(
            reconciler.apply(&no_email).await.unwrap(),
            ReconcileOutcome::Skipped(SkipReason::MissingEmail)
        );

        let refused = PaymentWebhook::new(json!({
            "event": "purchase_refused",
            "data": {"customer": {"email": "ana@example.com"}}
        }));
        assert_eq!(
            reconciler.apply(&refused).await.unwrap(),
            ReconcileOutcome::Skipped(SkipReason::NotAPayment)
        );
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_orphan_payment_creates_paid_lead() {
        let store = Arc::new(MemoryLeadStore::new());
        let reconciler = reconciler(store.clone(), None);

        let outcome = reconciler
            .apply(&paid_event("novo@example.com", "Carta Extra"))
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Created { .. }));

        let lead = store.latest_for_email("novo@example.com").await.unwrap().unwrap();
        assert!(lead.status.is_paid());
        assert_eq!(lead.name, "Ana");
        assert_eq!(lead.selected_bumps, BTreeSet::from([AddOn::ExtraCards]));
    }
}

//! Client side of the funnel: wait for payment, unlock the reading, recover a
//! purchase by email.
//!
//! Polling and recovery are two entry points into the same `Unlocked` state and
//! both fetch the reading through `FunnelApi::fetch_reading`.

use crate::addons::AddOn;
use crate::models::{
    normalize_email, Card, LeadRegistration, PaymentState, ReadingResponse, RegistrationResponse,
    StatusResponse,
};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

// ============ Errors ============

#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The server could not be reached or answered garbage.
    Transport(String),
    /// The server answered with an error status.
    Api { status: u16, message: String },
    /// Recovery found no approved payment for the email.
    NoConfirmedPayment,
    /// The poller was cancelled while its unlock was in flight.
    Cancelled,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ClientError::Api { status, message } => write!(f, "API error {}: {}", status, message),
            ClientError::NoConfirmedPayment => f.write_str(
                "Não encontramos um pagamento aprovado para este e-mail. \
                 Verifique se digitou corretamente ou aguarde alguns instantes.",
            ),
            ClientError::Cancelled => f.write_str("Payment polling was cancelled"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

// ============ Server API ============

/// Funnel endpoints the client flow depends on.
#[async_trait]
pub trait FunnelApi: Send + Sync {
    async fn register_lead(
        &self,
        registration: &LeadRegistration,
    ) -> Result<RegistrationResponse, ClientError>;

    async fn payment_status(&self, email: &str) -> Result<StatusResponse, ClientError>;

    async fn fetch_reading(&self, email: &str) -> Result<ReadingResponse, ClientError>;
}

/// `FunnelApi` over HTTP.
#[derive(Clone)]
pub struct HttpFunnelApi {
    client: Client,
    base_url: Url,
}

impl HttpFunnelApi {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Transport(format!("Invalid API URL {}: {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Transport(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Transport(format!("Invalid response body: {}", e)))
    }
}

#[async_trait]
impl FunnelApi for HttpFunnelApi {
    async fn register_lead(
        &self,
        registration: &LeadRegistration,
    ) -> Result<RegistrationResponse, ClientError> {
        let url = self.endpoint(&["api", "leads"])?;
        let response = self.client.post(url).json(registration).send().await?;
        Self::parse(response).await
    }

    async fn payment_status(&self, email: &str) -> Result<StatusResponse, ClientError> {
        let url = self.endpoint(&["api", "payment", "status", email])?;
        let response = self.client.get(url).send().await?;
        Self::parse(response).await
    }

    async fn fetch_reading(&self, email: &str) -> Result<ReadingResponse, ClientError> {
        let url = self.endpoint(&["api", "readings"])?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "email": email }))
            .send()
            .await?;
        Self::parse(response).await
    }
}

// ============ Flow state ============

/// Reading shown once payment is confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct UnlockedReading {
    pub email: String,
    pub bumps: Vec<AddOn>,
    pub cards: Vec<Card>,
    pub reading: String,
}

impl UnlockedReading {
    fn new(email: &str, response: ReadingResponse) -> Self {
        Self {
            email: email.to_string(),
            bumps: response.bumps,
            cards: response.cards,
            reading: response.reading,
        }
    }

    /// True when this reading belongs to `email` and covers `required`.
    pub fn satisfies(&self, email: &str, required: Option<AddOn>) -> bool {
        self.email == email && required.map_or(true, |addon| self.bumps.contains(&addon))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    Idle,
    AwaitingPayment { email: String },
    Unlocked(UnlockedReading),
}

/// Outcome of starting a checkout.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutStart {
    /// Open this URL in a new context and start polling.
    Redirect { checkout_url: String },
    /// The email had already paid; the reading was recovered instead.
    AlreadyUnlocked(UnlockedReading),
}

/// Payment-wait state machine for one client session.
pub struct PaymentFlow {
    api: Arc<dyn FunnelApi>,
    checkout_url: Url,
    poll_interval: Duration,
    state: watch::Sender<FlowState>,
    /// Serialises unlocks so polling and recovery never fetch twice at once.
    unlock_gate: tokio::sync::Mutex<()>,
    poller: Mutex<Option<CancellationToken>>,
}

impl PaymentFlow {
    pub fn new(api: Arc<dyn FunnelApi>, checkout_url: Url) -> Arc<Self> {
        Self::with_poll_interval(api, checkout_url, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        api: Arc<dyn FunnelApi>,
        checkout_url: Url,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(FlowState::Idle);
        Arc::new(Self {
            api,
            checkout_url,
            poll_interval,
            state,
            unlock_gate: tokio::sync::Mutex::new(()),
            poller: Mutex::new(None),
        })
    }

    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    /// Checkout page with the customer's email prefilled.
    pub fn checkout_link(&self, email: &str) -> String {
        let mut url = self.checkout_url.clone();
        url.query_pairs_mut().append_pair("email", email);
        url.to_string()
    }

    /// Registers the lead and returns where to send the customer.
    pub async fn begin_checkout(
        &self,
        registration: &LeadRegistration,
    ) -> Result<CheckoutStart, ClientError> {
        let email = normalize_email(&registration.email);
        let response = self.api.register_lead(registration).await?;

        if response.status == PaymentState::Paid {
            tracing::info!("{} already paid, recovering reading", email);
            let reading = self.recover(&email).await?;
            return Ok(CheckoutStart::AlreadyUnlocked(reading));
        }

        self.state.send_replace(FlowState::AwaitingPayment {
            email: email.clone(),
        });
        Ok(CheckoutStart::Redirect {
            checkout_url: self.checkout_link(&email),
        })
    }

    /// Polls the payment status until it reads paid (with `required`, if
    /// given), then unlocks. Any previous poller is cancelled.
    pub fn start_polling(self: &Arc<Self>, email: &str, required: Option<AddOn>) -> PollHandle {
        let email = normalize_email(email);
        let token = CancellationToken::new();
        if let Some(previous) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let flow = Arc::clone(self);
        let loop_token = token.clone();
        let task = tokio::spawn(async move {
            flow.poll_until_paid(&email, required, &loop_token).await;
        });

        PollHandle {
            token,
            task: Some(task),
        }
    }

    async fn poll_until_paid(&self, email: &str, required: Option<AddOn>, token: &CancellationToken) {
        tracing::debug!("Polling payment status for {}", email);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Polling for {} cancelled", email);
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let status = match self.api.payment_status(email).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!("Polling payment status for {} failed: {}", email, e);
                    continue;
                }
            };

            let ready = status.is_paid() && required.map_or(true, |addon| status.has_bump(addon));
            if !ready || token.is_cancelled() {
                continue;
            }

            match self.unlock(email, required, Some(token)).await {
                Ok(_) => {
                    tracing::info!("🔓 Reading unlocked for {}", email);
                    token.cancel();
                    return;
                }
                Err(ClientError::Cancelled) => {
                    tracing::debug!("Unlock for {} dropped, polling was cancelled", email);
                    return;
                }
                Err(e) => tracing::warn!("Unlock for {} failed, retrying: {}", email, e),
            }
        }
    }

    /// Stops polling. A session still waiting for payment goes back to idle.
    pub fn cancel(&self) {
        if let Some(token) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
        self.state.send_if_modified(|state| {
            if matches!(state, FlowState::AwaitingPayment { .. }) {
                *state = FlowState::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Opens a past purchase by email, independent of the original session.
    ///
    /// Every failure reads as `NoConfirmedPayment`, so the caller always has a
    /// retryable state to show.
    pub async fn recover(&self, email: &str) -> Result<UnlockedReading, ClientError> {
        let email = normalize_email(email);
        let status = match self.api.payment_status(&email).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Recovery status lookup for {} failed: {}", email, e);
                return Err(ClientError::NoConfirmedPayment);
            }
        };
        if !status.is_paid() {
            return Err(ClientError::NoConfirmedPayment);
        }

        if let Some(token) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
        match self.unlock(&email, None, None).await {
            Ok(reading) => Ok(reading),
            Err(e) => {
                tracing::warn!("Recovery fetch for {} failed: {}", email, e);
                Err(ClientError::NoConfirmedPayment)
            }
        }
    }

    /// Fetches and publishes the reading. With a poller `token`, nothing is
    /// published once it has been cancelled.
    async fn unlock(
        &self,
        email: &str,
        required: Option<AddOn>,
        token: Option<&CancellationToken>,
    ) -> Result<UnlockedReading, ClientError> {
        let _gate = self.unlock_gate.lock().await;

        let current = match &*self.state.borrow() {
            FlowState::Unlocked(current) if current.satisfies(email, required) => {
                Some(current.clone())
            }
            _ => None,
        };
        if let Some(current) = current {
            return Ok(current);
        }

        let response = self.api.fetch_reading(email).await?;
        let unlocked = UnlockedReading::new(email, response);
        // Checked under the channel's write lock so a concurrent `cancel` wins.
        let published = self.state.send_if_modified(|state| {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }
            *state = FlowState::Unlocked(unlocked.clone());
            true
        });
        if !published {
            return Err(ClientError::Cancelled);
        }
        Ok(unlocked)
    }
}

/// Owns a running poll loop. Dropping it stops the loop.
pub struct PollHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the loop to end, by unlocking or by cancellation.
    pub async fn wait(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Payment poller task failed: {}", e);
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

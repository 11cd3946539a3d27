use crate::errors::AppError;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Delivers the "your reading is ready" email.
///
/// Delivery is best effort: implementations report failure through the return
/// value and never propagate errors.
#[async_trait]
pub trait AccessMailer: Send + Sync {
    async fn send_access_email(&self, email: &str, name: &str, link: &str) -> bool;
}

/// Client for an HTTP transactional email API (JSON body, bearer key).
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: String, from: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create email client: {}", e))
            })?;

        Ok(Self {
            client,
            api_url,
            api_key,
            from,
        })
    }

    async fn deliver(&self, email: &str, name: &str, link: &str) -> Result<(), AppError> {
        let body = json!({
            "from": self.from,
            "to": [email],
            "subject": "🔮 Sua Leitura de Tarot está pronta! (Acesso Vitalício)",
            "html": access_email_html(name, link),
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Email request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Email API returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl AccessMailer for HttpMailer {
    async fn send_access_email(&self, email: &str, name: &str, link: &str) -> bool {
        tracing::info!("📧 Sending access email to {}", email);
        match self.deliver(email, name, link).await {
            Ok(()) => {
                tracing::info!("✅ Access email sent to {}", email);
                true
            }
            Err(e) => {
                tracing::error!("❌ Failed to send access email to {}: {}", email, e);
                false
            }
        }
    }
}

/// HTML body of the access email.
pub fn access_email_html(name: &str, link: &str) -> String {
    let name = if name.trim().is_empty() {
        "Viajante"
    } else {
        name.trim()
    };

    format!(
        r#"<div style="font-family: Helvetica, Arial, sans-serif; max-width: 600px; margin: 0 auto; background-color: #0f0518; color: #e9d5ff; border-radius: 8px;">
  <div style="padding: 30px 20px;">
    <h2 style="color: #ffffff; margin-top: 0;">Olá, {name}! ✨</h2>
    <p>O universo confirmou o seu chamado. Sua leitura completa está disponível e o acesso é vitalício.</p>
    <p style="text-align: center; margin: 30px 0;">
      <a href="{link}" style="background-color: #4ade80; color: #0f0518; padding: 15px 30px; text-decoration: none; font-weight: bold; border-radius: 30px;">VER MINHA LEITURA AGORA</a>
    </p>
    <p style="font-size: 14px; color: #9ca3af; text-align: center;">Ou acesse pelo link direto: <a href="{link}" style="color: #4ade80;">{link}</a></p>
    <p style="font-size: 12px; color: #6b7280; text-align: center;">Se você não fez este pedido, por favor desconsidere este e-mail.</p>
  </div>
</div>"#
    )
}

//! Payment processor client
//!
//! The core only needs one processor call: refunding a captured charge. The
//! trait seam lets tests substitute a mock processor.

use axum::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::error::ApiError;

/// Payment processor call failure
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payment processor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment processor returned unexpected status {0}")]
    UnexpectedStatus(u16),
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::ExternalServiceError(err.to_string())
    }
}

/// Result of a refund call
#[derive(Debug, Deserialize)]
pub struct RefundResult {
    pub id: String,
    pub status: String,
}

/// Payment processor operations used by the dispute/refund path
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Refund a captured charge. `amount_cents` of `None` refunds in full.
    async fn refund(
        &self,
        payment_reference: &str,
        amount_cents: Option<i64>,
    ) -> Result<RefundResult, PaymentError>;
}

/// HTTP payment processor client (Stripe-compatible refund endpoint)
pub struct HttpPaymentProcessor {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpPaymentProcessor {
    pub fn new(api_url: String, api_key: String, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn refund(
        &self,
        payment_reference: &str,
        amount_cents: Option<i64>,
    ) -> Result<RefundResult, PaymentError> {
        let url = format!("{}/v1/refunds", self.api_url);

        let mut form = vec![("payment_intent".to_string(), payment_reference.to_string())];
        if let Some(amount) = amount_cents {
            form.push(("amount".to_string(), amount.to_string()));
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaymentError::UnexpectedStatus(status.as_u16()));
        }

        Ok(response.json::<RefundResult>().await?)
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{AccrualOracle, AccrualStatus, OracleError, OrderSnapshot};

#[derive(Debug, Deserialize)]
struct AccrualResponse {
    order: String,
    status: AccrualStatus,
    #[serde(default)]
    accrual: Option<Decimal>,
}

/// Accrual oracle reached over HTTP: `GET {base}/api/orders/{number}`
#[derive(Debug, Clone)]
pub struct HttpAccrualOracle {
    client: reqwest::Client,
    base_url: String,
    /// Timeout configured on `client`, if known
    call_timeout: Option<Duration>,
}

impl HttpAccrualOracle {
    /// `call_timeout` bounds every request, connection included
    pub fn new(base_url: impl Into<String>, call_timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let mut oracle = Self::with_client(client, base_url);
        oracle.call_timeout = Some(call_timeout);
        Ok(oracle)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            call_timeout: None,
        }
    }

    fn order_url(&self, order_number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, order_number)
    }

    fn transport_error(&self, err: reqwest::Error) -> OracleError {
        if err.is_timeout() {
            OracleError::Timeout(self.call_timeout.unwrap_or_default())
        } else {
            OracleError::Unavailable(err.to_string())
        }
    }
}

/// Map a non-success status to the oracle outcome it stands for
fn classify_status(status: StatusCode, retry_after: Option<&str>) -> OracleError {
    match status {
        StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => OracleError::NotYetAvailable,
        StatusCode::TOO_MANY_REQUESTS => OracleError::RateLimited {
            retry_after: retry_after
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        other => OracleError::Unavailable(format!("unexpected status {other}")),
    }
}

fn parse_body(body: &[u8]) -> Result<OrderSnapshot, OracleError> {
    let response: AccrualResponse = serde_json::from_slice(body)
        .map_err(|e| OracleError::Unavailable(format!("malformed response: {e}")))?;

    Ok(OrderSnapshot {
        order: response.order,
        status: response.status,
        accrual: response.accrual,
    })
}

#[async_trait]
impl AccrualOracle for HttpAccrualOracle {
    async fn fetch_state(&self, order_number: &str) -> Result<OrderSnapshot, OracleError> {
        let response = self
            .client
            .get(self.order_url(order_number))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            return Err(classify_status(status, retry_after.as_deref()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        parse_body(&body)
    }
}

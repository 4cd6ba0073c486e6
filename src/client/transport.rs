// src/client/transport.rs

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::attempt::{
    AttemptResponse, BulkSubmitRequest, BulkSubmitResponse, SubmitAttemptRequest,
};

/// Classified failure of a submission request. The synchronizer's
/// reconciliation and adaptive control key off these classes, not raw
/// status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request exceeded the adaptive timeout. Retryable.
    Timeout,
    /// HTTP 429. Retryable, but opens a cooldown window for the key.
    RateLimited,
    /// HTTP 5xx — or a 2xx whose body did not have the expected shape,
    /// which is a server-error signal, not a success. Retryable.
    Server(u16),
    /// Definitive reject (400/401/403/404/422): the server will never
    /// accept this pair. Not retryable.
    Rejected(u16),
    /// Connection-level failure. Retryable.
    Network(String),
}

impl TransportError {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => TransportError::RateLimited,
            400 | 401 | 403 | 404 | 422 => TransportError::Rejected(status),
            status => TransportError::Server(status),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::RateLimited => write!(f, "rate limited (429)"),
            TransportError::Server(status) => write!(f, "server error ({})", status),
            TransportError::Rejected(status) => write!(f, "rejected ({})", status),
            TransportError::Network(msg) => write!(f, "network error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Seam between the synchronizer and the wire. Production uses
/// `HttpTransport`; tests script failures through their own impls.
#[async_trait]
pub trait AttemptTransport: Send + Sync {
    async fn submit(
        &self,
        attempt: &SubmitAttemptRequest,
        timeout: Duration,
    ) -> Result<AttemptResponse, TransportError>;

    async fn submit_bulk(
        &self,
        attempts: &[SubmitAttemptRequest],
        timeout: Duration,
    ) -> Result<BulkSubmitResponse, TransportError>;
}

/// Submits attempts against the ingestion endpoints over HTTP.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

#[async_trait]
impl AttemptTransport for HttpTransport {
    async fn submit(
        &self,
        attempt: &SubmitAttemptRequest,
        timeout: Duration,
    ) -> Result<AttemptResponse, TransportError> {
        let response = self
            .client
            .post(format!("{}/api/attempts", self.base_url))
            .timeout(timeout)
            .json(attempt)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(TransportError::from_status(status));
        }

        response
            .json::<AttemptResponse>()
            .await
            .map_err(|_| TransportError::Server(status))
    }

    async fn submit_bulk(
        &self,
        attempts: &[SubmitAttemptRequest],
        timeout: Duration,
    ) -> Result<BulkSubmitResponse, TransportError> {
        let body = BulkSubmitRequest {
            attempts: attempts.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/api/attempts/bulk", self.base_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(TransportError::from_status(status));
        }

        // A bulk body without the expected results list is a server-error
        // signal and must not clear the queue.
        response
            .json::<BulkSubmitResponse>()
            .await
            .map_err(|_| TransportError::Server(status))
    }
}

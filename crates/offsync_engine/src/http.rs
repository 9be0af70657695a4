//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so applications
//! can plug in whichever library they already use. Messages travel as CBOR
//! over `POST /sync/push` and `POST /sync/pull`.

use crate::config::SyncConfig;
use crate::transport::SyncTransport;
use offsync_protocol::{
    from_cbor, to_cbor, Body, PullRequest, PullResponse, PushOutcome, PushRequest, Revision,
    TransportFailure,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

/// A request that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The request did not complete within its timeout.
    Timeout,
    /// The connection could not be made or was lost.
    Connect(String),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Timeout => f.write_str("request timed out"),
            HttpError::Connect(message) => write!(f, "connection failed: {message}"),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<HttpResponse, HttpError>;
}

/// Body of a successful push response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PushAck {
    pub(crate) revision: Revision,
}

/// Body of a 409 push response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ConflictBody {
    pub(crate) server_body: Option<Body>,
    pub(crate) server_revision: Option<Revision>,
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    client: C,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport with a 30 second timeout.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport using the timeout from a session config.
    pub fn from_config(base_url: impl Into<String>, client: C, config: &SyncConfig) -> Self {
        Self::new(base_url, client).with_timeout(config.push_timeout)
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn fail(&self, failure: TransportFailure, detail: impl fmt::Display) -> TransportFailure {
        *self.last_error.write() = Some(format!("{failure}: {detail}"));
        failure
    }

    /// Posts a CBOR message, mapping everything but a 2xx or 409 response to
    /// a transport failure.
    fn post_cbor<Req: Serialize>(
        &self,
        endpoint: &str,
        request: &Req,
    ) -> Result<HttpResponse, TransportFailure> {
        let body = to_cbor(request).map_err(|e| self.fail(TransportFailure::Rejected(400), e))?;
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, bytes = body.len(), "http post");

        let response = self.client.post(&url, body, self.timeout).map_err(|e| {
            let failure = match e {
                HttpError::Timeout => TransportFailure::Timeout,
                HttpError::Connect(_) => TransportFailure::Disconnected,
            };
            self.fail(failure, e)
        })?;

        match response.status {
            200..=299 | 409 => {
                *self.last_error.write() = None;
                Ok(response)
            }
            404 | 410 => Err(TransportFailure::NotFound),
            status @ 400..=499 => Err(self.fail(TransportFailure::Rejected(status), url)),
            status => Err(self.fail(TransportFailure::Server(status), url)),
        }
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push(&self, request: &PushRequest) -> PushOutcome {
        let response = match self.post_cbor("/sync/push", request) {
            Ok(response) => response,
            Err(failure) => return PushOutcome::Failure(failure),
        };

        if response.status == 409 {
            return match from_cbor::<ConflictBody>(&response.body) {
                Ok(conflict) => PushOutcome::VersionConflict {
                    server_body: conflict.server_body,
                    server_revision: conflict.server_revision,
                },
                Err(e) => {
                    warn!(record = %request.id, error = %e, "undecodable conflict body");
                    PushOutcome::Failure(self.fail(TransportFailure::Server(502), e))
                }
            };
        }

        match from_cbor::<PushAck>(&response.body) {
            Ok(ack) => PushOutcome::Accepted(ack.revision),
            Err(e) => {
                warn!(record = %request.id, error = %e, "undecodable push response");
                PushOutcome::Failure(self.fail(TransportFailure::Server(502), e))
            }
        }
    }

    fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportFailure> {
        let response = self.post_cbor("/sync/pull", request)?;
        if response.status == 409 {
            return Err(self.fail(TransportFailure::Rejected(409), "conflict on pull"));
        }
        from_cbor(&response.body).map_err(|e| {
            warn!(error = %e, "undecodable pull response");
            self.fail(TransportFailure::Server(502), e)
        })
    }
}

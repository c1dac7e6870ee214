//! Bounded fixed-delay retry around a [`Transport`].
//!
//! Retryable: 502, 503, 504 and transport timeouts. Every other failure is
//! returned on the spot.

use std::time::Duration;

use crate::error::HostError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

const RETRYABLE_STATUSES: [u16; 3] = [502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// Sends every request through one retry policy.
pub struct RetryingSender {
    transport: Box<dyn Transport>,
    policy: RetryPolicy,
    sleep: Sleeper,
}

impl std::fmt::Debug for RetryingSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingSender")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingSender {
    pub fn new(transport: impl Transport + 'static, policy: RetryPolicy) -> Self {
        Self {
            transport: Box::new(transport),
            policy,
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replace the blocking sleep, e.g. to record delays.
    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request`, retrying transient failures. Success is any 2xx.
    pub fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HostError> {
        let mut attempt = 0u32;
        loop {
            let error = match self.transport.send(request) {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => HostError::Api {
                    status: response.status,
                    message: error_message(&response.body),
                },
                Err(err) => err,
            };

            if !is_retryable(&error) || attempt >= self.policy.max_retries {
                return Err(error);
            }
            attempt += 1;
            tracing::warn!(
                method = request.method.as_str(),
                url = %request.url,
                "{error}; retrying in {:?} ({attempt}/{})",
                self.policy.delay,
                self.policy.max_retries,
            );
            (self.sleep)(self.policy.delay);
        }
    }
}

pub fn is_retryable(error: &HostError) -> bool {
    match error {
        HostError::Timeout(_) => true,
        HostError::Api { status, .. } => RETRYABLE_STATUSES.contains(status),
        _ => false,
    }
}

/// The platform's `message` field when the body is a JSON error, otherwise the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

//! Error types for the MySQLCluster controller

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Object {0} is controlled by a foreign owner")]
    ForeignOwner(String),
}

impl Error {
    /// Whether re-queueing with backoff can be expected to help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors are terminal except Conflict and TooManyRequests;
                    // 5xx errors are worth retrying.
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                // Network and transport errors are retryable.
                _ => true,
            },
            // The referenced object may appear later.
            Error::MissingPrerequisite(_) => true,
            // Only a spec edit can fix these.
            Error::Validation(_) => false,
            Error::InvalidConfig(_) => false,
            Error::Serialization(_) => false,
            Error::MissingObjectKey(_) => false,
            Error::ForeignOwner(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Delay for an error: exponential for retryable errors, the maximum
    /// for terminal ones so manual intervention has time to land.
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            self.max_delay
        }
    }
}

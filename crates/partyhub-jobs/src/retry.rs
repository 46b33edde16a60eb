use std::error::Error;
use std::time::Duration;

use partyhub_agent::ProviderError;
use partyhub_core::config::{BackoffKind, GenerationJobConfig};

use crate::error::GenerationError;

/// Substrings that mark an untyped error message as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "429",
    "too many requests",
    "quota exceeded",
    "temporarily unavailable",
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
];

/// Exponential backoff never waits longer than this multiple of the base delay.
const MAX_BACKOFF_FACTOR: u32 = 16;

/// Whether an error is worth retrying.
///
/// Known error types are classified structurally; anything else falls back
/// to a case-insensitive scan of its message. `None` is never retryable.
pub fn is_retryable_error(err: Option<&(dyn Error + 'static)>) -> bool {
    let Some(err) = err else {
        return false;
    };
    if let Some(e) = err.downcast_ref::<GenerationError>() {
        return e.is_retryable();
    }
    if let Some(e) = err.downcast_ref::<ProviderError>() {
        return is_transient_provider_error(e);
    }
    is_retryable_message(&err.to_string())
}

pub(crate) fn is_transient_provider_error(err: &ProviderError) -> bool {
    err.is_transient()
        .unwrap_or_else(|| is_retryable_message(&err.to_string()))
}

fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Attempt budget and delay schedule for one combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffKind,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, backoff: BackoffKind) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff,
        }
    }

    pub fn from_config(config: &GenerationJobConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_secs(config.retry_delay_secs),
            config.backoff,
        )
    }

    /// Delay to wait after the `attempt`-th failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let factor = 2u32
                    .saturating_pow(attempt.saturating_sub(1))
                    .min(MAX_BACKOFF_FACTOR);
                self.delay.saturating_mul(factor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(msg: &str) -> std::io::Error {
        std::io::Error::other(msg.to_string())
    }

    #[test]
    fn none_is_not_retryable() {
        assert!(!is_retryable_error(None));
    }

    #[test]
    fn transient_messages_are_retryable() {
        for msg in [
            "rate limit exceeded",
            "status code 429",
            "request timeout",
            "Too Many Requests",
            "upstream temporarily unavailable",
            "dial tcp: connection refused",
        ] {
            let err = io(msg);
            assert!(is_retryable_error(Some(&err)), "{msg} should be retryable");
        }
    }

    #[test]
    fn unrelated_message_is_terminal() {
        let err = io("some other error");
        assert!(!is_retryable_error(Some(&err)));
    }

    #[test]
    fn structured_errors_win_over_message() {
        // message mentions a timeout but the status says bad request
        let err = ProviderError::Api {
            status: 400,
            message: "timeout parameter is invalid".into(),
        };
        assert!(!is_retryable_error(Some(&err)));

        let wrapped = GenerationError::Provider(ProviderError::RateLimited {
            retry_after_ms: 10,
        });
        assert!(is_retryable_error(Some(&wrapped)));

        let invalid = GenerationError::InvalidResponse("rate limit".into());
        assert!(!is_retryable_error(Some(&invalid)));
    }

    #[test]
    fn unknown_provider_variant_falls_back_to_message() {
        let reset = ProviderError::Unavailable("connection reset by peer".into());
        assert!(is_retryable_error(Some(&reset)));
        let other = ProviderError::Api {
            status: 418,
            message: "teapot".into(),
        };
        assert!(!is_retryable_error(Some(&other)));
    }

    #[test]
    fn fixed_and_exponential_delays() {
        let fixed = RetryPolicy::new(3, Duration::from_secs(2), BackoffKind::Fixed);
        assert_eq!(fixed.delay_after(1), Duration::from_secs(2));
        assert_eq!(fixed.delay_after(3), Duration::from_secs(2));

        let exp = RetryPolicy::new(8, Duration::from_secs(1), BackoffKind::Exponential);
        assert_eq!(exp.delay_after(1), Duration::from_secs(1));
        assert_eq!(exp.delay_after(3), Duration::from_secs(4));
        assert_eq!(exp.delay_after(10), Duration::from_secs(16));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(
            RetryPolicy::new(0, Duration::ZERO, BackoffKind::Fixed).max_attempts,
            1
        );
    }
}

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::time::Duration;

use http::StatusCode;

use crate::error::TransportErrorKind;

pub const DEFAULT_RETRY_COUNT: usize = 3;
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

const RETRYABLE_ERROR_FRAGMENTS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "connection refused",
    "connection reset",
    "no such host",
    "dns",
    "failed to lookup address",
    "name or service not known",
    "network is unreachable",
    "network unreachable",
    "temporary failure in name resolution",
    "broken pipe",
];

/// Exponential backoff with a fixed retry count.
///
/// Attempt `0` is the original request; retry `i` waits `base * 2^(i-1)`
/// before it is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    max_retries: usize,
    base_backoff: Duration,
}

impl RetryPolicy {
    /// `0` selects the default retry count, negative values disable retries.
    pub(crate) fn from_retry_count(retry: i32) -> Self {
        let max_retries = match retry {
            0 => DEFAULT_RETRY_COUNT,
            count if count < 0 => 0,
            count => count as usize,
        };
        Self {
            max_retries,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }

    pub(crate) fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub(crate) fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub(crate) const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    pub(crate) fn should_retry_status(&self, status: StatusCode, attempt: usize) -> bool {
        status.is_server_error() && attempt < self.max_retries
    }

    pub(crate) fn should_retry_transport(&self, retryable: bool, attempt: usize) -> bool {
        retryable && attempt < self.max_retries
    }

    pub(crate) fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        let exponent = retry_index.saturating_sub(1).min(31) as u32;
        self.base_backoff.saturating_mul(1_u32 << exponent)
    }
}

/// Substring check against the transient-failure vocabulary.
pub fn is_retryable_error_text(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    RETRYABLE_ERROR_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

pub(crate) fn classify_client_error(error: &hyper_util::client::legacy::Error) -> TransportErrorKind {
    classify_transport_error(error, error.is_connect())
}

/// Structured `io::ErrorKind` values in the source chain win; the message
/// vocabulary is the fallback.
pub(crate) fn classify_transport_error(
    error: &(dyn StdError + 'static),
    is_connect: bool,
) -> TransportErrorKind {
    if let Some(kind) = classify_io_source_chain(error) {
        return kind;
    }

    let text = error_chain_text(error).to_ascii_lowercase();
    if text.contains("dns")
        || text.contains("no such host")
        || text.contains("failed to lookup address")
        || text.contains("name or service not known")
        || text.contains("temporary failure in name resolution")
    {
        return TransportErrorKind::Dns;
    }
    if text.contains("certificate") || text.contains("handshake") || text.contains("tls") {
        return TransportErrorKind::Tls;
    }
    if text.contains("network is unreachable") || text.contains("network unreachable") {
        return TransportErrorKind::NetworkUnreachable;
    }
    if text.contains("connection reset") || text.contains("broken pipe") {
        return TransportErrorKind::ConnectionReset;
    }
    if text.contains("timed out") || text.contains("deadline exceeded") {
        return TransportErrorKind::Timeout;
    }
    if is_connect || is_retryable_error_text(&text) {
        return TransportErrorKind::Connect;
    }

    TransportErrorKind::Other
}

fn classify_io_source_chain(error: &(dyn StdError + 'static)) -> Option<TransportErrorKind> {
    let mut current = Some(error);
    while let Some(item) = current {
        let Some(io_error) = item.downcast_ref::<std::io::Error>() else {
            current = item.source();
            continue;
        };
        match io_error.kind() {
            ErrorKind::ConnectionRefused => return Some(TransportErrorKind::Connect),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => return Some(TransportErrorKind::ConnectionReset),
            ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable => {
                return Some(TransportErrorKind::NetworkUnreachable);
            }
            ErrorKind::TimedOut => return Some(TransportErrorKind::Timeout),
            _ => {}
        }
        // `io::Error::source` skips the wrapped error itself.
        current = io_error
            .get_ref()
            .map(|inner| inner as &(dyn StdError + 'static));
    }
    None
}

fn error_chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut current = error.source();
    while let Some(item) = current {
        text.push_str(": ");
        text.push_str(&item.to_string());
        current = item.source();
    }
    text
}

use std::path::PathBuf;

use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    ConnectionReset,
    NetworkUnreachable,
    Timeout,
    Tls,
    Other,
}

impl TransportErrorKind {
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Dns
                | Self::Connect
                | Self::ConnectionReset
                | Self::NetworkUnreachable
                | Self::Timeout
        )
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::ConnectionReset => "connection_reset",
            Self::NetworkUnreachable => "network_unreachable",
            Self::Timeout => "timeout",
            Self::Tls => "tls",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidMethod,
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    RequestBuild,
    ReadRequestBody,
    Authentication,
    Transport,
    Timeout,
    TooManyRedirects,
    InvalidRedirectLocation,
    ResponseTooLarge,
    RetriesExhausted,
    Cancelled,
    TlsConfig,
    InvalidProxy,
    InvalidOutputFormat,
    WriteOutput,
    Deserialize,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMethod => "invalid_method",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::RequestBuild => "request_build",
            Self::ReadRequestBody => "read_request_body",
            Self::Authentication => "authentication",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::TooManyRedirects => "too_many_redirects",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::ResponseTooLarge => "response_too_large",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Cancelled => "cancelled",
            Self::TlsConfig => "tls_config",
            Self::InvalidProxy => "invalid_proxy",
            Self::InvalidOutputFormat => "invalid_output_format",
            Self::WriteOutput => "write_output",
            Self::Deserialize => "deserialize",
        }
    }

    /// Codes raised before anything is sent on the wire.
    pub const fn is_request_construction(self) -> bool {
        matches!(
            self,
            Self::InvalidMethod
                | Self::InvalidUri
                | Self::InvalidHeaderName
                | Self::InvalidHeaderValue
                | Self::RequestBuild
                | Self::ReadRequestBody
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request method: {method}")]
    InvalidMethod { method: String },
    #[error("invalid request url: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to read request body: {source}")]
    ReadRequestBody {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to acquire token for scope {scope}: {source}")]
    Authentication {
        scope: String,
        #[source]
        source: BoxError,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("stopped after {max_redirects} redirects for {method} {uri}")]
    TooManyRedirects {
        max_redirects: usize,
        method: Method,
        uri: String,
    },
    #[error("invalid redirect location {location} for {method} {uri}")]
    InvalidRedirectLocation {
        location: String,
        method: Method,
        uri: String,
    },
    #[error(
        "response body exceeds maximum size ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<Error>,
    },
    #[error("request cancelled: {method} {uri}")]
    Cancelled { method: Method, uri: String },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
    #[error("invalid proxy url: {uri}")]
    InvalidProxy { uri: String },
    #[error("invalid output format {value} (expected auto, json or raw)")]
    InvalidOutputFormat { value: String },
    #[error("failed to write output to {}: {source}", .path.display())]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to deserialize response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidMethod { .. } => ErrorCode::InvalidMethod,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::ReadRequestBody { .. } => ErrorCode::ReadRequestBody,
            Self::Authentication { .. } => ErrorCode::Authentication,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::TooManyRedirects { .. } => ErrorCode::TooManyRedirects,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::ResponseTooLarge { .. } => ErrorCode::ResponseTooLarge,
            Self::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::InvalidProxy { .. } => ErrorCode::InvalidProxy,
            Self::InvalidOutputFormat { .. } => ErrorCode::InvalidOutputFormat,
            Self::WriteOutput { .. } => ErrorCode::WriteOutput,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub(crate) fn is_retryable_transport(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => kind.is_retryable(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

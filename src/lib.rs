//! `azrest` executes authenticated REST calls against cloud APIs on behalf of
//! a command-line tool.
//!
//! One call to [`Client::execute`] turns a [`RequestOptions`] value into a
//! single logical exchange: bearer token injection, retries with exponential
//! backoff on 5xx and transient transport failures, bounded redirect
//! following, a hard response size ceiling and best-effort pagination across
//! `nextLink`, `@odata.nextLink`, `@odata.next` and `Link` header
//! conventions. [`Formatter`] renders the result with credentials redacted.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use azrest::prelude::{Client, Formatter, OutputFormat, RequestOptions, StaticTokenProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new()?;
//!     let response = client
//!         .execute(
//!             RequestOptions::get("https://management.azure.com/subscriptions?api-version=2022-12-01")
//!                 .scope("https://management.azure.com/.default")
//!                 .token_provider(Arc::new(StaticTokenProvider::new("<token>")))
//!                 .paginate(true),
//!         )
//!         .await?;
//!
//!     println!("{}", Formatter::new(false, OutputFormat::Auto).format(&response));
//!     Ok(())
//! }
//! ```
//!
//! HTTP error statuses are returned as ordinary responses; only failures to
//! obtain one are [`Error`]s.

mod auth;
mod body;
mod client;
mod error;
mod format;
mod options;
mod pagination;
mod proxy;
mod redirect;
mod request;
mod response;
mod retry;
mod tls;
mod transport;
mod util;

pub use crate::auth::{StaticTokenProvider, TokenProvider, should_skip_auth};
pub use crate::body::{MAX_BUFFERED_BODY_BYTES, OneShotSource, RequestBody, SeekableSource};
pub use crate::client::{
    Client, ClientBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_POOL_IDLE_TIMEOUT,
    DEFAULT_POOL_MAX_IDLE_PER_HOST, DEFAULT_USER_AGENT,
};
pub use crate::error::{BoxError, Error, ErrorCode, TransportErrorKind};
pub use crate::format::{
    Formatter, OutputFormat, OutputTarget, REDACTED, is_binary_content, is_json,
    redact_sensitive_header, redact_token, write_output, write_raw_output,
};
pub use crate::options::{DEFAULT_MAX_RESPONSE_SIZE, DEFAULT_TIMEOUT, RequestOptions};
pub use crate::pagination::MAX_PAGES;
pub use crate::proxy::ProxyConfig;
pub use crate::redirect::DEFAULT_MAX_REDIRECTS;
pub use crate::response::Response;
pub use crate::retry::{DEFAULT_BASE_BACKOFF, DEFAULT_RETRY_COUNT, is_retryable_error_text};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        CancellationToken, Client, ClientBuilder, Error, ErrorCode, Formatter, OutputFormat,
        OutputTarget, ProxyConfig, RequestBody, RequestOptions, Response, Result,
        StaticTokenProvider, TokenProvider,
    };
}

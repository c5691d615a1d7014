use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::TokenProvider;
use crate::body::RequestBody;
use crate::format::{OutputFormat, OutputTarget};
use crate::redirect::{DEFAULT_MAX_REDIRECTS, RedirectPolicy};
use crate::retry::{DEFAULT_BASE_BACKOFF, RetryPolicy};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 100 * 1024 * 1024;

/// Everything needed to perform one logical call.
///
/// Built with consuming setters and handed to [`crate::Client::execute`].
pub struct RequestOptions {
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<RequestBody>,
    pub(crate) scope: Option<String>,
    pub(crate) skip_auth: bool,
    pub(crate) verbose: bool,
    pub(crate) timeout: Duration,
    pub(crate) insecure: bool,
    pub(crate) follow_redirects: bool,
    pub(crate) max_redirects: usize,
    pub(crate) output: OutputTarget,
    pub(crate) format: OutputFormat,
    pub(crate) binary: bool,
    pub(crate) retry: i32,
    pub(crate) retry_base_backoff: Duration,
    pub(crate) max_response_size: usize,
    pub(crate) paginate: bool,
    pub(crate) token_provider: Option<Arc<dyn TokenProvider>>,
    pub(crate) cancellation: CancellationToken,
}

impl RequestOptions {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            scope: None,
            skip_auth: false,
            verbose: false,
            timeout: DEFAULT_TIMEOUT,
            insecure: false,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            output: OutputTarget::Stdout,
            format: OutputFormat::Auto,
            binary: false,
            retry: 0,
            retry_base_backoff: DEFAULT_BASE_BACKOFF,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            paginate: false,
            token_provider: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new("PUT", url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new("PATCH", url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    /// Replaces any existing header with the same name, ignoring case.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self = self.header(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        self.scope = if scope.trim().is_empty() {
            None
        } else {
            Some(scope)
        };
        self
    }

    pub fn skip_auth(mut self, skip_auth: bool) -> Self {
        self.skip_auth = skip_auth;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn follow_redirects(mut self, follow_redirects: bool) -> Self {
        self.follow_redirects = follow_redirects;
        self
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }

    /// `0` selects the default of three retries; negative disables retries.
    pub fn retry(mut self, retry: i32) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_base_backoff(mut self, retry_base_backoff: Duration) -> Self {
        self.retry_base_backoff = retry_base_backoff;
        self
    }

    /// `0` selects the default ceiling.
    pub fn max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    pub fn paginate(mut self, paginate: bool) -> Self {
        self.paginate = paginate;
        self
    }

    pub fn token_provider(mut self, token_provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(token_provider);
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn method_str(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn output_target(&self) -> &OutputTarget {
        &self.output
    }

    pub fn output_format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_retry_count(self.retry).base_backoff(self.retry_base_backoff)
    }

    pub(crate) fn redirect_policy(&self) -> RedirectPolicy {
        RedirectPolicy::from_options(self.follow_redirects, self.max_redirects)
    }

    pub(crate) fn effective_max_response_size(&self) -> usize {
        if self.max_response_size == 0 {
            DEFAULT_MAX_RESPONSE_SIZE
        } else {
            self.max_response_size
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("url", &crate::util::redact_uri_for_logs(&self.url))
            .field("header_count", &self.headers.len())
            .field("body", &self.body)
            .field("scope", &self.scope)
            .field("skip_auth", &self.skip_auth)
            .field("verbose", &self.verbose)
            .field("timeout", &self.timeout)
            .field("insecure", &self.insecure)
            .field("follow_redirects", &self.follow_redirects)
            .field("max_redirects", &self.max_redirects)
            .field("output", &self.output)
            .field("format", &self.format)
            .field("binary", &self.binary)
            .field("retry", &self.retry)
            .field("max_response_size", &self.max_response_size)
            .field("paginate", &self.paginate)
            .field("token_provider", &self.token_provider.is_some())
            .finish()
    }
}

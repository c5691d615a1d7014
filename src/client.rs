use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use hyper::body::Incoming;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::Result;
use crate::body::{
    ReadBodyError, ReplayableBody, build_http_request, empty_req_body, read_all_body_limited,
};
use crate::error::Error;
use crate::options::RequestOptions;
use crate::pagination::{PageFetcher, collect_pages};
use crate::proxy::ProxyConfig;
use crate::redirect::{
    RedirectAction, RedirectPolicy, is_redirect_status, redirect_location, redirect_method,
    resolve_redirect_uri, same_origin, sanitize_headers_for_redirect,
};
use crate::request::{build_headers, parse_method, parse_target_url};
use crate::response::Response;
use crate::retry::{RetryPolicy, classify_client_error, classify_transport_error};
use crate::transport::{Transport, TransportSettings};
use crate::util::redact_uri_for_logs;

pub const DEFAULT_USER_AGENT: &str = concat!("azrest/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

#[derive(Clone, Debug, Default)]
enum ProxySetting {
    #[default]
    Environment,
    Explicit(ProxyConfig),
    Disabled,
}

#[derive(Clone, Debug)]
pub struct ClientBuilder {
    user_agent: String,
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    proxy: ProxySetting,
    root_ca_pems: Vec<Vec<u8>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            proxy: ProxySetting::Environment,
            root_ca_pems: Vec::new(),
        }
    }

    /// Sent when the caller did not set `User-Agent` on a request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    /// Replaces the proxy settings read from the environment.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = ProxySetting::Explicit(proxy);
        self
    }

    pub fn no_proxy(mut self) -> Self {
        self.proxy = ProxySetting::Disabled;
        self
    }

    /// Extra trust anchors for the certificate-verifying transport.
    pub fn root_ca_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.root_ca_pems.push(pem.into());
        self
    }

    pub fn build(self) -> Result<Client> {
        let user_agent = HeaderValue::from_str(&self.user_agent).map_err(|source| {
            Error::InvalidHeaderValue {
                name: "user-agent".to_owned(),
                source,
            }
        })?;
        let proxy = match self.proxy {
            ProxySetting::Environment => ProxyConfig::from_env()?,
            ProxySetting::Explicit(config) => config,
            ProxySetting::Disabled => ProxyConfig::new(),
        };
        let transport = Transport::build(TransportSettings {
            connect_timeout: self.connect_timeout,
            pool_idle_timeout: self.pool_idle_timeout,
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            proxy,
            extra_root_pems: self.root_ca_pems,
        })?;
        Ok(Client {
            transport,
            user_agent,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Request execution engine. Cheap to clone; holds only the transports.
#[derive(Clone)]
pub struct Client {
    transport: Transport,
    user_agent: HeaderValue,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Per-call settings shared by the first request and every pagination page.
struct CallSettings {
    insecure: bool,
    attempt_timeout: Duration,
    max_response_size: usize,
    retry_policy: RetryPolicy,
    redirect_policy: RedirectPolicy,
    cancellation: CancellationToken,
}

fn cancelled_error(method: &Method, uri: &str) -> Error {
    Error::Cancelled {
        method: method.clone(),
        uri: uri.to_owned(),
    }
}

impl Client {
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Runs one logical call: auth, retries, redirects, a bounded body read
    /// and optional pagination.
    ///
    /// Non-2xx statuses are returned as responses. `elapsed` on the result
    /// covers every attempt of the first request but no pagination pages.
    pub async fn execute(&self, mut options: RequestOptions) -> Result<Response> {
        let method = parse_method(&options.method)?;
        let uri = parse_target_url(&options.url)?;
        let redacted_uri = redact_uri_for_logs(&options.url);
        if options.cancellation.is_cancelled() {
            return Err(cancelled_error(&method, &redacted_uri));
        }

        let headers = build_headers(&options, &self.user_agent).await?;
        let mut body = ReplayableBody::prepare(options.body.take()).await?;
        let call = CallSettings {
            insecure: options.insecure,
            attempt_timeout: options.timeout,
            max_response_size: options.effective_max_response_size(),
            retry_policy: options.retry_policy(),
            redirect_policy: options.redirect_policy(),
            cancellation: options.cancellation.clone(),
        };
        if options.verbose {
            info!(method = %method, uri = %redacted_uri, "> request");
        }

        let started = Instant::now();
        let mut response = self
            .send_with_retry(&call, method.clone(), uri, headers, &mut body)
            .await?;
        response.set_elapsed(started.elapsed());

        if options.paginate && response.status().is_success() {
            let mut fetcher = EnginePageFetcher {
                client: self,
                options: &options,
                call: &call,
                method,
            };
            let merged = collect_pages(
                &response,
                &options.url,
                call.max_response_size,
                &mut fetcher,
            )
            .await?;
            if let Some(merged) = merged {
                response.replace_body(merged);
            }
        }

        Ok(response)
    }

    async fn send_with_retry(
        &self,
        call: &CallSettings,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: &mut ReplayableBody,
    ) -> Result<Response> {
        let redacted_uri = redact_uri_for_logs(&uri.to_string());
        let retry_policy = if body.is_replayable() {
            call.retry_policy
        } else {
            call.retry_policy.max_retries(0)
        };
        let max_attempts = retry_policy.max_attempts();
        let mut attempt = 0_usize;

        loop {
            if call.cancellation.is_cancelled() {
                return Err(cancelled_error(&method, &redacted_uri));
            }

            let span = info_span!(
                "azrest.request",
                method = %method,
                uri = %redacted_uri,
                attempt = attempt + 1,
                max_attempts = max_attempts
            );
            let attempt_future = timeout(
                call.attempt_timeout,
                self.run_attempt(call, &method, &uri, &headers, body),
            )
            .instrument(span);
            let outcome = tokio::select! {
                biased;
                () = call.cancellation.cancelled() => {
                    return Err(cancelled_error(&method, &redacted_uri));
                }
                outcome = attempt_future => outcome,
            };
            let result = outcome.unwrap_or_else(|_| {
                Err(Error::Timeout {
                    timeout_ms: call.attempt_timeout.as_millis(),
                    method: method.clone(),
                    uri: redacted_uri.clone(),
                })
            });

            match result {
                Ok(response) if retry_policy.should_retry_status(response.status(), attempt) => {
                    warn!(
                        status = response.status().as_u16(),
                        attempt = attempt + 1,
                        uri = %redacted_uri,
                        "retrying request after server error"
                    );
                }
                Ok(response) => return Ok(response),
                Err(error)
                    if retry_policy.should_retry_transport(error.is_retryable_transport(), attempt) =>
                {
                    warn!(
                        attempt = attempt + 1,
                        uri = %redacted_uri,
                        error = %error,
                        "retrying request after transport error"
                    );
                }
                Err(error) if attempt > 0 && error.is_retryable_transport() => {
                    return Err(Error::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(error),
                    });
                }
                Err(error) => return Err(error),
            }

            attempt += 1;
            let delay = retry_policy.backoff_for_retry(attempt);
            debug!(delay_ms = delay.as_millis() as u64, "waiting before retry");
            tokio::select! {
                biased;
                () = call.cancellation.cancelled() => {
                    return Err(cancelled_error(&method, &redacted_uri));
                }
                () = sleep(delay) => {}
            }
        }
    }

    /// One attempt: dispatch, follow redirects, read the bounded body.
    async fn run_attempt(
        &self,
        call: &CallSettings,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &mut ReplayableBody,
    ) -> Result<Response> {
        let mut current_method = method.clone();
        let mut current_uri = uri.clone();
        let mut current_headers = headers.clone();
        let mut sends_body = true;
        let mut redirects = 0_usize;

        loop {
            let redacted_uri = redact_uri_for_logs(&current_uri.to_string());
            let request_body = if sends_body {
                body.next_body().await?
            } else {
                empty_req_body()
            };
            let request = build_http_request(
                current_method.clone(),
                current_uri.clone(),
                &current_headers,
                request_body,
            )?;

            debug!(method = %current_method, uri = %redacted_uri, redirects, "sending request");
            let response = self
                .transport
                .send(request, call.insecure)
                .await
                .map_err(|source| Error::Transport {
                    kind: classify_client_error(&source),
                    method: current_method.clone(),
                    uri: redacted_uri.clone(),
                    source: Box::new(source),
                })?;
            let status = response.status();

            if is_redirect_status(status)
                && let Some(location) = redirect_location(response.headers())
            {
                match call.redirect_policy.decide(redirects) {
                    RedirectAction::Stop => {}
                    RedirectAction::LimitExceeded => {
                        return Err(Error::TooManyRedirects {
                            max_redirects: call.redirect_policy.max_redirects(),
                            method: current_method,
                            uri: redacted_uri,
                        });
                    }
                    RedirectAction::Follow => {
                        let next_method = redirect_method(&current_method, status);
                        let keeps_body = sends_body && next_method == current_method;
                        if keeps_body && !body.is_replayable() {
                            debug!(status = status.as_u16(), "redirect needs a body that cannot be replayed");
                        } else {
                            let next_uri = resolve_redirect_uri(&current_uri, &location)
                                .ok_or_else(|| Error::InvalidRedirectLocation {
                                    location: redact_uri_for_logs(&location),
                                    method: current_method.clone(),
                                    uri: redacted_uri.clone(),
                                })?;
                            let same_origin_redirect = same_origin(&current_uri, &next_uri);
                            sanitize_headers_for_redirect(
                                &mut current_headers,
                                !keeps_body,
                                same_origin_redirect,
                            );
                            debug!(
                                status = status.as_u16(),
                                to = %redact_uri_for_logs(&next_uri.to_string()),
                                same_origin = same_origin_redirect,
                                "following redirect"
                            );
                            redirects += 1;
                            sends_body = keeps_body;
                            current_method = next_method;
                            current_uri = next_uri;
                            continue;
                        }
                    }
                }
            }

            return read_response(response, call, &current_method, &redacted_uri).await;
        }
    }
}

async fn read_response(
    response: http::Response<Incoming>,
    call: &CallSettings,
    method: &Method,
    redacted_uri: &str,
) -> Result<Response> {
    let (parts, body) = response.into_parts();
    let limit = call.max_response_size;
    let too_large = |actual_bytes: usize| Error::ResponseTooLarge {
        limit_bytes: limit,
        actual_bytes,
        method: method.clone(),
        uri: redacted_uri.to_owned(),
    };

    // HEAD, 1xx, 204 and 304 replies advertise a length but carry no body.
    let carries_body = *method != Method::HEAD
        && !parts.status.is_informational()
        && parts.status != StatusCode::NO_CONTENT
        && parts.status != StatusCode::NOT_MODIFIED;
    let declared_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|_| carries_body);
    if let Some(declared_length) = declared_length
        && declared_length > limit as u64
    {
        return Err(too_large(usize::try_from(declared_length).unwrap_or(usize::MAX)));
    }

    let body = read_all_body_limited(body, limit)
        .await
        .map_err(|error| match error {
            ReadBodyError::TooLarge { actual_bytes } => too_large(actual_bytes),
            ReadBodyError::Read(source) => Error::Transport {
                kind: classify_transport_error(&source, false),
                method: method.clone(),
                uri: redacted_uri.to_owned(),
                source: Box::new(source),
            },
        })?;

    debug!(
        status = parts.status.as_u16(),
        body_bytes = body.len(),
        "response received"
    );
    Ok(Response::new(parts.status, parts.headers, body, Duration::ZERO))
}

struct EnginePageFetcher<'a> {
    client: &'a Client,
    options: &'a RequestOptions,
    call: &'a CallSettings,
    method: Method,
}

#[async_trait]
impl PageFetcher for EnginePageFetcher<'_> {
    async fn fetch_page(&mut self, url: &str) -> Result<Response> {
        let uri = parse_target_url(url)?;
        let headers = build_headers(self.options, &self.client.user_agent).await?;
        let mut body = ReplayableBody::Empty;
        self.client
            .send_with_retry(self.call, self.method.clone(), uri, headers, &mut body)
            .await
    }
}

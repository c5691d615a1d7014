use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::Uri;
use http::header::HeaderValue;
use hyper::rt::{Read as HyperRead, ReadBufCursor, Write as HyperWrite};
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use percent_encoding::percent_decode_str;
use tower_service::Service;
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::util::default_port;

pub(crate) type BoxConnectError = Box<dyn StdError + Send + Sync>;

#[derive(Clone, Debug)]
pub(crate) struct ProxyEndpoint {
    pub(crate) uri: Uri,
    pub(crate) authorization: Option<HeaderValue>,
}

impl ProxyEndpoint {
    fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_owned()
        } else {
            format!("http://{trimmed}")
        };
        let invalid = || Error::InvalidProxy {
            uri: crate::util::redact_uri_for_logs(trimmed),
        };
        let mut url = Url::parse(&with_scheme).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(invalid());
        }

        let authorization = if url.username().is_empty() {
            None
        } else {
            let username = percent_decode_str(url.username()).decode_utf8_lossy();
            let password = url
                .password()
                .map(|password| percent_decode_str(password).decode_utf8_lossy())
                .unwrap_or_default();
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            let mut value =
                HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|_| invalid())?;
            value.set_sensitive(true);
            Some(value)
        };
        let _ = url.set_username("");
        let _ = url.set_password(None);

        let uri = url.as_str().parse().map_err(|_| invalid())?;
        Ok(Self { uri, authorization })
    }
}

/// Forward proxy settings for plain and TLS targets.
///
/// HTTPS targets are reached through a `CONNECT` tunnel; HTTP targets are
/// sent to the proxy in absolute form.
#[derive(Clone, Debug, Default)]
pub struct ProxyConfig {
    pub(crate) http: Option<ProxyEndpoint>,
    pub(crate) https: Option<ProxyEndpoint>,
    pub(crate) no_proxy_rules: Vec<NoProxyRule>,
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `HTTPS_PROXY`, `HTTP_PROXY` and `NO_PROXY`, upper case first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |upper: &str, lower: &str| {
            lookup(upper)
                .or_else(|| lookup(lower))
                .filter(|value| !value.trim().is_empty())
        };

        let mut config = Self::new();
        if let Some(value) = read("HTTP_PROXY", "http_proxy") {
            config = config.http_proxy(&value)?;
        }
        if let Some(value) = read("HTTPS_PROXY", "https_proxy") {
            config = config.https_proxy(&value)?;
        }
        if let Some(value) = read("NO_PROXY", "no_proxy") {
            config = config.no_proxy(value.split(','));
        }
        Ok(config)
    }

    pub fn http_proxy(mut self, proxy: &str) -> Result<Self> {
        self.http = Some(ProxyEndpoint::parse(proxy)?);
        Ok(self)
    }

    pub fn https_proxy(mut self, proxy: &str) -> Result<Self> {
        self.https = Some(ProxyEndpoint::parse(proxy)?);
        Ok(self)
    }

    /// Unparseable entries are skipped.
    pub fn no_proxy<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.no_proxy_rules
            .extend(rules.into_iter().filter_map(|rule| NoProxyRule::parse(rule.as_ref())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }

    pub(crate) fn endpoint_for(&self, uri: &Uri) -> Option<&ProxyEndpoint> {
        if should_bypass_proxy_uri(&self.no_proxy_rules, uri) {
            return None;
        }
        match uri.scheme_str() {
            Some(scheme) if scheme.eq_ignore_ascii_case("https") => self.https.as_ref(),
            Some(scheme) if scheme.eq_ignore_ascii_case("http") => self.http.as_ref(),
            _ => None,
        }
    }

    /// `Proxy-Authorization` to attach to a plain HTTP request forwarded
    /// through the proxy.
    pub(crate) fn forward_authorization(&self, uri: &Uri) -> Option<HeaderValue> {
        let is_http = uri
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http"));
        if !is_http {
            return None;
        }
        self.endpoint_for(uri)
            .and_then(|endpoint| endpoint.authorization.clone())
    }
}

#[derive(Clone, Debug)]
pub(crate) enum NoProxyRule {
    Any,
    Domain { host: String, port: Option<u16> },
}

impl NoProxyRule {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let mut candidate = text.trim().to_owned();
        let mut port = None;
        if candidate.is_empty() {
            return None;
        }
        if candidate == "*" {
            return Some(Self::Any);
        }
        if let Ok(url) = Url::parse(&candidate)
            && let Some(host) = url.host_str()
        {
            candidate = host.to_owned();
            port = url.port();
        }
        candidate = candidate.trim_start_matches("*.").trim_start_matches('.').to_owned();
        if let Some(stripped) = candidate.strip_prefix('[') {
            let end = stripped.find(']')?;
            let host = stripped[..end].to_owned();
            let suffix = &stripped[end + 1..];
            if let Some(raw_port) = suffix.strip_prefix(':') {
                port = Some(raw_port.parse::<u16>().ok()?);
            } else if !suffix.is_empty() {
                return None;
            }
            candidate = host;
        } else if candidate.matches(':').count() == 1 {
            let (host, raw_port) = candidate.rsplit_once(':')?;
            port = Some(raw_port.parse::<u16>().ok()?);
            candidate = host.to_owned();
        }
        if candidate.is_empty() {
            return None;
        }
        Some(Self::Domain {
            host: candidate.to_ascii_lowercase(),
            port,
        })
    }

    pub(crate) fn matches(&self, host: &str, port: Option<u16>) -> bool {
        match self {
            Self::Any => true,
            Self::Domain {
                host: domain,
                port: rule_port,
            } => {
                let host_matches = host == domain
                    || host
                        .strip_suffix(domain.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'));
                host_matches && rule_port.is_none_or(|rule_port| port == Some(rule_port))
            }
        }
    }
}

pub(crate) fn should_bypass_proxy_uri(no_proxy_rules: &[NoProxyRule], uri: &Uri) -> bool {
    let Some(host) = uri.host() else {
        return false;
    };
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    let port = default_port(uri);
    no_proxy_rules
        .iter()
        .any(|rule| rule.matches(&normalized, port))
}

#[derive(Debug)]
pub(crate) struct ProxyConnection<T> {
    inner: T,
    forwarded: bool,
}

impl<T> HyperRead for ProxyConnection<T>
where
    T: HyperRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<T> HyperWrite for ProxyConnection<T>
where
    T: HyperWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<T> Connection for ProxyConnection<T>
where
    T: Connection,
{
    fn connected(&self) -> Connected {
        // Forwarded connections make hyper send absolute-form request targets.
        self.inner.connected().proxy(self.forwarded)
    }
}

/// Connector that dials directly, through a `CONNECT` tunnel, or to a
/// forwarding proxy depending on the destination.
#[derive(Clone)]
pub(crate) struct ProxyConnector {
    direct: HttpConnector,
    config: ProxyConfig,
    tunnel: Option<Tunnel<HttpConnector>>,
}

impl ProxyConnector {
    pub(crate) fn new(config: ProxyConfig, connect_timeout: Duration) -> Self {
        let mut direct = HttpConnector::new();
        direct.enforce_http(false);
        direct.set_connect_timeout(Some(connect_timeout));
        let tunnel = config.https.as_ref().map(|endpoint| {
            let tunnel = Tunnel::new(endpoint.uri.clone(), direct.clone());
            match &endpoint.authorization {
                Some(authorization) => tunnel.with_auth(authorization.clone()),
                None => tunnel,
            }
        });
        Self {
            direct,
            config,
            tunnel,
        }
    }
}

impl Service<Uri> for ProxyConnector {
    type Response = ProxyConnection<<HttpConnector as Service<Uri>>::Response>;
    type Error = BoxConnectError;
    type Future = ConnectFuture<<HttpConnector as Service<Uri>>::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        if let Some(tunnel) = &mut self.tunnel
            && let Poll::Ready(Err(error)) = tunnel.poll_ready(cx)
        {
            return Poll::Ready(Err(Box::new(error)));
        }
        self.direct
            .poll_ready(cx)
            .map_err(|error| Box::new(error) as BoxConnectError)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let is_https = dst
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"));
        let endpoint = self.config.endpoint_for(&dst).cloned();

        match (endpoint, is_https, self.tunnel.as_mut()) {
            (Some(_), true, Some(tunnel)) => {
                wrap_connecting(tunnel.call(normalize_tunnel_target_uri(dst)), false)
            }
            (Some(endpoint), false, _) => wrap_connecting(self.direct.call(endpoint.uri), true),
            _ => wrap_connecting(self.direct.call(dst), false),
        }
    }
}

type ConnectFuture<T> =
    Pin<Box<dyn Future<Output = std::result::Result<ProxyConnection<T>, BoxConnectError>> + Send>>;

fn wrap_connecting<F, T, E>(connecting: F, forwarded: bool) -> ConnectFuture<T>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: 'static,
    E: Into<BoxConnectError>,
{
    Box::pin(async move {
        connecting
            .await
            .map(|inner| ProxyConnection { inner, forwarded })
            .map_err(Into::into)
    })
}

/// `CONNECT` needs an explicit port in the authority.
fn normalize_tunnel_target_uri(dst: Uri) -> Uri {
    if dst.port().is_some() {
        return dst;
    }
    let (Some(host), Some(port)) = (dst.host(), default_port(&dst)) else {
        return dst;
    };
    let authority_text = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let Ok(authority) = authority_text.parse() else {
        return dst;
    };
    let original = dst.clone();
    let mut parts = dst.into_parts();
    parts.authority = Some(authority);
    Uri::from_parts(parts).unwrap_or(original)
}

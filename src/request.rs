use http::header::{AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method, Uri};
use tracing::debug;

use crate::Result;
use crate::error::Error;
use crate::options::RequestOptions;
use crate::util::{parse_header_name, parse_header_value, url_to_uri};

const SUPPORTED_METHODS: &[Method] = &[
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

pub(crate) fn parse_method(method: &str) -> Result<Method> {
    let upper = method.trim().to_ascii_uppercase();
    SUPPORTED_METHODS
        .iter()
        .find(|candidate| candidate.as_str() == upper)
        .cloned()
        .ok_or_else(|| Error::InvalidMethod {
            method: method.to_owned(),
        })
}

pub(crate) fn parse_target_url(text: &str) -> Result<Uri> {
    let invalid = || Error::InvalidUri {
        uri: crate::util::redact_uri_for_logs(text),
    };
    let url = url::Url::parse(text.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    url_to_uri(&url)
}

/// Caller headers, then the bearer token, then the default user agent.
///
/// The token is fetched on every call so pagination pages get a fresh one.
pub(crate) async fn build_headers(
    options: &RequestOptions,
    default_user_agent: &HeaderValue,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(options.headers.len() + 2);
    for (name, value) in &options.headers {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        headers.insert(header_name, header_value);
    }

    if !options.skip_auth
        && let Some(scope) = options.scope.as_deref()
        && let Some(provider) = options.token_provider.as_ref()
    {
        let fetched = tokio::select! {
            biased;
            () = options.cancellation.cancelled() => {
                return Err(Error::Cancelled {
                    method: parse_method(&options.method).unwrap_or(Method::GET),
                    uri: crate::util::redact_uri_for_logs(&options.url),
                });
            }
            token = provider.get_token(scope) => token,
        };
        let token = fetched.map_err(|source| Error::Authentication {
            scope: scope.to_owned(),
            source,
        })?;
        let mut value = parse_header_value(AUTHORIZATION.as_str(), &format!("Bearer {token}"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        debug!(scope, "attached bearer token");
    }

    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, default_user_agent.clone());
    }

    Ok(headers)
}

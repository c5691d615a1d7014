use http::Uri;
use http::header::{HeaderName, HeaderValue};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 4096;

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.trim()
        .parse()
        .map_err(|source| Error::InvalidHeaderName {
            name: name.to_owned(),
            source,
        })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn default_port(uri: &Uri) -> Option<u16> {
    uri.port_u16().or_else(|| match uri.scheme_str() {
        Some(scheme) if scheme.eq_ignore_ascii_case("https") => Some(443),
        Some(scheme) if scheme.eq_ignore_ascii_case("http") => Some(80),
        _ => None,
    })
}

pub(crate) fn url_to_uri(url: &url::Url) -> Result<Uri, Error> {
    url.as_str().parse().map_err(|_| Error::InvalidUri {
        uri: url.as_str().to_owned(),
    })
}

/// `content-type` -> `Content-Type`, `x-request-id` -> `X-Request-Id`.
pub(crate) fn canonical_header_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut upper_next = true;
    for character in name.chars() {
        if upper_next {
            canonical.push(character.to_ascii_uppercase());
        } else {
            canonical.push(character.to_ascii_lowercase());
        }
        upper_next = character == '-';
    }
    canonical
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}

use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION};
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::util::default_port;

pub const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RedirectPolicy {
    enabled: bool,
    max_redirects: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RedirectAction {
    Follow,
    Stop,
    LimitExceeded,
}

impl RedirectPolicy {
    pub(crate) const fn none() -> Self {
        Self {
            enabled: false,
            max_redirects: 0,
        }
    }

    pub(crate) const fn limited(max_redirects: usize) -> Self {
        Self {
            enabled: true,
            max_redirects,
        }
    }

    pub(crate) const fn follow() -> Self {
        Self::limited(DEFAULT_MAX_REDIRECTS)
    }

    /// `max_redirects == 0` selects the default limit.
    pub(crate) const fn from_options(follow_redirects: bool, max_redirects: usize) -> Self {
        if !follow_redirects {
            return Self::none();
        }
        if max_redirects == 0 {
            return Self::follow();
        }
        Self::limited(max_redirects)
    }

    pub(crate) const fn max_redirects(self) -> usize {
        if self.enabled { self.max_redirects } else { 0 }
    }

    /// `followed` is the number of hops already taken in this attempt.
    pub(crate) const fn decide(self, followed: usize) -> RedirectAction {
        if !self.enabled {
            return RedirectAction::Stop;
        }
        if followed < self.max_redirects {
            RedirectAction::Follow
        } else {
            RedirectAction::LimitExceeded
        }
    }
}

pub(crate) fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

pub(crate) fn redirect_method(method: &Method, status: StatusCode) -> Method {
    match status {
        StatusCode::SEE_OTHER if *method != Method::HEAD => Method::GET,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if *method == Method::POST => Method::GET,
        _ => method.clone(),
    }
}

pub(crate) fn redirect_location(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

pub(crate) fn resolve_redirect_uri(current_uri: &Uri, location: &str) -> Option<Uri> {
    let base = url::Url::parse(&current_uri.to_string()).ok()?;
    let joined = base.join(location).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.as_str().parse().ok()
}

pub(crate) fn same_origin(left: &Uri, right: &Uri) -> bool {
    let left_scheme = left.scheme_str().unwrap_or_default();
    let right_scheme = right.scheme_str().unwrap_or_default();
    if !left_scheme.eq_ignore_ascii_case(right_scheme) {
        return false;
    }

    let left_host = left.host().unwrap_or_default();
    let right_host = right.host().unwrap_or_default();
    if !left_host.eq_ignore_ascii_case(right_host) {
        return false;
    }

    default_port(left) == default_port(right)
}

pub(crate) fn sanitize_headers_for_redirect(
    headers: &mut HeaderMap,
    body_dropped: bool,
    same_origin_redirect: bool,
) {
    if body_dropped {
        headers.remove(CONTENT_LENGTH);
        headers.remove(CONTENT_TYPE);
    }
    if !same_origin_redirect {
        headers.remove(AUTHORIZATION);
        headers.remove(COOKIE);
    }
}

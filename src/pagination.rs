//! Best-effort merging of multi-page JSON collections.
//!
//! Next-page links are taken from `nextLink`, `@odata.nextLink`,
//! `@odata.next` and finally a `Link: <...>; rel="next"` header. Follow-up
//! failures end the walk and keep what was collected; only cancellation
//! escapes.

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use http::header::LINK;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::Result;
use crate::response::Response;
use crate::util::redact_uri_for_logs;

/// Hard ceiling including the first page.
pub const MAX_PAGES: usize = 1000;

const NEXT_LINK_FIELDS: &[&str] = &["nextLink", "@odata.nextLink", "@odata.next"];

/// Issues one follow-up page request with no body and freshly built headers.
#[async_trait]
pub(crate) trait PageFetcher: Send {
    async fn fetch_page(&mut self, url: &str) -> Result<Response>;
}

/// Returns the merged body, or `None` when the first page should be kept
/// verbatim.
///
/// The merged body never exceeds `max_body_bytes`; a page whose items would
/// push it over ends the walk like any other follow-up failure.
pub(crate) async fn collect_pages<F>(
    first: &Response,
    request_url: &str,
    max_body_bytes: usize,
    fetcher: &mut F,
) -> Result<Option<Bytes>>
where
    F: PageFetcher + ?Sized,
{
    let Ok(Value::Object(first_page)) = serde_json::from_slice::<Value>(first.body()) else {
        return Ok(None);
    };
    let Some(mut next) = next_page_link(&first_page, first.headers()) else {
        return Ok(None);
    };
    let Ok(base) = Url::parse(request_url) else {
        return Ok(None);
    };

    let mut items = match first_page.get("value") {
        Some(Value::Array(values)) => values.clone(),
        _ => vec![Value::Object(first_page.clone())],
    };
    let mut merged = first_page;
    for field in NEXT_LINK_FIELDS {
        merged.remove(*field);
    }
    merged.insert("value".to_owned(), Value::Array(Vec::new()));

    let mut merged_len = grown_len(serialized_len(&merged), 0, &items);
    if merged_len > max_body_bytes {
        warn!(limit_bytes = max_body_bytes, "pagination skipped, first page exceeds size limit once merged");
        return Ok(None);
    }

    let mut pages = 1_usize;
    loop {
        if pages >= MAX_PAGES {
            warn!(max_pages = MAX_PAGES, "pagination stopped at page ceiling");
            break;
        }
        let Ok(next_url) = base.join(&next) else {
            warn!(next = %redact_uri_for_logs(&next), "pagination stopped at unresolvable next link");
            break;
        };
        let redacted = redact_uri_for_logs(next_url.as_str());

        let page = match fetcher.fetch_page(next_url.as_str()).await {
            Ok(page) => page,
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                warn!(uri = %redacted, error = %error, "pagination stopped after failed page request");
                break;
            }
        };
        if !page.status().is_success() {
            warn!(uri = %redacted, status = page.status().as_u16(), "pagination stopped at non-success page");
            break;
        }
        let Ok(Value::Object(body)) = serde_json::from_slice::<Value>(page.body()) else {
            warn!(uri = %redacted, "pagination stopped at non-json page");
            break;
        };

        let page_items: &[Value] = match body.get("value") {
            Some(Value::Array(values)) => values,
            _ => &[],
        };
        let next_len = grown_len(merged_len, items.len(), page_items);
        if next_len > max_body_bytes {
            warn!(uri = %redacted, limit_bytes = max_body_bytes, "pagination stopped at response size limit");
            break;
        }
        merged_len = next_len;
        pages += 1;
        items.extend(page_items.iter().cloned());
        debug!(uri = %redacted, page = pages, items = items.len(), "fetched page");

        match next_page_link(&body, page.headers()) {
            Some(link) => next = link,
            None => break,
        }
    }

    if items.is_empty() {
        return Ok(None);
    }

    merged.insert("value".to_owned(), Value::Array(items));
    Ok(serde_json::to_vec(&merged)
        .ok()
        .filter(|body| body.len() <= max_body_bytes)
        .map(Bytes::from))
}

fn serialized_len<T: serde::Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value).map_or(usize::MAX, |bytes| bytes.len())
}

// Compact length after appending `values` to an array already holding
// `existing` items: each value plus one separating comma.
fn grown_len(current: usize, existing: usize, values: &[Value]) -> usize {
    values
        .iter()
        .enumerate()
        .fold(current, |total, (offset, value)| {
            let separator = usize::from(existing + offset > 0);
            total
                .saturating_add(serialized_len(value))
                .saturating_add(separator)
        })
}

pub(crate) fn next_page_link(body: &Map<String, Value>, headers: &HeaderMap) -> Option<String> {
    NEXT_LINK_FIELDS
        .iter()
        .find_map(|field| match body.get(*field) {
            Some(Value::String(link)) if !link.trim().is_empty() => Some(link.trim().to_owned()),
            _ => None,
        })
        .or_else(|| {
            headers
                .get_all(LINK)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .find_map(parse_link_header_next)
        })
}

/// Extracts the `rel="next"` target from an RFC 8288 `Link` header value.
pub(crate) fn parse_link_header_next(value: &str) -> Option<String> {
    for link in split_links(value) {
        let mut segments = link.split(';');
        let Some(target) = segments.next().map(str::trim) else {
            continue;
        };
        let Some(target) = target
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
        else {
            continue;
        };
        let is_next = segments.any(|param| {
            let Some((name, rel)) = param.split_once('=') else {
                return false;
            };
            name.trim().eq_ignore_ascii_case("rel")
                && rel
                    .trim()
                    .trim_matches('"')
                    .split_ascii_whitespace()
                    .any(|item| item.eq_ignore_ascii_case("next"))
        });
        if is_next && !target.trim().is_empty() {
            return Some(target.trim().to_owned());
        }
    }
    None
}

// Commas inside `<...>` belong to the URL.
fn split_links(value: &str) -> Vec<&str> {
    let mut links = Vec::new();
    let mut depth = 0_i32;
    let mut in_quotes = false;
    let mut start = 0;
    for (index, character) in value.char_indices() {
        match character {
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth -= 1,
            '"' => in_quotes = !in_quotes,
            ',' if depth <= 0 && !in_quotes => {
                links.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    links.push(&value[start..]);
    links
}

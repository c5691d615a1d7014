//! Bearer token acquisition seam.

use async_trait::async_trait;

use crate::error::BoxError;

/// Supplies access tokens for an OAuth scope.
///
/// Implementations own caching and refresh. The engine calls this once per
/// logical request and once per pagination page.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<String, BoxError>;
}

/// Returns the same pre-acquired token for every scope.
#[derive(Clone, Debug)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _scope: &str) -> Result<String, BoxError> {
        Ok(self.token.clone())
    }
}

/// Tokens are never attached when the caller opted out, already supplied an
/// `Authorization` header, or the target is not `https`.
pub fn should_skip_auth<'a, I>(url: &str, headers: I, no_auth: bool) -> bool
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    if no_auth {
        return true;
    }
    if headers
        .into_iter()
        .any(|(name, _)| name.trim().eq_ignore_ascii_case("authorization"))
    {
        return true;
    }
    match url::Url::parse(url) {
        Ok(parsed) => parsed.scheme() != "https",
        Err(_) => true,
    }
}

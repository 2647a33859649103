use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use std::convert::Infallible;
use uuid::Uuid;

/// Cookie carrying the anonymous visitor identifier.
pub const VISITOR_COOKIE: &str = "visitor_id";

/// How long the visitor cookie stays valid (one year).
const VISITOR_COOKIE_DAYS: i64 = 365;

/// Extractor yielding the anonymous visitor id for click/view attribution.
///
/// Reads the `visitor_id` cookie when present; otherwise mints a fresh UUID
/// and flags it so the handler can set the cookie on the response. Never
/// rejects — visitor identity is best-effort.
pub struct VisitorId {
    pub id: String,
    pub is_new: bool,
}

impl VisitorId {
    /// Build the Set-Cookie value for a freshly minted visitor id.
    pub fn into_cookie(self) -> Cookie<'static> {
        Cookie::build((VISITOR_COOKIE, self.id))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::days(VISITOR_COOKIE_DAYS))
            .build()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for VisitorId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        match jar.get(VISITOR_COOKIE) {
            Some(cookie) if !cookie.value().is_empty() => Ok(VisitorId {
                id: cookie.value().to_owned(),
                is_new: false,
            }),
            _ => Ok(VisitorId {
                id: Uuid::new_v4().to_string(),
                is_new: true,
            }),
        }
    }
}

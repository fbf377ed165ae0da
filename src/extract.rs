//! Request extractors: JSON bodies with structured rejections, and the
//! authenticated caller.
use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;

use crate::app::AppState;
use crate::cookies::ACCESS_COOKIE;
use crate::err::Error;
use crate::models::{Role, User};
use crate::token::KeyRole;

const NOT_LOGGED_IN: &str = "You are not logged in";
const CANNOT_AUTHENTICATE: &str = "Invalid token or session has expired";

/// `Json<T>` whose rejections are reported as `InvalidPayload`.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::invalid(rejection.body_text())),
        }
    }
}

/// The caller, resolved from an access token that verifies *and* has a live
/// session whose user still exists. Every failure is a 401.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn access_token(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers)
        .or_else(|| {
            CookieJar::from_headers(headers)
                .get(ACCESS_COOKIE)
                .map(|cookie| cookie.value().to_string())
        })
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            access_token(&parts.headers).ok_or_else(|| Error::unauthorized(NOT_LOGGED_IN))?;
        let user_id = state
            .tokens
            .verify(&token, KeyRole::Access)
            .and_then(|claims| claims.subject())
            .ok_or_else(|| Error::unauthorized(CANNOT_AUTHENTICATE))?;
        let session = state
            .sessions
            .get(user_id)
            .await?
            .ok_or_else(|| Error::unauthorized(CANNOT_AUTHENTICATE))?;
        let user = state
            .users
            .find_user(session.id)
            .await?
            .ok_or_else(|| Error::unauthorized(CANNOT_AUTHENTICATE))?;
        Ok(Identity { user })
    }
}

impl Identity {
    pub fn require(&self, role: Role) -> Result<(), Error> {
        if self.user.has_role(role) {
            Ok(())
        } else {
            log::debug!("user {} lacks role {}", self.user.id, role);
            Err(Error::forbidden("You are not allowed to perform this action"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("access_token=from-cookie"),
        );
        assert_eq!(access_token(&headers).as_deref(), Some("from-header"));

        headers.remove(AUTHORIZATION);
        assert_eq!(access_token(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn empty_or_foreign_schemes_yield_nothing() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(access_token(&headers), None);

        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("access_token="),
        );
        assert_eq!(access_token(&headers), None);
    }
}

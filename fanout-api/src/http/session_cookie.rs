//! Session identity cookie
//!
//! Every signaling endpoint is keyed by an opaque id carried in a cookie.
//! When the request has none, a fresh id is minted and handed back through
//! `Set-Cookie` by returning the extractor as a response part.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponseParts, ResponseParts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use fanout_sfu::SessionId;
use std::convert::Infallible;

use super::AppState;

/// Longest cookie value accepted as a session id
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub id: SessionId,
    /// Present only when the id was minted for this request
    minted: Option<CookieJar>,
}

fn session_id_from(jar: &CookieJar, name: &str) -> Option<SessionId> {
    jar.get(name)
        .map(|cookie| cookie.value_trimmed())
        .filter(|value| !value.is_empty() && value.len() <= MAX_SESSION_ID_LEN)
        .map(SessionId::new)
}

fn session_cookie(name: &str, id: &SessionId) -> Cookie<'static> {
    Cookie::build((name.to_string(), id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

impl<S> FromRequestParts<S> for SessionCookie
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let cookie_name = &app_state.server.cookie_name;

        let jar = CookieJar::from_headers(&parts.headers);
        if let Some(id) = session_id_from(&jar, cookie_name) {
            return Ok(Self { id, minted: None });
        }

        let id = SessionId::generate();
        tracing::debug!(session_id = %id, "Minted session id");
        let minted = Some(CookieJar::new().add(session_cookie(cookie_name, &id)));
        Ok(Self { id, minted })
    }
}

impl IntoResponseParts for SessionCookie {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        match self.minted {
            Some(jar) => jar.into_response_parts(res),
            None => Ok(res),
        }
    }
}

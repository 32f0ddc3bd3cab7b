//! Anti-forgery protection for state changing requests.
//!
//! Form pages get a random nonce in an `HttpOnly` cookie and a token, which is
//! the nonce signed with HMAC-SHA256. A POST is accepted only when it carries
//! a token matching the nonce cookie, either in the `csrf_token` form field or
//! in the `x-csrf-token` header.

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    Form, RequestPartsExt,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cookie::{Cookie, SameSite};
use hmac::{Hmac, Mac};
use http::request::Parts;
use serde::{de::DeserializeOwned, Deserialize};
use sha2::Sha256;
use tower_cookies::Cookies;
use tracing::{debug, error};

use crate::{error::ApiError, state::AppState};

pub const CSRF_COOKIE_NAME: &str = "livros_csrf";
pub const CSRF_FORM_FIELD: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid HMAC key: {0}")]
    InvalidKey(#[from] hmac::digest::InvalidLength),
}

#[derive(Clone)]
pub struct AntiForgery {
    mac: HmacSha256,
}

impl AntiForgery {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, Error> {
        let mac = HmacSha256::new_from_slice(secret.as_ref())?;
        Ok(Self { mac })
    }

    pub fn new_nonce() -> String {
        URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
    }

    pub fn token(&self, nonce: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(nonce.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, nonce: &str, token: &str) -> bool {
        let Ok(signature) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(nonce.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}

fn nonce_cookie(nonce: String, secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE_NAME, nonce))
        .http_only(true)
        .secure(secure)
        .path("/")
        .same_site(SameSite::Strict)
        .into()
}

async fn request_cookies(parts: &mut Parts) -> Result<Cookies, ApiError> {
    parts.extract::<Cookies>().await.map_err(|e| {
        error!("Cannot get cookies: {}", e.1);
        ApiError::Internal("cookies not available".to_string())
    })
}

/// Token to embed into a rendered form.
///
/// Sets a new nonce cookie when the request has none, so it belongs to GET form routes.
#[derive(Debug, Clone)]
pub struct CsrfToken(pub String);

impl FromRequestParts<AppState> for CsrfToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = request_cookies(parts).await?;
        let nonce = match cookies.get(CSRF_COOKIE_NAME) {
            Some(cookie) => cookie.value().to_string(),
            None => {
                let nonce = AntiForgery::new_nonce();
                cookies.add(nonce_cookie(nonce.clone(), state.config().secure_cookies));
                nonce
            }
        };
        Ok(CsrfToken(state.anti_forgery().token(&nonce)))
    }
}

#[derive(Debug, Deserialize)]
struct WithToken<T> {
    csrf_token: Option<String>,
    #[serde(flatten)]
    inner: T,
}

/// Urlencoded form which passed the anti-forgery check, with the verified token.
///
/// Only fields known to `T` are bound, the rest of the form is ignored.
/// The token stays valid for the request's nonce cookie, so it can be
/// embedded again when the form is rendered back. No cookie is ever set here.
#[derive(Debug, Clone)]
pub struct Protected<T>(pub T, pub CsrfToken);

impl<T> FromRequest<AppState> for Protected<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let cookies = request_cookies(&mut parts).await?;
        let header_token = parts
            .headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let req = Request::from_parts(parts, body);
        let Form(payload) = Form::<WithToken<T>>::from_request(req, state)
            .await
            .map_err(|e| {
                debug!("Invalid form: {e}");
                ApiError::InvalidQuery(e.body_text())
            })?;

        let token = header_token
            .or(payload.csrf_token)
            .ok_or(ApiError::Forbidden("missing anti-forgery token"))?;
        let nonce = cookies
            .get(CSRF_COOKIE_NAME)
            .map(|c| c.value().to_string())
            .ok_or(ApiError::Forbidden("missing anti-forgery cookie"))?;

        if state.anti_forgery().verify(&nonce, &token) {
            Ok(Protected(payload.inner, CsrfToken(token)))
        } else {
            Err(ApiError::Forbidden("invalid anti-forgery token"))
        }
    }
}

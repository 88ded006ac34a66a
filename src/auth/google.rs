use axum::{
    extract::{FromRef, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use super::{handlers::session_cookie, jwt::JwtKeys};
use crate::state::AppState;
use crate::store::{NewUser, Provider, Role, StoreError, User, UserStore};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// The slice of a verified Google identity assertion the bridge needs.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleIdentity {
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("identity assertion did not include an email")]
    IdentityIncomplete,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Redirect the browser into Google's consent screen.
pub async fn login(State(state): State<AppState>) -> Response {
    let google = &state.config.google;
    if google.client_id.is_empty() {
        warn!("google oauth requested but GOOGLE_CLIENT_ID is not configured");
        return redirect_error(&state, "google_auth_failed");
    }

    let url = reqwest::Url::parse_with_params(
        GOOGLE_AUTH_URL,
        &[
            ("client_id", google.client_id.as_str()),
            ("redirect_uri", google.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
            ("prompt", "select_account"),
        ],
    );
    match url {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(e) => {
            error!(error = %e, "failed to build google auth url");
            redirect_error(&state, "google_auth_failed")
        }
    }
}

/// Exchange the code, resolve a local user, start a session. Every failure
/// stage sends the browser back to the frontend with an error code; nothing
/// here answers with an error body.
#[instrument(skip(state, query, jar))]
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    if let Some(reason) = &query.error {
        warn!(%reason, "google auth denied");
        return redirect_error(&state, "google_auth_failed");
    }
    let Some(code) = query.code.as_deref() else {
        return redirect_error(&state, "google_auth_failed");
    };

    let identity = match fetch_identity(&state, code).await {
        Ok(identity) => identity,
        Err(e) => {
            error!(error = %e, "google code exchange failed");
            return redirect_error(&state, "google_auth_failed");
        }
    };

    let user = match resolve_google_user(state.store.as_ref(), &identity).await {
        Ok(user) => user,
        Err(BridgeError::IdentityIncomplete) => {
            warn!(sub = %identity.sub, "google identity without an email");
            return redirect_error(&state, "user_not_found");
        }
        Err(BridgeError::Store(e)) => {
            error!(error = %e, "google user resolution failed");
            return redirect_error(&state, "google_callback_failed");
        }
    };

    let keys = JwtKeys::from_ref(&state);
    let token = match keys.sign(&user) {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "session signing failed after google auth");
            return redirect_error(&state, "google_callback_failed");
        }
    };

    info!(user_id = %user.id, email = %user.email, "google login");
    let dashboard = format!("{}/dashboard", state.config.frontend_url);
    (
        jar.add(session_cookie(token, &state)),
        Redirect::to(&dashboard),
    )
        .into_response()
}

fn redirect_error(state: &AppState, code: &str) -> Response {
    Redirect::to(&format!("{}/login?error={}", state.config.frontend_url, code)).into_response()
}

async fn fetch_identity(state: &AppState, code: &str) -> anyhow::Result<GoogleIdentity> {
    let google = &state.config.google;
    let token: TokenResponse = state
        .http
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("code", code),
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("redirect_uri", google.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let identity = state
        .http
        .get(GOOGLE_USERINFO_URL)
        .bearer_auth(&token.access_token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(identity)
}

/// Create-or-link. A fresh email becomes a new passwordless Google account; a
/// known email without a linked subject gets linked in place, keeping its
/// role and history; an already-linked account passes through unchanged.
/// Calling this twice with the same assertion resolves to the same user.
pub async fn resolve_google_user(
    store: &dyn UserStore,
    identity: &GoogleIdentity,
) -> Result<User, BridgeError> {
    let email = identity
        .email
        .as_deref()
        .ok_or(BridgeError::IdentityIncomplete)?
        .trim()
        .to_lowercase();

    match store.find_by_email(&email).await? {
        None => {
            let user = store
                .create(NewUser {
                    username: identity.name.clone(),
                    email,
                    password_hash: String::new(),
                    provider: Provider::Google,
                    google_id: Some(identity.sub.clone()),
                    role: Role::User,
                })
                .await?;
            info!(user_id = %user.id, "created user from google identity");
            Ok(user)
        }
        Some(mut user) if user.google_id.is_none() => {
            user.google_id = Some(identity.sub.clone());
            user.provider = Provider::Google;
            let user = store.save(&user).await?;
            info!(user_id = %user.id, "linked google identity to existing account");
            Ok(user)
        }
        Some(user) => Ok(user),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, UserFilter};

    fn identity(email: Option<&str>) -> GoogleIdentity {
        GoogleIdentity {
            sub: "google-sub-1".into(),
            email: email.map(Into::into),
            name: Some("Ann Example".into()),
        }
    }

    #[tokio::test]
    async fn missing_email_creates_nothing() {
        let store = MemStore::new();
        let err = resolve_google_user(&store, &identity(None))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::IdentityIncomplete));
        assert_eq!(store.count(UserFilter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn first_assertion_creates_a_passwordless_google_user() {
        let store = MemStore::new();
        let user = resolve_google_user(&store, &identity(Some("A@X.com")))
            .await
            .unwrap();

        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.provider, Provider::Google);
        assert_eq!(user.google_id.as_deref(), Some("google-sub-1"));
        assert!(user.password_hash.is_empty());
        assert_eq!(user.role, Role::User);
        assert_eq!(user.username.as_deref(), Some("Ann Example"));
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let store = MemStore::new();
        let first = resolve_google_user(&store, &identity(Some("a@x.com")))
            .await
            .unwrap();
        let second = resolve_google_user(&store, &identity(Some("a@x.com")))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.count(UserFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn linking_preserves_the_existing_role() {
        let store = MemStore::new();
        let existing = store
            .create(NewUser {
                username: Some("root".into()),
                email: "a@x.com".into(),
                password_hash: "hash".into(),
                provider: Provider::Local,
                google_id: None,
                role: Role::Admin,
            })
            .await
            .unwrap();

        let linked = resolve_google_user(&store, &identity(Some("a@x.com")))
            .await
            .unwrap();

        assert_eq!(linked.id, existing.id);
        assert_eq!(linked.role, Role::Admin);
        assert_eq!(linked.provider, Provider::Google);
        assert_eq!(linked.google_id.as_deref(), Some("google-sub-1"));
        // The local hash stays; linking never erases credentials.
        assert_eq!(linked.password_hash, "hash");
        assert_eq!(store.count(UserFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn already_linked_account_passes_through_unchanged() {
        let store = MemStore::new();
        let first = resolve_google_user(&store, &identity(Some("a@x.com")))
            .await
            .unwrap();

        let mut changed = identity(Some("a@x.com"));
        changed.sub = "some-other-sub".into();
        let resolved = resolve_google_user(&store, &changed).await.unwrap();

        assert_eq!(resolved.id, first.id);
        assert_eq!(resolved.google_id.as_deref(), Some("google-sub-1"));
    }
}

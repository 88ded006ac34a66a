use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use lazy_static::lazy_static;
use regex::Regex;
use time::Duration;
use tracing::{info, instrument, warn};

use super::{
    dto::{LoginRequest, LoginResponse, MeResponse, MessageResponse, SessionUser, SignupRequest},
    extractors::{AuthUser, SESSION_COOKIE},
    google,
    jwt::JwtKeys,
    password,
};
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{NewUser, Provider, Role, UserStore};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", get(logout))
        .route("/auth/me", get(me))
        .route("/auth/google", get(google::login))
        .route("/auth/google/callback", get(google::callback))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

const PASSWORD_SYMBOLS: &str = "@$!%*?&";

/// At least 6 characters with an uppercase letter, a lowercase letter, a
/// digit, and a symbol, drawn only from the allowed charset.
pub(crate) fn is_strong_password(password: &str) -> bool {
    password.len() >= 6
        && password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SYMBOLS.contains(c))
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SYMBOLS.contains(c))
}

pub(crate) fn session_cookie(token: String, state: &AppState) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(state.config.secure_cookies)
        .same_site(SameSite::Strict)
        .max_age(Duration::hours(state.config.jwt.ttl_hours))
        .build()
}

fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .max_age(Duration::ZERO)
        .build()
}

#[instrument(skip(state, payload))]
async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let (Some(username), Some(email), Some(password)) =
        (payload.username, payload.email, payload.password)
    else {
        return Err(ApiError::Validation("All fields are required.".into()));
    };
    let email = email.trim().to_lowercase();

    if username.len() < 3 {
        return Err(ApiError::Validation(
            "Username must be at least 3 characters long.".into(),
        ));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::Validation(
            "Please provide a valid email address.".into(),
        ));
    }
    if !is_strong_password(&password) {
        return Err(ApiError::Validation(
            "Password must be at least 6 characters and include uppercase, lowercase, number, and symbol."
                .into(),
        ));
    }

    let hash = password::hash_password(&password)?;
    let user = state
        .store
        .create(NewUser {
            username: Some(username),
            email,
            password_hash: hash,
            provider: Provider::Local,
            google_id: None,
            role: Role::User,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    // No auto-login: the client logs in explicitly afterwards.
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::ok("Account created successfully! Please login.")),
    ))
}

#[instrument(skip(state, payload, jar))]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let (Some(email), Some(password)) = (payload.email, payload.password) else {
        return Err(ApiError::Validation(
            "Email and password are required.".into(),
        ));
    };
    let email = email.trim().to_lowercase();

    if !is_valid_email(&email) {
        return Err(ApiError::Validation(
            "Please provide a valid email address.".into(),
        ));
    }

    // One message for unknown email and wrong password.
    let user = state
        .store
        .find_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::Validation("Invalid email or password.".into()))?;

    if user.provider == Provider::Google || user.password_hash.is_empty() {
        warn!(user_id = %user.id, "password login against a Google account");
        return Err(ApiError::Validation(
            "This account uses Google login. Please use 'Login with Google'.".into(),
        ));
    }

    if !password::verify_password(&password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Validation("Invalid email or password.".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(&user)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok((
        jar.add(session_cookie(token, &state)),
        Json(LoginResponse {
            success: true,
            message: "Login successful!".into(),
            user: SessionUser::from(&user),
        }),
    ))
}

/// Sessions are held entirely client-side, so logout only clears the cookie.
/// An already-issued token stays valid until its expiry.
async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    (
        jar.add(clear_session_cookie()),
        Json(MessageResponse::ok("Logged out successfully")),
    )
}

async fn me(AuthUser(claims): AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        success: true,
        user: SessionUser::from(&claims),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@sub.domain.org"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email("@x.com"));
    }

    #[test]
    fn password_strength() {
        assert!(is_strong_password("Abcdef1!"));
        assert!(is_strong_password("aB3$cd"));
        // too short
        assert!(!is_strong_password("aB3$c"));
        // missing classes
        assert!(!is_strong_password("abcdef1!"));
        assert!(!is_strong_password("ABCDEF1!"));
        assert!(!is_strong_password("Abcdefg!"));
        assert!(!is_strong_password("Abcdefg1"));
        // character outside the allowed charset
        assert!(!is_strong_password("Abcdef1!#"));
    }

    #[test]
    fn session_cookie_attributes() {
        let state = AppState::for_tests();
        let cookie = session_cookie("token".into(), &state);
        assert_eq!(cookie.name(), "accessToken");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(86400)));
        assert_eq!(cookie.path(), Some("/"));
    }

    fn signup_body(username: &str, email: &str, password: &str) -> SignupRequest {
        SignupRequest {
            username: Some(username.into()),
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    fn login_body(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    #[tokio::test]
    async fn signup_then_login_sets_a_verifiable_session_cookie() {
        let state = AppState::for_tests();

        let (status, body) = signup(
            State(state.clone()),
            Json(signup_body("ann", "a@x.com", "Abcdef1!")),
        )
        .await
        .expect("signup");
        assert_eq!(status, StatusCode::CREATED);
        assert!(body.success);

        let (jar, response) = login(
            State(state.clone()),
            CookieJar::new(),
            Json(login_body("a@x.com", "Abcdef1!")),
        )
        .await
        .expect("login");
        assert!(response.success);
        assert_eq!(response.user.email, "a@x.com");
        assert_eq!(response.user.role, Role::User);

        let cookie = jar.get(SESSION_COOKIE).expect("session cookie set");
        let keys = JwtKeys::from_ref(&state);
        let claims = keys.verify(cookie.value()).expect("cookie holds a valid token");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.username.as_deref(), Some("ann"));
        assert_eq!(claims.role, Role::User);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_without_a_cookie() {
        let state = AppState::for_tests();
        signup(
            State(state.clone()),
            Json(signup_body("ann", "a@x.com", "Abcdef1!")),
        )
        .await
        .expect("signup");

        let err = login(
            State(state.clone()),
            CookieJar::new(),
            Json(login_body("a@x.com", "Wrong1!x")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts_and_leaves_the_store_unchanged() {
        use crate::store::UserFilter;

        let state = AppState::for_tests();
        signup(
            State(state.clone()),
            Json(signup_body("ann", "a@x.com", "Abcdef1!")),
        )
        .await
        .expect("first signup");

        let err = signup(
            State(state.clone()),
            Json(signup_body("other", "a@x.com", "Ghijkl2$")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(state.store.count(UserFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn weak_input_never_reaches_the_store() {
        use crate::store::UserFilter;

        let state = AppState::for_tests();
        for (username, email, password) in [
            ("ab", "a@x.com", "Abcdef1!"),
            ("ann", "bad-email", "Abcdef1!"),
            ("ann", "a@x.com", "weak"),
            ("ann", "a@x.com", "abcdef1!"),
        ] {
            let err = signup(
                State(state.clone()),
                Json(signup_body(username, email, password)),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)));
        }
        assert_eq!(state.store.count(UserFilter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn google_accounts_cannot_password_login() {
        use crate::store::NewUser;

        let state = AppState::for_tests();
        state
            .store
            .create(NewUser {
                username: Some("gee".into()),
                email: "g@x.com".into(),
                password_hash: String::new(),
                provider: Provider::Google,
                google_id: Some("sub-1".into()),
                role: Role::User,
            })
            .await
            .expect("seed google user");

        let err = login(
            State(state.clone()),
            CookieJar::new(),
            Json(login_body("g@x.com", "Abcdef1!")),
        )
        .await
        .unwrap_err();
        match err {
            ApiError::Validation(message) => assert!(message.contains("Google")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn logout_expires_the_cookie() {
        let (jar, body) = logout(CookieJar::new()).await;
        assert!(body.success);
        let cookie = jar.get(SESSION_COOKIE).expect("clearing cookie present");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
        assert_eq!(cookie.value(), "");
    }
}

use axum::{
    extract::{FromRef, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, MessageResponse, RegisterRequest, TokenResponse},
        services::{hash_password, validate_login, validate_register, verify_password, JwtKeys},
    },
    error::{success, ApiError, Data},
    state::AppState,
};

const ACTIVATION_NOTICE: &str =
    "activation email sent, please follow the link in it to activate your account before logging in";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/refresh", post(refresh))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<Data<TokenResponse>>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    validate_login(&payload)?;

    let user = match state.store.find_by_email(&payload.email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %payload.email, "login unknown email");
            return Err(ApiError::Unauthorized("authentication failed".into()));
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(ApiError::Internal("bad parameters".into()));
        }
    };

    let ok = match verify_password(&payload.password, &user.password_hash) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "verify_password failed");
            return Err(ApiError::Internal("bad parameters".into()));
        }
    };
    if !ok {
        warn!(email = %payload.email, user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized("authentication failed".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let token = match keys.sign(user.id) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "jwt sign failed");
            return Err(ApiError::Internal("bad parameters".into()));
        }
    };

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(success(TokenResponse::bearer(token, keys.expires_in())))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<Json<Data<MessageResponse>>, ApiError> {
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();
    validate_register(&payload)?;

    // Uniqueness checks against the store; the unique indexes are the backstop
    // for the pre-check race.
    match state.store.find_by_username(&payload.username).await {
        Ok(Some(_)) => {
            warn!(username = %payload.username, "username already taken");
            return Err(ApiError::InvalidInput("username already taken".into()));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "find_by_username failed");
            return Err(ApiError::Internal(e.to_string()));
        }
    }
    match state.store.find_by_email(&payload.email).await {
        Ok(Some(_)) => {
            warn!(email = %payload.email, "email already registered");
            return Err(ApiError::InvalidInput("email already taken".into()));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(ApiError::Internal(e.to_string()));
        }
    }

    let hash = match hash_password(&payload.password) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "hash_password failed");
            return Err(ApiError::Internal(e.to_string()));
        }
    };

    let user = match state
        .store
        .create(&payload.username, &payload.email, &hash)
        .await
    {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(ApiError::Internal(e.to_string()));
        }
    };

    info!(user_id = %user.id, username = %user.username, email = %user.email, "user registered");
    Ok(success(MessageResponse {
        message: ACTIVATION_NOTICE.into(),
    }))
}

#[instrument(skip(state, headers))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Data<TokenResponse>>, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("token not provided".into()))?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.refresh(token).map_err(|e| {
        warn!(error = %e, "token refresh rejected");
        ApiError::Unauthorized("token invalid".into())
    })?;

    Ok(success(TokenResponse::bearer(token, keys.expires_in())))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> RegisterRequest {
        RegisterRequest {
            username: "alice".into(),
            email: "a@x.com".into(),
            password: "secret1".into(),
            password_confirmation: "secret1".into(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    async fn state_with_alice() -> AppState {
        let state = AppState::fake();
        register(State(state.clone()), Json(alice()))
            .await
            .expect("register alice");
        state
    }

    #[tokio::test]
    async fn register_then_login_issues_token() {
        let state = state_with_alice().await;

        let response = login(State(state.clone()), Json(login_request("a@x.com", "secret1")))
            .await
            .expect("login succeeds");
        let body = response.0.data;
        assert_eq!(body.token_type, "bearer");
        // fake config: ttl is 5 minutes
        assert_eq!(body.expires_in, 300);

        let keys = JwtKeys::from_ref(&state);
        let claims = keys.verify(&body.token).expect("token verifies");
        let stored = state
            .store
            .find_by_email("a@x.com")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(claims.sub, stored.id);
    }

    #[tokio::test]
    async fn register_returns_activation_message() {
        let state = AppState::fake();
        let response = register(State(state), Json(alice()))
            .await
            .expect("register succeeds");
        assert!(response.0.data.message.contains("activation email sent"));
    }

    #[tokio::test]
    async fn register_stores_hash_not_plaintext() {
        let state = state_with_alice().await;
        let stored = state
            .store
            .find_by_email("a@x.com")
            .await
            .expect("find")
            .expect("present");
        assert_ne!(stored.password_hash, "secret1");
        assert!(verify_password("secret1", &stored.password_hash).expect("verify"));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_username_and_email() {
        let state = state_with_alice().await;
        let original = state
            .store
            .find_by_username("alice")
            .await
            .expect("find")
            .expect("present");

        let mut dup = alice();
        dup.email = "other@x.com".into();
        let err = register(State(state.clone()), Json(dup)).await.unwrap_err();
        assert_eq!(err.to_string(), "username already taken");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

        let mut dup = alice();
        dup.username = "bob".into();
        let err = register(State(state.clone()), Json(dup)).await.unwrap_err();
        assert_eq!(err.to_string(), "email already taken");

        // no new row appeared under either key
        let still = state
            .store
            .find_by_username("alice")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(still.id, original.id);
        assert!(state
            .store
            .find_by_username("bob")
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn register_rejects_bad_shape() {
        let state = AppState::fake();
        let mut payload = alice();
        payload.password_confirmation = "different".into();
        let err = register(State(state), Json(payload)).await.unwrap_err();
        assert_eq!(err.to_string(), "password confirmation does not match");
    }

    #[tokio::test]
    async fn login_validates_before_touching_the_store() {
        // empty store: a shape failure must surface as 400, not 401
        let state = AppState::fake();
        let err = login(State(state), Json(login_request("a@x.com", "12345")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert_eq!(err.to_string(), "password must be at least 6 characters");
    }

    #[tokio::test]
    async fn login_rejects_unknown_email() {
        let state = AppState::fake();
        let err = login(State(state), Json(login_request("a@x.com", "secret1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(err.to_string(), "authentication failed");
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let state = state_with_alice().await;
        let err = login(State(state), Json(login_request("a@x.com", "wrong-pass")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(err.to_string(), "authentication failed");
    }

    #[tokio::test]
    async fn refresh_requires_a_token() {
        let state = AppState::fake();
        let err = refresh(State(state), HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "token not provided");
    }

    #[tokio::test]
    async fn refresh_rejects_invalid_token() {
        let state = AppState::fake();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer not.a.token".parse().unwrap(),
        );
        let err = refresh(State(state), headers).await.unwrap_err();
        assert_eq!(err.to_string(), "token invalid");
    }

    #[tokio::test]
    async fn refresh_rotates_a_valid_token() {
        let state = state_with_alice().await;
        let response = login(State(state.clone()), Json(login_request("a@x.com", "secret1")))
            .await
            .expect("login");
        let old_token = response.0.data.token;

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", old_token).parse().unwrap(),
        );
        let response = refresh(State(state.clone()), headers)
            .await
            .expect("refresh succeeds");
        let body = response.0.data;
        assert_eq!(body.token_type, "bearer");
        assert_eq!(body.expires_in, 300);

        let keys = JwtKeys::from_ref(&state);
        let claims = keys.verify(&body.token).expect("rotated token verifies");
        let old_claims = keys.verify(&old_token).expect("old token still within ttl");
        assert_eq!(claims.sub, old_claims.sub);
    }
}

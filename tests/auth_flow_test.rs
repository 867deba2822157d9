// ABOUTME: End-to-end authentication flows over keys, tokens, sessions and rate limits
// ABOUTME: Login, bearer authentication, refresh, logout, password reset and email verification
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::{AuthFixture, TEST_USER_EMAIL, TEST_USER_ID};
use trustgate::auth::UserRecord;
use trustgate::errors::{AppError, ErrorCode};
use trustgate::sessions::SessionMetadata;
use trustgate::tokens::TokenPayload;

const CLIENT: &str = "198.51.100.20";

fn device(fingerprint: &str) -> SessionMetadata {
    SessionMetadata {
        device_name: "Firefox (Linux)".into(),
        device_fingerprint: fingerprint.into(),
        ip_address: CLIENT.into(),
        user_agent: "Mozilla/5.0".into(),
        trust_score: 5,
        ..SessionMetadata::default()
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[tokio::test]
async fn test_login_refresh_logout_lifecycle() {
    let fixture = AuthFixture::new().await;
    let auth = &fixture.auth;
    let user = fixture.user();

    let pair = auth
        .login(CLIENT, device("fp-laptop"), move || async move { Ok(user) })
        .await
        .unwrap();
    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 3600);
    assert_eq!(pair.user_id, TEST_USER_ID);

    let claims = auth
        .authenticate(Some(&bearer(&pair.access_token)))
        .await
        .unwrap();
    assert_eq!(claims.sub, TEST_USER_ID);
    assert_eq!(claims.payload.session_id(), Some(pair.session_id.as_str()));

    let grant = auth
        .refresh(CLIENT, &pair.refresh_token, Some("fp-laptop"))
        .await
        .unwrap();
    auth.authenticate(Some(&bearer(&grant.access_token)))
        .await
        .unwrap();

    let session = auth.ledger().find_by_id(&pair.session_id).await.unwrap();
    assert!(session.last_used_at.is_some());

    auth.logout(&pair.session_id).await.unwrap();
    let err = auth
        .refresh(CLIENT, &pair.refresh_token, Some("fp-laptop"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SessionRevoked);
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let fixture = AuthFixture::new().await;
    let pair = fixture
        .auth
        .issue_session(&fixture.user(), device("fp"))
        .await
        .unwrap();

    let err = fixture
        .auth
        .authenticate(Some(&bearer(&pair.refresh_token)))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);

    let err = fixture
        .auth
        .refresh(CLIENT, &pair.access_token, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_authenticate_header_errors() {
    let fixture = AuthFixture::new().await;

    let err = fixture.auth.authenticate(None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthRequired);

    let err = fixture
        .auth
        .authenticate(Some("Token abc"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthMalformed);

    let err = fixture
        .auth
        .authenticate(Some("Bearer not-a-jwt"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_login_failures_hit_the_rate_limit() {
    let fixture = AuthFixture::new().await;
    let auth = &fixture.auth;
    let effective = auth
        .limiter()
        .policy(trustgate::rate_limiting::PolicyKind::Login)
        .effective_limit();

    for _ in 0..effective {
        let err = auth
            .login(CLIENT, device("fp"), || async {
                Err(AppError::auth_invalid("Invalid credentials"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthInvalid);
    }

    // correct credentials are refused while the client is over the limit
    let user = fixture.user();
    let err = auth
        .login(CLIENT, device("fp"), move || async move { Ok(user) })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    assert_eq!(err.http_status(), 429);

    // other clients are unaffected
    let user = fixture.user();
    auth.login("198.51.100.99", device("fp"), move || async move { Ok(user) })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_successful_login_clears_failed_attempts() {
    let fixture = AuthFixture::new().await;
    let auth = &fixture.auth;

    for _ in 0..3 {
        let _ = auth
            .login(CLIENT, device("fp"), || async {
                Err(AppError::auth_invalid("Invalid credentials"))
            })
            .await;
    }
    let user = fixture.user();
    auth.login(CLIENT, device("fp"), move || async move { Ok(user) })
        .await
        .unwrap();

    // the quota is whole again
    for _ in 0..3 {
        let err = auth
            .login(CLIENT, device("fp"), || async {
                Err(AppError::auth_invalid("Invalid credentials"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthInvalid);
    }
}

#[tokio::test]
async fn test_refresh_from_another_device_rejected() {
    let fixture = AuthFixture::new().await;
    let pair = fixture
        .auth
        .issue_session(&fixture.user(), device("fp-laptop"))
        .await
        .unwrap();

    let err = fixture
        .auth
        .refresh(CLIENT, &pair.refresh_token, Some("fp-phone"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);

    // no fingerprint presented is accepted
    fixture
        .auth
        .refresh(CLIENT, &pair.refresh_token, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_inactive_user_cannot_login_or_refresh() {
    let fixture = AuthFixture::new().await;
    let pair = fixture
        .auth
        .issue_session(&fixture.user(), device("fp"))
        .await
        .unwrap();

    assert!(fixture.users.set_active(TEST_USER_ID, false).await);

    let err = fixture
        .auth
        .refresh(CLIENT, &pair.refresh_token, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);

    let mut inactive = fixture.user();
    inactive.is_active = false;
    let err = fixture
        .auth
        .login(CLIENT, device("fp"), move || async move { Ok(inactive) })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_unverified_email_blocks_login() {
    let fixture = AuthFixture::new().await;
    let user = UserRecord {
        email_verified: false,
        ..fixture.user()
    };

    let err = fixture
        .auth
        .login(CLIENT, device("fp"), move || async move { Ok(user) })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_password_reset_revokes_every_session() {
    let fixture = AuthFixture::new().await;
    let auth = &fixture.auth;

    let laptop = auth
        .issue_session(&fixture.user(), device("fp-laptop"))
        .await
        .unwrap();
    let phone = auth
        .issue_session(&fixture.user(), device("fp-phone"))
        .await
        .unwrap();

    let token = auth
        .request_password_reset(CLIENT, &TEST_USER_EMAIL.to_uppercase())
        .await
        .unwrap()
        .unwrap();
    let claims = auth.complete_password_reset(&token).await.unwrap();
    assert_eq!(claims.sub, TEST_USER_ID);
    assert_eq!(
        claims.payload,
        TokenPayload::PasswordReset {
            email: TEST_USER_EMAIL.to_owned()
        }
    );

    for pair in [&laptop, &phone] {
        let err = auth
            .refresh(CLIENT, &pair.refresh_token, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionRevoked);
    }
    assert!(auth
        .ledger()
        .list_active_for_user(TEST_USER_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_password_reset_for_unknown_email_yields_nothing() {
    let fixture = AuthFixture::new().await;

    let token = fixture
        .auth
        .request_password_reset(CLIENT, "nobody@example.com")
        .await
        .unwrap();
    assert!(token.is_none());
}

#[tokio::test]
async fn test_reset_token_cannot_authenticate() {
    let fixture = AuthFixture::new().await;
    let token = fixture
        .auth
        .request_password_reset(CLIENT, TEST_USER_EMAIL)
        .await
        .unwrap()
        .unwrap();

    let err = fixture
        .auth
        .authenticate(Some(&bearer(&token)))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);

    let err = fixture.auth.verify_email(&token).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_email_verification_round_trip() {
    let fixture = AuthFixture::new().await;
    let token = fixture
        .auth
        .issue_email_verification(&fixture.user())
        .await
        .unwrap();

    let claims = fixture.auth.verify_email(&token).await.unwrap();
    assert_eq!(claims.sub, TEST_USER_ID);
    assert_eq!(
        claims.payload,
        TokenPayload::EmailVerification {
            email: TEST_USER_EMAIL.to_owned()
        }
    );

    let err = fixture
        .auth
        .complete_password_reset(&token)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_tokens_survive_key_rotation() {
    let fixture = AuthFixture::new().await;
    let pair = fixture
        .auth
        .issue_session(&fixture.user(), device("fp"))
        .await
        .unwrap();

    fixture.keys.rotator.rotate().await.unwrap();

    fixture
        .auth
        .authenticate(Some(&bearer(&pair.access_token)))
        .await
        .unwrap();
    fixture
        .auth
        .refresh(CLIENT, &pair.refresh_token, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_revoke_all_sessions_counts_live_sessions() {
    let fixture = AuthFixture::new().await;
    for fp in ["a", "b", "c"] {
        fixture
            .auth
            .issue_session(&fixture.user(), device(fp))
            .await
            .unwrap();
    }

    assert_eq!(
        fixture.auth.revoke_all_sessions(TEST_USER_ID).await.unwrap(),
        3
    );
    assert_eq!(
        fixture.auth.revoke_all_sessions(TEST_USER_ID).await.unwrap(),
        0
    );
}

// ABOUTME: Integration tests for RS256 token issuance and verification
// ABOUTME: Covers round trips, expiry at an injected clock, type confusion and forged tokens
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use common::{KeyFixture, TEST_ISSUER, TEST_TIMEOUT};
use trustgate::errors::ErrorCode;
use trustgate::tokens::{is_verification_failure, TokenCodec, TokenPayload, TokenType};

#[tokio::test]
async fn test_round_trip_preserves_subject_and_type() {
    let fixture = KeyFixture::with_active_key().await;
    let codec = fixture.codec();

    let payloads = [
        TokenPayload::Access {
            session_id: Some("ses_1".into()),
        },
        TokenPayload::Refresh {
            session_id: "ses_1".into(),
        },
        TokenPayload::EmailVerification {
            email: "ada@example.com".into(),
        },
        TokenPayload::PasswordReset {
            email: "ada@example.com".into(),
        },
    ];

    for payload in payloads {
        let expected = payload.token_type();
        let token = codec
            .issue("usr_1", payload.clone(), Duration::hours(1))
            .await
            .unwrap();
        let claims = codec.verify(&token, expected).await.unwrap();

        assert_eq!(claims.sub, "usr_1");
        assert_eq!(claims.iss, TEST_ISSUER);
        assert_eq!(claims.payload, payload);
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(!claims.jti.is_empty());
    }
}

#[tokio::test]
async fn test_access_token_expires_after_ttl() {
    let fixture = KeyFixture::with_active_key().await;
    let codec = fixture.codec();
    let t0 = Utc::now();

    let token = codec
        .issue_at(
            "usr_1",
            TokenPayload::Access { session_id: None },
            Duration::hours(1),
            t0,
        )
        .await
        .unwrap();

    codec
        .verify_at(&token, TokenType::Access, t0 + Duration::minutes(30))
        .await
        .unwrap();

    let err = codec
        .verify_at(&token, TokenType::Access, t0 + Duration::minutes(61))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthExpired);
}

#[tokio::test]
async fn test_refresh_token_rejected_as_access_token() {
    let fixture = KeyFixture::with_active_key().await;
    let codec = fixture.codec();

    let refresh = codec
        .issue(
            "usr_1",
            TokenPayload::Refresh {
                session_id: "ses_1".into(),
            },
            Duration::days(7),
        )
        .await
        .unwrap();

    let err = codec.verify(&refresh, TokenType::Access).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
    assert!(is_verification_failure(&err));
}

#[tokio::test]
async fn test_issue_without_active_key_fails_closed() {
    let fixture = KeyFixture::empty(5).await;
    let err = fixture
        .codec()
        .issue(
            "usr_1",
            TokenPayload::Access { session_id: None },
            Duration::hours(1),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NoActiveKey);
}

#[tokio::test]
async fn test_foreign_issuer_rejected() {
    let fixture = KeyFixture::with_active_key().await;
    let foreign = TokenCodec::new(fixture.rotator.clone(), "someone-else", TEST_TIMEOUT);

    let token = foreign
        .issue(
            "usr_1",
            TokenPayload::Access { session_id: None },
            Duration::hours(1),
        )
        .await
        .unwrap();

    let err = fixture
        .codec()
        .verify(&token, TokenType::Access)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_token_from_another_key_directory_rejected() {
    let ours = KeyFixture::with_active_key().await;
    let theirs = KeyFixture::with_active_key().await;

    let token = theirs
        .codec()
        .issue(
            "usr_1",
            TokenPayload::Access { session_id: None },
            Duration::hours(1),
        )
        .await
        .unwrap();

    let err = ours
        .codec()
        .verify(&token, TokenType::Access)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    let fixture = KeyFixture::with_active_key().await;
    let codec = fixture.codec();
    let token = codec
        .issue(
            "usr_1",
            TokenPayload::Access { session_id: None },
            Duration::hours(1),
        )
        .await
        .unwrap();

    let mut parts: Vec<String> = token.split('.').map(str::to_owned).collect();
    let mut claims: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&parts[1]).unwrap()).unwrap();
    claims["sub"] = "usr_admin".into();
    parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    let forged = parts.join(".");

    let err = codec.verify(&forged, TokenType::Access).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_malformed_tokens_share_one_message() {
    let fixture = KeyFixture::with_active_key().await;
    let codec = fixture.codec();

    let header_without_kid = format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#)
    );
    let hs256 = format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT","kid":"k"}"#),
        URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#)
    );
    let unknown_kid = format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT","kid":"key_20000101_000000"}"#),
        URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#)
    );

    for token in [
        "",
        "garbage",
        "a.b.c",
        header_without_kid.as_str(),
        hs256.as_str(),
        unknown_kid.as_str(),
    ] {
        let err = codec.verify(token, TokenType::Access).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthInvalid, "token {token:?}");
        assert_eq!(err.message, "Invalid token");
    }
}

#[tokio::test]
async fn test_header_names_signing_key() {
    let fixture = KeyFixture::with_active_key().await;
    let active = fixture.rotator.active_key().await.unwrap();
    let token = fixture
        .codec()
        .issue(
            "usr_1",
            TokenPayload::Access { session_id: None },
            Duration::hours(1),
        )
        .await
        .unwrap();

    let header = jsonwebtoken::decode_header(&token).unwrap();
    assert_eq!(header.alg, jsonwebtoken::Algorithm::RS256);
    assert_eq!(header.kid, Some(active.kid));
}

#[tokio::test]
async fn test_unrepresentable_lifetime_rejected() {
    let fixture = KeyFixture::with_active_key().await;
    let codec = fixture.codec();

    let err = codec
        .issue(
            "usr_1",
            TokenPayload::Access { session_id: None },
            Duration::MAX,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    // the codec stays usable
    codec
        .issue(
            "usr_1",
            TokenPayload::Access { session_id: None },
            Duration::hours(1),
        )
        .await
        .unwrap();
}

// ABOUTME: Library entry point for the trustgate token-trust core
// ABOUTME: RS256 keys with live rotation, refresh-token sessions and distributed rate limiting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

#![deny(unsafe_code)]

//! # Trustgate
//!
//! The token-trust layer of an authentication service, without the HTTP
//! framework around it.
//!
//! ## Components
//!
//! - **Keys**: RSA signing keys persisted as PEM files, rotated on a cron
//!   schedule, published as a JWKS document
//! - **Tokens**: RS256 tokens whose header `kid` selects the verification key
//! - **Sessions**: server-side anchors for refresh tokens, revocable at any time
//! - **Rate limiting**: fixed-window counters in Redis or in process, failing open
//! - **Auth**: login, refresh and bearer authentication flows over the above
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trustgate::auth::{AuthService, InMemoryUserDirectory};
//! use trustgate::config::TrustConfig;
//! use trustgate::errors::AppResult;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let config = TrustConfig::from_env()?;
//!     let users = Arc::new(InMemoryUserDirectory::new());
//!     let auth = AuthService::from_config(&config, users).await?;
//!
//!     let claims = auth.authenticate(Some("Bearer eyJ...")).await;
//!     println!("authenticated: {}", claims.is_ok());
//!     Ok(())
//! }
//! ```

/// Authentication flows
pub mod auth;

/// Environment configuration
pub mod config;

/// Signing key storage, rotation and change notification
pub mod keys;

/// Structured logging setup
pub mod logging;

/// Fixed-window rate limiting
pub mod rate_limiting;

/// Refresh-token session ledger
pub mod sessions;

/// RS256 token codec
pub mod tokens;

/// Shared constants
pub use trustgate_core::constants;

/// Unified error handling with standard error codes and HTTP statuses
pub use trustgate_core::errors;

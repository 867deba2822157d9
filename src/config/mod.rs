// ABOUTME: Configuration module for the token-trust services
// ABOUTME: Environment-driven settings for keys, tokens, sessions and rate limiting
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

//! Configuration module
//!
//! All settings come from environment variables; see [`environment::TrustConfig::from_env`].

/// Environment configuration
pub mod environment;

pub use environment::{KeyConfig, RateLimitConfig, SessionConfig, TokenConfig, TrustConfig};

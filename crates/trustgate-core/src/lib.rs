// ABOUTME: Core types and constants for the trustgate token-trust subsystem
// ABOUTME: Foundation crate with error handling and shared defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

#![deny(unsafe_code)]

//! # Trustgate Core
//!
//! Foundation crate providing the shared error type and default values for the
//! trustgate token-trust subsystem. It changes rarely, so the main crate gets
//! incremental compilation benefits from keeping it separate.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode` and `ErrorResponse`
//! - **constants**: Defaults for keys, tokens, sessions and rate limiting

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Default values organized by domain
pub mod constants;

pub use errors::{AppError, AppResult, ErrorCode, ErrorResponse};

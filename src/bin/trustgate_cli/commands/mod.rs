// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org
// ABOUTME: Re-exports command modules for trustgate-cli
// ABOUTME: Key management, session maintenance and the long-running maintenance loop

pub mod keys;
pub mod run;
pub mod sessions;

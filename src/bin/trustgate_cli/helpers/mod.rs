// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org
// ABOUTME: Re-exports helper modules for trustgate-cli
// ABOUTME: Provides display formatting utilities

pub mod display;

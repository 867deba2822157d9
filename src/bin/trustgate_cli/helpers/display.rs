// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org
// ABOUTME: Output formatting helpers for trustgate-cli
// ABOUTME: Tabular key listings and rotation summaries

use trustgate::keys::SigningKey;

/// Print one row per key, oldest first
pub fn display_key_table(keys: &[SigningKey]) {
    if keys.is_empty() {
        println!("No signing keys found.");
        return;
    }

    println!("{:<32} {:<25} {:>6}  STATUS", "KEY ID", "CREATED (UTC)", "BITS");
    println!("{}", "=".repeat(76));
    for key in keys {
        println!(
            "{:<32} {:<25} {:>6}  {}",
            key.kid,
            key.created_at.format("%Y-%m-%d %H:%M:%S"),
            key.material().bits(),
            if key.active { "active" } else { "retired" }
        );
    }
    println!("\n{} key(s)", keys.len());
}

/// Print the outcome of a rotation
pub fn display_rotation(kid: &str, retained: &[SigningKey]) {
    println!("\nKey rotation complete");
    println!("{}", "=".repeat(50));
    println!("   Active key: {kid}");
    println!("   Retained keys: {}", retained.len());
    println!("\nTokens signed by retired keys stay valid until those keys are pruned.");
}

/// Print the key ids removed by a cleanup
pub fn display_removed(removed: &[String]) {
    if removed.is_empty() {
        println!("Nothing to remove.");
        return;
    }
    println!("Removed {} key(s):", removed.len());
    for kid in removed {
        println!("   {kid}");
    }
}

// ABOUTME: RSA signing key material, key identifiers and JWKS representation
// ABOUTME: Shared by the key store, the rotator and the token codec
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

//! Signing Key Management
//!
//! This module provides:
//! - RSA key material for RS256 signing with cached `jsonwebtoken` keys
//! - Time-derived, strictly increasing key identifiers
//! - JWKS JSON format for public key distribution
//! - Durable key storage ([`store`]), lifecycle policy ([`rotator`]),
//!   out-of-band change detection ([`watcher`]) and scheduled rotation ([`schedule`])
//!
//! ## Security Model
//!
//! - Private keys never leave the key directory or the process
//! - Key files are written with owner-only permissions
//! - Retired keys stay available for verification until retention evicts them
//! - At most one key is active; with none, signing fails closed

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use trustgate_core::constants::keys::{KEY_ID_PREFIX, KEY_ID_TIME_FORMAT, MIN_KEY_SIZE_BITS};
use trustgate_core::errors::{AppError, AppResult};

/// Key rotation policy and its background triggers
pub mod rotator;
/// Cron-driven rotation trigger
pub mod schedule;
/// Crash-safe on-disk key storage with a copy-on-write index
pub mod store;
/// Out-of-band key directory change detection
pub mod watcher;

pub use rotator::{KeyRotator, RotationPolicy};
pub use schedule::{RotationSchedule, RotationScheduler};
pub use store::{KeySet, KeyStore};
pub use watcher::{spawn_key_reloader, KeyChangeSource, KeyReloader, PollingKeyWatcher};

/// JWK (JSON Web Key) representation for the discovery document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type (always "RSA" for RS256)
    pub kty: String,
    /// Algorithm (RS256)
    pub alg: String,
    /// Public key use (always "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key ID matching the `kid` token header
    pub kid: String,
    /// RSA modulus (base64url encoded)
    pub n: String,
    /// RSA exponent (base64url encoded)
    pub e: String,
}

/// JWKS (JSON Web Key Set) container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// One entry per retained key, oldest first
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    /// Look up a key by id
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// RSA key pair plus the `jsonwebtoken` keys derived from it
///
/// Deriving `EncodingKey`/`DecodingKey` requires a PEM round trip, so it is
/// done once at construction rather than per token.
pub struct KeyMaterial {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl KeyMaterial {
    /// Generate a fresh RSA key pair
    ///
    /// CPU heavy; callers on the async runtime run it through `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns an error if `key_size_bits` is below 2048 or generation fails
    pub fn generate(key_size_bits: usize) -> AppResult<Self> {
        use rand::rngs::OsRng;

        if key_size_bits < MIN_KEY_SIZE_BITS {
            return Err(AppError::invalid_input(format!(
                "RSA key size must be at least {MIN_KEY_SIZE_BITS} bits, got {key_size_bits}"
            )));
        }

        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, key_size_bits)
            .map_err(|e| AppError::key_material(format!("Failed to generate RSA key: {e}")))?;

        Self::from_private_key(private_key)
    }

    /// Parse a PEM private key (PKCS#8 `PRIVATE KEY` or PKCS#1 `RSA PRIVATE KEY`)
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM is neither encoding
    pub fn from_pem(pem: &str) -> AppResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| AppError::key_material(format!("Failed to parse private key PEM: {e}")))?;

        Self::from_private_key(private_key)
    }

    fn from_private_key(private_key: RsaPrivateKey) -> AppResult<Self> {
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::key_material(format!("Failed to export private key: {e}")))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::key_material(format!("Failed to export public key: {e}")))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AppError::key_material(format!("Invalid RSA signing key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AppError::key_material(format!("Invalid RSA verification key: {e}")))?;

        Ok(Self {
            private_key,
            public_key,
            encoding_key,
            decoding_key,
        })
    }

    /// Export the private key as PKCS#8 PEM
    ///
    /// # Errors
    ///
    /// Returns an error if PEM encoding fails
    pub fn to_pem(&self) -> AppResult<String> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| AppError::key_material(format!("Failed to export private key: {e}")))
    }

    /// Modulus size in bits
    #[must_use]
    pub fn bits(&self) -> usize {
        self.public_key.size() * 8
    }

    /// Key used to sign tokens
    #[must_use]
    pub const fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Key used to verify token signatures
    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Public half as a JWK
    #[must_use]
    pub fn to_jwk(&self, kid: &str) -> JsonWebKey {
        JsonWebKey {
            kty: "RSA".to_owned(),
            alg: "RS256".to_owned(),
            key_use: "sig".to_owned(),
            kid: kid.to_owned(),
            n: URL_SAFE_NO_PAD.encode(self.public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(self.public_key.e().to_bytes_be()),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// A retained signing key
///
/// Cloning is cheap: the material is shared behind an `Arc`, so snapshots of
/// the key index copy only ids, timestamps and flags.
#[derive(Debug, Clone)]
pub struct SigningKey {
    /// Unique key identifier, also the file stem on disk
    pub kid: String,
    /// Creation time, derived from the key id when possible
    pub created_at: DateTime<Utc>,
    /// Whether this key signs new tokens
    pub active: bool,
    material: Arc<KeyMaterial>,
}

impl SigningKey {
    /// Wrap key material under an id
    #[must_use]
    pub fn new(
        kid: impl Into<String>,
        created_at: DateTime<Utc>,
        material: KeyMaterial,
        active: bool,
    ) -> Self {
        Self {
            kid: kid.into(),
            created_at,
            active,
            material: Arc::new(material),
        }
    }

    /// Shared key material
    #[must_use]
    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Same key with a different active flag
    #[must_use]
    pub fn with_active(&self, active: bool) -> Self {
        Self {
            active,
            ..self.clone()
        }
    }

    /// Public half as a JWK
    #[must_use]
    pub fn to_jwk(&self) -> JsonWebKey {
        self.material.to_jwk(&self.kid)
    }
}

/// Build the key id for a creation instant: `key_YYYYMMDD_HHMMSS_ffffff`
#[must_use]
pub fn key_id_for(created_at: DateTime<Utc>) -> String {
    format!("{KEY_ID_PREFIX}{}", created_at.format(KEY_ID_TIME_FORMAT))
}

/// Pick the creation instant of the next key
///
/// Key ids carry microsecond resolution; when the clock has not advanced past
/// the newest retained key the instant is bumped so ids stay strictly increasing.
#[must_use]
pub fn next_key_instant(now: DateTime<Utc>, newest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = truncate_to_micros(now);
    match newest {
        Some(newest) if now <= newest => truncate_to_micros(newest) + Duration::microseconds(1),
        _ => now,
    }
}

/// Recover the creation instant encoded in a key id
///
/// Accepts the microsecond format and the older second-resolution
/// `key_YYYYMMDD_HHMMSS` form.
#[must_use]
pub fn created_at_from_key_id(kid: &str) -> Option<DateTime<Utc>> {
    let stamp = kid.strip_prefix(KEY_ID_PREFIX)?;
    NaiveDateTime::parse_from_str(stamp, KEY_ID_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Check that a key id is usable as a file stem inside the key directory
///
/// # Errors
///
/// Returns an error for empty ids, hidden names and path separators
pub fn validate_key_id(kid: &str) -> AppResult<()> {
    let valid = !kid.is_empty()
        && !kid.starts_with('.')
        && kid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AppError::invalid_input(format!("Invalid key ID: {kid:?}")))
    }
}

fn truncate_to_micros(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(instant.timestamp_micros()).unwrap_or(instant)
}

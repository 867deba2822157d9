// ABOUTME: Durable PEM key storage with crash-safe writes and a copy-on-write in-memory index
// ABOUTME: Verification reads a shared snapshot; mutations rebuild and swap the snapshot
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

//! # Key Store
//!
//! One file per key, `<dir>/<kid>.pem`, PKCS#8 PEM with mode `0600`.
//!
//! The index lives behind `RwLock<Arc<KeySet>>`. Readers clone the `Arc` and
//! release the lock immediately; writers build a complete replacement set and
//! swap the pointer, so a reload never exposes a partially populated index.
//! Mutations are serialised by a separate writer mutex which is the only lock
//! held during file I/O.

use super::{created_at_from_key_id, validate_key_id, KeyMaterial, SigningKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use trustgate_core::constants::keys::KEY_FILE_EXTENSION;
use trustgate_core::errors::{AppError, AppResult};

/// Immutable snapshot of every retained key
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
    active_kid: Option<String>,
}

impl KeySet {
    /// Build a set from loaded keys, activating the newest one
    #[must_use]
    pub fn from_loaded(keys: Vec<SigningKey>) -> Self {
        let newest = keys
            .iter()
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.kid.cmp(&b.kid))
            })
            .map(|key| key.kid.clone());

        let keys = keys
            .into_iter()
            .map(|key| {
                let active = newest.as_deref() == Some(key.kid.as_str());
                (key.kid.clone(), key.with_active(active))
            })
            .collect();

        Self {
            keys,
            active_kid: newest,
        }
    }

    /// Look up a key by id
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    /// The key that signs new tokens
    #[must_use]
    pub fn active(&self) -> Option<&SigningKey> {
        self.active_kid.as_deref().and_then(|kid| self.keys.get(kid))
    }

    /// All keys ordered oldest first (`created_at`, then `kid`)
    #[must_use]
    pub fn sorted(&self) -> Vec<SigningKey> {
        let mut keys: Vec<SigningKey> = self.keys.values().cloned().collect();
        keys.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.kid.cmp(&b.kid))
        });
        keys
    }

    /// Number of retained keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Newest creation time, used to keep key ids increasing
    #[must_use]
    pub fn newest_created_at(&self) -> Option<DateTime<Utc>> {
        self.keys.values().map(|key| key.created_at).max()
    }

    fn with_inserted(&self, key: SigningKey) -> Self {
        let mut next = self.clone();
        if key.active {
            for existing in next.keys.values_mut() {
                existing.active = false;
            }
            next.active_kid = Some(key.kid.clone());
        } else if next.active_kid.as_deref() == Some(key.kid.as_str()) {
            next.active_kid = None;
        }
        next.keys.insert(key.kid.clone(), key);
        next
    }

    fn with_removed(&self, kid: &str) -> Self {
        let mut next = self.clone();
        next.keys.remove(kid);
        next
    }
}

/// Crash-safe key storage backed by a directory of PEM files
pub struct KeyStore {
    dir: PathBuf,
    index: RwLock<Arc<KeySet>>,
    writer: Mutex<()>,
}

impl KeyStore {
    /// Open (creating if needed) a key directory and load its keys
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed
    pub async fn open(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        create_key_dir(&dir).await?;

        let store = Self {
            dir,
            index: RwLock::new(Arc::new(KeySet::default())),
            writer: Mutex::new(()),
        };
        store.load().await?;
        Ok(store)
    }

    /// Directory holding the key files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read every key file and swap in the rebuilt index
    ///
    /// Unreadable or unparsable files are skipped with a warning. If every
    /// file fails while keys are already loaded, the current index is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed
    pub async fn load(&self) -> AppResult<usize> {
        let _writer = self.writer.lock().await;

        let mut loaded = Vec::new();
        let mut skipped = 0_usize;
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            AppError::storage_unavailable(format!(
                "Failed to read key directory {}: {e}",
                self.dir.display()
            ))
        })?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(kid) = key_id_from_path(&path) else {
                continue;
            };
            match read_key_file(&path, &kid).await {
                Ok(key) => loaded.push(key),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(kid = %kid, path = %path.display(), error = %e, "Skipping unreadable signing key");
                }
            }
        }

        let next = KeySet::from_loaded(loaded);
        let count = next.len();

        if next.is_empty() && skipped > 0 && !self.snapshot().await.is_empty() {
            tracing::warn!(
                skipped,
                "No key file could be loaded; keeping the current key index"
            );
            return Ok(0);
        }

        tracing::info!(
            count,
            skipped,
            active = next.active().map_or("none", |key| key.kid.as_str()),
            "Loaded signing keys from {}",
            self.dir.display()
        );
        self.swap(next).await;
        Ok(count)
    }

    /// Current index snapshot
    pub async fn snapshot(&self) -> Arc<KeySet> {
        Arc::clone(&*self.index.read().await)
    }

    /// Look up a key by id
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is not retained
    pub async fn get(&self, kid: &str) -> AppResult<SigningKey> {
        self.snapshot()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| AppError::key_not_found(kid))
    }

    /// The key that signs new tokens, if any
    pub async fn active(&self) -> Option<SigningKey> {
        self.snapshot().await.active().cloned()
    }

    /// All retained keys, oldest first
    pub async fn list(&self) -> Vec<SigningKey> {
        self.snapshot().await.sorted()
    }

    /// Persist a key, then publish it in the index
    ///
    /// The file is written to a hidden temporary name, synced and renamed, so
    /// a crash leaves either the previous state or the complete key. Putting
    /// an active key deactivates every other key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key id is invalid or the file cannot be written
    pub async fn put(&self, key: SigningKey) -> AppResult<()> {
        validate_key_id(&key.kid)?;
        let pem = key.material().to_pem()?;

        let _writer = self.writer.lock().await;
        write_key_file(&self.dir, &key.kid, pem.as_bytes()).await?;

        let next = self.snapshot().await.with_inserted(key.clone());
        self.swap(next).await;

        tracing::info!(kid = %key.kid, active = key.active, "Stored signing key");
        Ok(())
    }

    /// Remove an inactive key from disk and from the index
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` for unknown ids and `InvalidInput` for the active key
    pub async fn delete(&self, kid: &str) -> AppResult<()> {
        let _writer = self.writer.lock().await;

        let current = self.snapshot().await;
        let key = current.get(kid).ok_or_else(|| AppError::key_not_found(kid))?;
        if key.active {
            return Err(AppError::invalid_input(format!(
                "Refusing to delete active signing key {kid}"
            )));
        }

        match tokio::fs::remove_file(self.key_path(kid)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(kid = %kid, "Key file already removed");
            }
            Err(e) => {
                return Err(AppError::storage_unavailable(format!(
                    "Failed to delete key file for {kid}: {e}"
                )))
            }
        }

        self.swap(current.with_removed(kid)).await;
        tracing::info!(kid = %kid, "Deleted signing key");
        Ok(())
    }

    fn key_path(&self, kid: &str) -> PathBuf {
        self.dir.join(format!("{kid}.{KEY_FILE_EXTENSION}"))
    }

    async fn swap(&self, next: KeySet) {
        *self.index.write().await = Arc::new(next);
    }
}

/// Key id for `<kid>.pem` files; hidden and temporary files are ignored
fn key_id_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(KEY_FILE_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    validate_key_id(stem).ok()?;
    Some(stem.to_owned())
}

async fn read_key_file(path: &Path, kid: &str) -> AppResult<SigningKey> {
    let pem = tokio::fs::read_to_string(path).await?;
    let material = KeyMaterial::from_pem(&pem)?;

    let created_at = match created_at_from_key_id(kid) {
        Some(created_at) => created_at,
        None => {
            let modified = tokio::fs::metadata(path).await?.modified()?;
            DateTime::<Utc>::from(modified)
        }
    };

    Ok(SigningKey::new(kid, created_at, material, false))
}

async fn write_key_file(dir: &Path, kid: &str, contents: &[u8]) -> AppResult<()> {
    let tmp_path = dir.join(format!(".{kid}.{KEY_FILE_EXTENSION}.tmp"));
    let final_path = dir.join(format!("{kid}.{KEY_FILE_EXTENSION}"));

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp_path).await.map_err(|e| {
        AppError::storage_unavailable(format!("Failed to create key file for {kid}: {e}"))
    })?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, &final_path)
        .await
        .map_err(|e| AppError::storage_unavailable(format!("Failed to publish key {kid}: {e}")))?;
    Ok(())
}

async fn create_key_dir(dir: &Path) -> AppResult<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);

    builder.create(dir).await.map_err(|e| {
        AppError::storage_unavailable(format!(
            "Failed to create key directory {}: {e}",
            dir.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(kid: &str, created_at: DateTime<Utc>, material: &Arc<KeyMaterial>) -> SigningKey {
        SigningKey {
            kid: kid.to_owned(),
            created_at,
            active: false,
            material: Arc::clone(material),
        }
    }

    #[test]
    fn test_from_loaded_activates_newest() {
        let material = Arc::new(KeyMaterial::generate(2048).unwrap());
        let now = Utc::now();
        let set = KeySet::from_loaded(vec![
            key("key_a", now - Duration::hours(2), &material),
            key("key_c", now, &material),
            key("key_b", now - Duration::hours(1), &material),
        ]);

        assert_eq!(set.active().unwrap().kid, "key_c");
        assert_eq!(set.sorted().iter().filter(|k| k.active).count(), 1);
        let order: Vec<_> = set.sorted().into_iter().map(|k| k.kid).collect();
        assert_eq!(order, ["key_a", "key_b", "key_c"]);
    }

    #[test]
    fn test_inserting_active_key_deactivates_others() {
        let material = Arc::new(KeyMaterial::generate(2048).unwrap());
        let now = Utc::now();
        let set = KeySet::from_loaded(vec![key("key_a", now, &material)]);
        let next = set.with_inserted(key("key_b", now, &material).with_active(true));

        assert_eq!(next.active().unwrap().kid, "key_b");
        assert!(!next.get("key_a").unwrap().active);
        // the previous snapshot is untouched
        assert_eq!(set.active().unwrap().kid, "key_a");
    }

    #[test]
    fn test_key_id_from_path_skips_temp_files() {
        assert_eq!(
            key_id_from_path(Path::new("/k/key_1.pem")).as_deref(),
            Some("key_1")
        );
        assert!(key_id_from_path(Path::new("/k/.key_1.pem.tmp")).is_none());
        assert!(key_id_from_path(Path::new("/k/.key_1.pem")).is_none());
        assert!(key_id_from_path(Path::new("/k/notes.txt")).is_none());
    }
}

//! Baseline store: accepted reference images keyed by app, test, checkpoint,
//! viewport and environment.
//!
//! Comparisons only ever read. A baseline changes through an explicit
//! [`BaselineStore::put`] carrying [`Acceptance`] metadata.
//!
//! On disk ([`FsBaselineStore`]):
//!
//! ```text
//! __baselines__/
//! └── bank-demo/
//!     └── log-into-a-bank-account/
//!         ├── login-page@1400x900-3fa1c0d2e94b.png
//!         └── login-page@1400x900-3fa1c0d2e94b.json   (key + acceptance)
//! ```

use crate::capture::{to_hex, Image, Viewport};
use crate::result::{VistarError, VistarResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Unique identity of a baseline
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineKey {
    /// Application under test
    pub app_name: String,
    /// Test (session) name
    pub test_name: String,
    /// Checkpoint name
    pub checkpoint: String,
    /// Viewport the image was captured at
    pub viewport: Viewport,
    /// Browser/OS descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl BaselineKey {
    /// Create a key without an environment descriptor
    #[must_use]
    pub fn new(
        app_name: impl Into<String>,
        test_name: impl Into<String>,
        checkpoint: impl Into<String>,
        viewport: Viewport,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            test_name: test_name.into(),
            checkpoint: checkpoint.into(),
            viewport,
            environment: None,
        }
    }

    /// Set the environment descriptor
    #[must_use]
    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    /// First 12 hex chars of the SHA-256 of the raw key
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.app_name, &self.test_name, &self.checkpoint] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.viewport.to_string().as_bytes());
        hasher.update([0u8]);
        if let Some(env) = &self.environment {
            hasher.update(env.as_bytes());
        }
        let mut hex = to_hex(&hasher.finalize());
        hex.truncate(12);
        hex
    }

    /// Storage path relative to the store root, without extension
    #[must_use]
    pub fn relative_stem(&self) -> PathBuf {
        let env = self
            .environment
            .as_deref()
            .map(|e| format!("~{}", slug(e)))
            .unwrap_or_default();
        let file = format!(
            "{}@{}{env}-{}",
            slug(&self.checkpoint),
            self.viewport,
            self.fingerprint()
        );
        [slug(&self.app_name), slug(&self.test_name), file]
            .iter()
            .collect()
    }

    /// Storage path of the PNG relative to the store root
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        self.relative_stem().with_extension("png")
    }
}

impl fmt::Display for BaselineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.app_name, self.test_name, self.checkpoint, self.viewport
        )?;
        if let Some(env) = &self.environment {
            write!(f, "~{env}")?;
        }
        Ok(())
    }
}

/// Lower-case path segment: alphanumerics kept, runs of anything else become `-`
fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Who accepted a baseline and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acceptance {
    /// Person or pipeline that accepted
    pub accepted_by: String,
    /// Acceptance time
    pub accepted_at: DateTime<Utc>,
}

impl Acceptance {
    /// Acceptance stamped with the current time
    #[must_use]
    pub fn now(accepted_by: impl Into<String>) -> Self {
        Self {
            accepted_by: accepted_by.into(),
            accepted_at: Utc::now(),
        }
    }
}

/// Stored reference image
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    /// Key it is stored under
    pub key: BaselineKey,
    /// Reference image
    pub image: Image,
    /// Acceptance metadata, absent for images placed by hand
    pub acceptance: Option<Acceptance>,
}

/// Reference image persistence
#[async_trait]
pub trait BaselineStore: Send + Sync + fmt::Debug {
    /// Fetch a baseline; `Ok(None)` when none was ever accepted
    async fn get(&self, key: &BaselineKey) -> VistarResult<Option<Baseline>>;

    /// Accept `image` as the baseline for `key`, replacing any previous one
    async fn put(&self, key: &BaselineKey, image: &Image, acceptance: Acceptance)
        -> VistarResult<()>;

    /// Remove a baseline; returns whether one existed
    async fn delete(&self, key: &BaselineKey) -> VistarResult<bool>;

    /// All stored keys, sorted
    async fn list(&self) -> VistarResult<Vec<BaselineKey>>;
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineBackend {
    /// PNG files under the baseline directory
    #[default]
    Filesystem,
    /// Process-local, discarded on exit
    Memory,
}

/// Open the configured backend
#[must_use]
pub fn open_store(backend: BaselineBackend, dir: &Path) -> Arc<dyn BaselineStore> {
    match backend {
        BaselineBackend::Filesystem => Arc::new(FsBaselineStore::new(dir)),
        BaselineBackend::Memory => Arc::new(MemoryBaselineStore::new()),
    }
}

/// In-memory baseline store
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    entries: RwLock<HashMap<BaselineKey, Baseline>>,
}

impl MemoryBaselineStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored baselines
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no baselines are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
    async fn get(&self, key: &BaselineKey) -> VistarResult<Option<Baseline>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn put(
        &self,
        key: &BaselineKey,
        image: &Image,
        acceptance: Acceptance,
    ) -> VistarResult<()> {
        let baseline = Baseline {
            key: key.clone(),
            image: image.clone(),
            acceptance: Some(acceptance),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), baseline);
        debug!(key = %key, "baseline accepted (memory)");
        Ok(())
    }

    async fn delete(&self, key: &BaselineKey) -> VistarResult<bool> {
        Ok(self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }

    async fn list(&self) -> VistarResult<Vec<BaselineKey>> {
        let mut keys: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Sidecar written next to each PNG
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMeta {
    key: BaselineKey,
    acceptance: Option<Acceptance>,
    digest: String,
}

/// Filesystem baseline store.
///
/// Writes land in a temporary file that is renamed into place, so a reader
/// sees either the old image or the new one. Writers to the same key queue on
/// a per-key lock; reads never lock.
#[derive(Debug)]
pub struct FsBaselineStore {
    root: PathBuf,
    write_locks: WriteLocks,
}

impl FsBaselineStore {
    /// Create a store rooted at `root` (created lazily on first write)
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Store root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the PNG for `key`
    #[must_use]
    pub fn image_path(&self, key: &BaselineKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn meta_path(&self, key: &BaselineKey) -> PathBuf {
        self.root.join(key.relative_stem()).with_extension("json")
    }

    async fn lock_key(&self, key: &BaselineKey) -> KeyWriteGuard<'_> {
        let lock = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        KeyWriteGuard {
            locks: &self.write_locks,
            key: key.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn read_meta(&self, key: &BaselineKey) -> Option<StoredMeta> {
        let path = self.meta_path(key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable baseline metadata");
                None
            }
        }
    }
}

type WriteLocks = Mutex<HashMap<BaselineKey, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one key's write lock; the map entry goes away with the last holder
struct KeyWriteGuard<'a> {
    locks: &'a WriteLocks,
    key: BaselineKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyWriteGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // clones are only handed out under the map lock
        self.guard.take();
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Key recovered from a PNG's path when its metadata sidecar is missing.
///
/// Names come back in their stored (slug) form.
fn key_from_path(root: &Path, path: &Path) -> Option<BaselineKey> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let [app, test, file] = parts.as_slice() else {
        return None;
    };
    let stem = file.strip_suffix(".png")?;
    let (checkpoint, rest) = stem.split_once('@')?;
    let rest = match rest.rsplit_once('-') {
        Some((head, fp)) if fp.len() == 12 && fp.chars().all(|c| c.is_ascii_hexdigit()) => head,
        _ => rest,
    };
    let (viewport, environment) = match rest.split_once('~') {
        Some((viewport, env)) => (viewport, Some(env.to_string())),
        None => (rest, None),
    };
    Some(
        BaselineKey::new(app.as_str(), test.as_str(), checkpoint, viewport.parse::<Viewport>().ok()?)
            .with_environment(environment),
    )
}

#[async_trait]
impl BaselineStore for FsBaselineStore {
    async fn get(&self, key: &BaselineKey) -> VistarResult<Option<Baseline>> {
        let path = self.image_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(VistarError::baseline_store(
                    key,
                    format!("cannot read {}: {e}", path.display()),
                ))
            }
        };
        let image = Image::from_png(&bytes).map_err(|e| {
            VistarError::baseline_store(key, format!("corrupt image {}: {e}", path.display()))
        })?;
        let acceptance = self.read_meta(key).await.and_then(|m| m.acceptance);
        Ok(Some(Baseline {
            key: key.clone(),
            image,
            acceptance,
        }))
    }

    async fn put(
        &self,
        key: &BaselineKey,
        image: &Image,
        acceptance: Acceptance,
    ) -> VistarResult<()> {
        let _guard = self.lock_key(key).await;

        let path = self.image_path(key);
        let store_err = |e: std::io::Error| {
            VistarError::baseline_store(key, format!("cannot write {}: {e}", path.display()))
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(store_err)?;
        }

        let png = image.to_png()?;
        Self::write_atomic(&path, &png).await.map_err(store_err)?;

        let meta = StoredMeta {
            key: key.clone(),
            acceptance: Some(acceptance.clone()),
            digest: image.digest(),
        };
        let json = serde_json::to_vec_pretty(&meta)?;
        Self::write_atomic(&self.meta_path(key), &json)
            .await
            .map_err(store_err)?;

        info!(
            key = %key,
            accepted_by = %acceptance.accepted_by,
            path = %path.display(),
            "baseline accepted"
        );
        Ok(())
    }

    async fn delete(&self, key: &BaselineKey) -> VistarResult<bool> {
        let _guard = self.lock_key(key).await;

        let existed = match tokio::fs::remove_file(self.image_path(key)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(VistarError::baseline_store(key, e.to_string())),
        };
        match tokio::fs::remove_file(self.meta_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VistarError::baseline_store(key, e.to_string())),
        }
        if existed {
            info!(key = %key, "baseline deleted");
        }
        Ok(existed)
    }

    async fn list(&self) -> VistarResult<Vec<BaselineKey>> {
        let list_err = |dir: &Path, e: std::io::Error| {
            VistarError::baseline_store(dir.display(), format!("cannot list: {e}"))
        };
        let mut keys = Vec::new();
        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(list_err(dir.as_path(), e)),
            };
            let mut images = Vec::new();
            let mut described = HashSet::new();
            while let Some(entry) = entries.next_entry().await.map_err(|e| list_err(dir.as_path(), e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| list_err(path.as_path(), e))?;
                if file_type.is_dir() {
                    dirs.push(path);
                    continue;
                }
                match path.extension().and_then(|ext| ext.to_str()) {
                    Some("png") => images.push(path),
                    Some("json") => {
                        let bytes = tokio::fs::read(&path).await.map_err(|e| list_err(path.as_path(), e))?;
                        match serde_json::from_slice::<StoredMeta>(&bytes) {
                            Ok(meta) => {
                                described.insert(path.with_extension("png"));
                                keys.push(meta.key);
                            }
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "skipping unreadable baseline metadata");
                            }
                        }
                    }
                    _ => {}
                }
            }
            for image in images.into_iter().filter(|p| !described.contains(p)) {
                match key_from_path(&self.root, &image) {
                    Some(key) => {
                        debug!(path = %image.display(), "baseline listed from its file name");
                        keys.push(key);
                    }
                    None => {
                        warn!(path = %image.display(), "skipping image outside the baseline layout");
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use image::Rgba;

    fn key(checkpoint: &str) -> BaselineKey {
        BaselineKey::new(
            "playwright.sdk",
            "Log into a bank account",
            checkpoint,
            Viewport::new(1400, 900),
        )
    }

    fn solid(v: u8) -> Image {
        Image::filled(8, 6, Rgba([v, v, v, 255]))
    }

    mod key_tests {
        use super::*;

        #[test]
        fn test_slug() {
            assert_eq!(slug("Log into a bank account"), "log-into-a-bank-account");
            assert_eq!(slug("playwright.sdk"), "playwright-sdk");
            assert_eq!(slug("  !! "), "_");
        }

        #[test]
        fn test_relative_path_layout() {
            let path = key("Login page").relative_path();
            let s = path.to_string_lossy().replace('\\', "/");
            assert!(s.starts_with("playwright-sdk/log-into-a-bank-account/login-page@1400x900-"));
            assert!(s.ends_with(".png"));
        }

        #[test]
        fn test_environment_in_path_and_display() {
            let k = key("Home").with_environment(Some("Chrome/Linux".to_string()));
            assert!(k
                .relative_path()
                .to_string_lossy()
                .contains("home@1400x900~chrome-linux-"));
            assert_eq!(
                k.to_string(),
                "playwright.sdk/Log into a bank account/Home@1400x900~Chrome/Linux"
            );
        }

        #[test]
        fn test_fingerprint_keeps_slug_collisions_apart() {
            let a = key("Main page");
            let b = key("main-page");
            assert_eq!(slug(&a.checkpoint), slug(&b.checkpoint));
            assert_ne!(a.relative_path(), b.relative_path());
        }

        #[test]
        fn test_fingerprint_depends_on_viewport() {
            let mut other = key("Login page");
            other.viewport = Viewport::new(800, 600);
            assert_ne!(key("Login page").fingerprint(), other.fingerprint());
            assert_eq!(key("Login page").fingerprint().len(), 12);
        }
    }

    mod memory_tests {
        use super::*;

        #[tokio::test]
        async fn test_get_missing_is_none() {
            let store = MemoryBaselineStore::new();
            assert!(store.get(&key("Login page")).await.unwrap().is_none());
            assert!(store.is_empty());
        }

        #[tokio::test]
        async fn test_put_get_delete() {
            let store = MemoryBaselineStore::new();
            let k = key("Login page");
            store.put(&k, &solid(10), Acceptance::now("ci")).await.unwrap();
            let got = store.get(&k).await.unwrap().unwrap();
            assert_eq!(got.image, solid(10));
            assert_eq!(got.acceptance.unwrap().accepted_by, "ci");
            assert_eq!(store.list().await.unwrap(), vec![k.clone()]);
            assert!(store.delete(&k).await.unwrap());
            assert!(!store.delete(&k).await.unwrap());
        }
    }

    mod fs_tests {
        use super::*;

        #[tokio::test]
        async fn test_put_then_get_roundtrip() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsBaselineStore::new(dir.path());
            let k = key("Login page");
            store.put(&k, &solid(42), Acceptance::now("alice")).await.unwrap();

            assert!(store.image_path(&k).exists());
            let got = store.get(&k).await.unwrap().unwrap();
            assert_eq!(got.image, solid(42));
            assert_eq!(got.acceptance.unwrap().accepted_by, "alice");
        }

        #[tokio::test]
        async fn test_get_missing_is_none() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsBaselineStore::new(dir.path().join("nope"));
            assert!(store.get(&key("Login page")).await.unwrap().is_none());
            assert!(store.list().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_corrupt_image_is_store_error() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsBaselineStore::new(dir.path());
            let k = key("Login page");
            let path = store.image_path(&k);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"not a png").unwrap();

            let err = store.get(&k).await.unwrap_err();
            assert!(matches!(err, VistarError::BaselineStore { .. }));
        }

        #[tokio::test]
        async fn test_put_replaces_and_leaves_no_temp_files() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsBaselineStore::new(dir.path());
            let k = key("Main page");
            store.put(&k, &solid(1), Acceptance::now("a")).await.unwrap();
            store.put(&k, &solid(2), Acceptance::now("b")).await.unwrap();

            let got = store.get(&k).await.unwrap().unwrap();
            assert_eq!(got.image, solid(2));
            let parent = store.image_path(&k).parent().unwrap().to_path_buf();
            let names: Vec<_> = std::fs::read_dir(parent)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names.len(), 2, "{names:?}");
            assert!(names.iter().all(|n| !n.ends_with(".tmp")));
        }

        #[tokio::test]
        async fn test_concurrent_puts_last_writer_wins() {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FsBaselineStore::new(dir.path()));
            let k = key("Home Page");
            let mut handles = Vec::new();
            for v in 0..8u8 {
                let store = Arc::clone(&store);
                let k = k.clone();
                handles.push(tokio::spawn(async move {
                    store.put(&k, &solid(v), Acceptance::now("w")).await
                }));
            }
            for h in handles {
                h.await.unwrap().unwrap();
            }
            let got = store.get(&k).await.unwrap().unwrap();
            let v = got.image.as_rgba().get_pixel(0, 0).0[0];
            assert!(v < 8);
            assert_eq!(got.image, solid(v));
        }

        #[tokio::test]
        async fn test_list_and_delete() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsBaselineStore::new(dir.path());
            let a = key("Login page");
            let b = key("Main page").with_environment(Some("chrome".to_string()));
            store.put(&b, &solid(1), Acceptance::now("x")).await.unwrap();
            store.put(&a, &solid(1), Acceptance::now("x")).await.unwrap();

            assert_eq!(store.list().await.unwrap(), vec![a.clone(), b.clone()]);
            assert!(store.delete(&a).await.unwrap());
            assert_eq!(store.list().await.unwrap(), vec![b]);
            assert!(store.get(&a).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_write_locks_released_after_use() {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FsBaselineStore::new(dir.path()));
            let mut handles = Vec::new();
            for v in 0..6u8 {
                let store = Arc::clone(&store);
                handles.push(tokio::spawn(async move {
                    let k = key(if v % 2 == 0 { "Login page" } else { "Main page" });
                    store.put(&k, &solid(v), Acceptance::now("w")).await
                }));
            }
            for h in handles {
                h.await.unwrap().unwrap();
            }
            store.delete(&key("Login page")).await.unwrap();
            assert!(store.write_locks.lock().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_list_includes_images_without_metadata() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsBaselineStore::new(dir.path());
            let described = key("Main page");
            store.put(&described, &solid(1), Acceptance::now("x")).await.unwrap();

            let placed = key("Login page").with_environment(Some("chrome".to_string()));
            let path = store.image_path(&placed);
            std::fs::write(&path, solid(2).to_png().unwrap()).unwrap();
            std::fs::write(path.with_file_name("notes.txt"), b"ignored").unwrap();

            let keys = store.list().await.unwrap();
            assert_eq!(keys.len(), 2, "{keys:?}");
            assert!(keys.contains(&described));
            let recovered = keys.iter().find(|k| *k != &described).unwrap();
            assert_eq!(recovered.app_name, "playwright-sdk");
            assert_eq!(recovered.test_name, "log-into-a-bank-account");
            assert_eq!(recovered.checkpoint, "login-page");
            assert_eq!(recovered.viewport, Viewport::new(1400, 900));
            assert_eq!(recovered.environment.as_deref(), Some("chrome"));
        }

        #[cfg(unix)]
        #[tokio::test]
        async fn test_unreadable_directory_is_store_error() {
            use std::os::unix::fs::PermissionsExt;
            let dir = tempfile::tempdir().unwrap();
            let store = FsBaselineStore::new(dir.path());
            store.put(&key("Main page"), &solid(1), Acceptance::now("x")).await.unwrap();
            let app_dir = dir.path().join("playwright-sdk");
            std::fs::set_permissions(&app_dir, std::fs::Permissions::from_mode(0o000)).unwrap();
            // root ignores permission bits
            let denied = std::fs::read_dir(&app_dir).is_err();

            let result = store.list().await;
            std::fs::set_permissions(&app_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
            if denied {
                assert!(matches!(result, Err(VistarError::BaselineStore { .. })));
            }
        }

        #[tokio::test]
        async fn test_open_store_selects_backend() {
            let dir = tempfile::tempdir().unwrap();
            let store = open_store(BaselineBackend::Memory, dir.path());
            store.put(&key("x"), &solid(3), Acceptance::now("m")).await.unwrap();
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        }
    }
}

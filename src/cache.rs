//! Content-addressed artifact store.
//!
//! One file per key under the cache directory; values are opaque bytes.
//! Writes go through a temp file and an atomic rename, so concurrent writers
//! of the same key (which by construction carry identical content) are safe
//! across threads and processes. Entries are never invalidated — staleness
//! is handled by fingerprint change, not eviction.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Current manifest schema version. Bump when the format changes.
const MANIFEST_VERSION: u32 = 1;

/// Manifest filename within the cache directory.
const MANIFEST_FILE: &str = "manifest.json";

/// Sequence for unique temp-file names within one process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Handle to an on-disk keyed value store.
#[derive(Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fetch the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        fs::read(self.dir.join(key)).ok()
    }

    /// Store `value` under `key`.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating cache directory {}", self.dir.display()))?;
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!("{key}.tmp.{}.{seq}", std::process::id()));
        fs::write(&tmp, value).with_context(|| format!("writing cache entry {key}"))?;
        fs::rename(&tmp, self.dir.join(key))
            .with_context(|| format!("publishing cache entry {key}"))?;
        Ok(())
    }
}

/// Encode a rule's output set as a single cache value.
///
/// Layout per output: u32-le path length, path bytes, u64-le data length,
/// data bytes.
pub fn encode_outputs(outputs: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (path, data) in outputs {
        buf.extend_from_slice(&(path.len() as u32).to_le_bytes());
        buf.extend_from_slice(path.as_bytes());
        buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
        buf.extend_from_slice(data);
    }
    buf
}

/// Decode a value produced by [`encode_outputs`].
pub fn decode_outputs(value: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut outputs = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let path_len = u32::from_le_bytes(take(&mut rest, 4)?.try_into().unwrap()) as usize;
        let path = String::from_utf8(take(&mut rest, path_len)?.to_vec())
            .context("cache value contains a non-UTF-8 output path")?;
        let data_len = u64::from_le_bytes(take(&mut rest, 8)?.try_into().unwrap()) as usize;
        let data = take(&mut rest, data_len)?.to_vec();
        outputs.push((path, data));
    }
    Ok(outputs)
}

fn take<'a>(rest: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if rest.len() < n {
        bail!("truncated cache value ({} bytes left, {n} needed)", rest.len());
    }
    let (head, tail) = rest.split_at(n);
    *rest = tail;
    Ok(head)
}

/// Per-rule fingerprints from the previous invocation.
///
/// Purely diagnostic: lets verbose mode say why a rule re-executed. The
/// keyed value store above is the source of truth for caching.
#[derive(Serialize, Deserialize)]
pub struct CacheManifest {
    /// Schema version for forward compatibility.
    pub version: u32,
    /// Rule display name → last observed fingerprint.
    pub rules: HashMap<String, String>,
}

impl CacheManifest {
    /// Create a new empty manifest.
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            rules: HashMap::new(),
        }
    }

    /// Load the manifest from the cache directory.
    ///
    /// Returns an empty manifest if the file is missing, corrupt, or has a
    /// version mismatch.
    pub fn load(dir: &Path) -> Self {
        let Ok(data) = fs::read_to_string(dir.join(MANIFEST_FILE)) else {
            return Self::new();
        };
        match serde_json::from_str::<Self>(&data) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => manifest,
            _ => Self::new(),
        }
    }

    /// Save the manifest atomically (write to tmp, then rename).
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating cache directory {}", dir.display()))?;
        let path = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        let json =
            serde_json::to_string_pretty(self).context("failed to serialize cache manifest")?;
        fs::write(&tmp, json).context("failed to write temporary cache manifest")?;
        fs::rename(&tmp, &path).context("failed to atomically replace cache manifest")?;
        Ok(())
    }
}

impl Default for CacheManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(tmp.path().join("cache"));
        assert!(cache.get("abc123").is_none());
        cache.put("abc123", b"artifact bytes").unwrap();
        assert_eq!(cache.get("abc123").unwrap(), b"artifact bytes");
    }

    #[test]
    fn put_overwrites_existing_key() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(tmp.path().to_path_buf());
        cache.put("k", b"one").unwrap();
        cache.put("k", b"two").unwrap();
        assert_eq!(cache.get("k").unwrap(), b"two");
    }

    #[test]
    fn output_codec_round_trips() {
        let outputs = vec![
            ("build/a.out".to_string(), b"alpha".to_vec()),
            ("build/b.out".to_string(), Vec::new()),
            ("c".to_string(), vec![0u8, 1, 2, 255]),
        ];
        let encoded = encode_outputs(&outputs);
        assert_eq!(decode_outputs(&encoded).unwrap(), outputs);
    }

    #[test]
    fn truncated_value_is_rejected() {
        let encoded = encode_outputs(&[("x".to_string(), b"data".to_vec())]);
        assert!(decode_outputs(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn manifest_survives_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = CacheManifest::new();
        manifest.rules.insert("gen".into(), "deadbeef".into());
        manifest.save(tmp.path()).unwrap();

        let loaded = CacheManifest::load(tmp.path());
        assert_eq!(loaded.rules.get("gen").map(String::as_str), Some("deadbeef"));
    }

    #[test]
    fn corrupt_manifest_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILE), "{not json").unwrap();
        assert!(CacheManifest::load(tmp.path()).rules.is_empty());
    }
}

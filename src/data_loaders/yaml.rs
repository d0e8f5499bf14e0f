// ~/src/data_loaders/yaml.rs

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::LazyLock,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde_yaml::Value;

/* =========================
   CONFIG CACHE
========================= */

// Per-file cache for parsed YAML
static YAML_CACHE: LazyLock<RwLock<HashMap<String, (Value, Instant)>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
const CACHE_TTL: Duration = Duration::from_secs(1);
const CACHE_MAX_ENTRIES: usize = 32;

fn cache_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// YAML loader with a short per-file cache. `None` when the file is missing
/// or does not parse.
pub fn load_yaml(path: &Path) -> Option<Value> {
    let now = Instant::now();
    let key = cache_key(path);
    if let Some((v, t)) = YAML_CACHE.read().get(&key) {
        if now.duration_since(*t) < CACHE_TTL {
            return Some(v.clone());
        }
    }

    let txt = fs::read_to_string(path).ok()?;
    let v: Value = serde_yaml::from_str(&txt).ok()?;
    let mut cache = YAML_CACHE.write();

    if cache.len() >= CACHE_MAX_ENTRIES {
        if let Some(oldest_key) = cache
            .iter()
            .min_by_key(|(_, (_, t))| *t)
            .map(|(k, _)| k.clone())
        {
            cache.remove(&oldest_key);
        }
    }

    cache.insert(key, (v.clone(), now));
    Some(v)
}

/// Drop the cached value so the next load reads the file again. Used by the
/// watcher right after it sees a newer mtime.
pub fn forget(path: &Path) {
    YAML_CACHE.write().remove(&cache_key(path));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cached_until_forgotten() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(&path, "a: 1\n").unwrap();
        assert_eq!(load_yaml(&path).unwrap()["a"].as_i64(), Some(1));

        fs::write(&path, "a: 2\n").unwrap();
        assert_eq!(load_yaml(&path).unwrap()["a"].as_i64(), Some(1));

        forget(&path);
        assert_eq!(load_yaml(&path).unwrap()["a"].as_i64(), Some(2));
    }

    #[test]
    fn missing_or_invalid_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load_yaml(&tmp.path().join("nope.yaml")).is_none());
        let bad = tmp.path().join("bad.yaml");
        fs::write(&bad, "a: [1, 2\n").unwrap();
        assert!(load_yaml(&bad).is_none());
    }
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const RISKS_KEY: &str = "gmp-gdp-risks";
pub const AUDIT_TRAIL_KEY: &str = "gmp-gdp-audit-trail";
pub const INITIALIZED_KEY: &str = "gmp-gdp-initialized";
pub const SEQUENCE_KEY: &str = "gmp-gdp-sequence";
pub const USER_KEY: &str = "gmp-gdp-user";
pub const USERS_KEY: &str = "gmp-gdp-users";
pub const WORKFLOWS_KEY: &str = "gmp-gdp-workflows";
pub const DEMO_NOTICE_DISMISSED_KEY: &str = "gmp-gdp-demo-notice-dismissed";

/// Local string key-value store. Values are opaque strings; callers
/// serialize with [`save_json`] / [`load_json`].
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

pub fn load_json<T: DeserializeOwned>(kv: &impl KvStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = kv.get(key)? else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("保存データ(JSON)の解析に失敗しました: {key}"))?;
    Ok(Some(value))
}

pub fn save_json<T: Serialize + ?Sized>(kv: &mut impl KvStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)
        .with_context(|| format!("保存データ(JSON)のシリアライズに失敗しました: {key}"))?;
    kv.set(key, &raw)
}

/// One file per key under a state directory.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| {
            format!("状態ディレクトリの作成に失敗しました: {}", dir.display())
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(anyhow!("キー名が不正です: {key:?}"));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("状態ファイルの読み取りに失敗しました: {}", path.display()))),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.{}.tmp", std::process::id()));
        std::fs::write(&tmp, value)
            .with_context(|| format!("状態ファイルの書き込みに失敗しました: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("状態ファイルの置き換えに失敗しました: {}", path.display()))?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("状態ファイルの削除に失敗しました: {}", path.display()))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryKvStore {
    entries: BTreeMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("riskreg-kv-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn file_store_round_trips_and_removes() {
        let dir = temp_dir("roundtrip");
        let mut kv = FileKvStore::open(&dir).expect("open");
        assert_eq!(kv.get("a-key").unwrap(), None);

        kv.set("a-key", "{\"x\":1}").expect("set");
        assert_eq!(kv.get("a-key").unwrap().as_deref(), Some("{\"x\":1}"));
        assert!(dir.join("a-key.json").exists());

        kv.remove("a-key").expect("remove");
        assert_eq!(kv.get("a-key").unwrap(), None);
        kv.remove("a-key").expect("remove twice is ok");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = temp_dir("keys");
        let mut kv = FileKvStore::open(&dir).expect("open");
        assert!(kv.set("../escape", "x").is_err());
        assert!(kv.get("").is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_json_reports_corrupt_values() {
        let mut kv = MemoryKvStore::new();
        kv.set(RISKS_KEY, "not json").unwrap();
        let err = load_json::<Vec<u8>>(&kv, RISKS_KEY).unwrap_err();
        assert!(err.to_string().contains(RISKS_KEY), "{err}");
    }
}

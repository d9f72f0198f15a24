use std::path::PathBuf;

use anyhow::{Context, Result};

/// Chat-channel update offset persisted to a well-known local path.
#[derive(Debug, Clone)]
pub struct OffsetStore {
    path: PathBuf,
}

impl OffsetStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join("telegram_offset"),
        }
    }

    /// Last persisted update id, if the file exists and parses.
    pub fn load(&self) -> Option<i64> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        raw.trim().parse().ok()
    }

    pub fn save(&self, update_id: i64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
        std::fs::write(&self.path, update_id.to_string())
            .with_context(|| format!("writing offset file {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("offset-store-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn missing_file_loads_none() {
        let store = OffsetStore::new(scratch_dir("missing"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = scratch_dir("roundtrip");
        let store = OffsetStore::new(dir.clone());
        store.save(1005).unwrap();
        assert_eq!(store.load(), Some(1005));

        // A fresh store over the same path restores the persisted offset
        let restored = OffsetStore::new(dir.clone());
        assert_eq!(restored.load(), Some(1005));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn save_overwrites_previous_value() {
        let dir = scratch_dir("overwrite");
        let store = OffsetStore::new(dir.clone());
        store.save(10).unwrap();
        store.save(42).unwrap();
        assert_eq!(store.load(), Some(42));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_loads_none() {
        let dir = scratch_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("telegram_offset"), "not a number").unwrap();
        let store = OffsetStore::new(dir.clone());
        assert_eq!(store.load(), None);
        let _ = std::fs::remove_dir_all(dir);
    }
}

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

use crate::month::SnapshotMonth;

use super::client::RawSnapshot;

/// Local store for downloaded snapshots, laid out as `<cache>/YYYY-MM/<file>`
pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = match custom_dir {
            Some(dir) => dir,
            None => {
                let proj_dirs = ProjectDirs::from("", "", "smogon-usage-to-sqlite")
                    .context("Could not determine cache directory")?;
                proj_dirs.cache_dir().to_path_buf()
            }
        };

        fs::create_dir_all(&cache_dir).context("Failed to create cache directory")?;

        Ok(Self { cache_dir })
    }

    /// Get the cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get path to month-specific directory
    pub fn month_dir(&self, month: SnapshotMonth) -> PathBuf {
        self.cache_dir.join(month.to_string())
    }

    pub fn is_cached(&self, month: SnapshotMonth, file_name: &str) -> bool {
        self.month_dir(month).join(file_name).exists()
    }

    /// Write a raw snapshot under its month directory
    pub fn store(&self, snapshot: &RawSnapshot, file_name: &str) -> Result<PathBuf> {
        let dir = self.month_dir(snapshot.month);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {:?}", dir))?;

        let path = dir.join(file_name);
        fs::write(&path, &snapshot.body)
            .with_context(|| format!("Failed to write snapshot: {:?}", path))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_lays_out_by_month() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(Some(dir.path().to_path_buf())).unwrap();
        let month: SnapshotMonth = "2025-08".parse().unwrap();
        let snapshot = RawSnapshot {
            source: "http://x/2025-08/chaos/gen9vgc2025regibo3-1760.json".to_string(),
            month,
            format: "gen9vgc2025regibo3".to_string(),
            body: "{}".to_string(),
        };

        assert!(!cache.is_cached(month, "gen9vgc2025regibo3-1760.json"));
        let path = cache.store(&snapshot, "gen9vgc2025regibo3-1760.json").unwrap();
        assert_eq!(path, dir.path().join("2025-08").join("gen9vgc2025regibo3-1760.json"));
        assert!(cache.is_cached(month, "gen9vgc2025regibo3-1760.json"));
        assert_eq!(fs::read_to_string(path).unwrap(), "{}");
    }
}

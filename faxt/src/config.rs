//! Configuration for the faxt CLI.
//!
//! There is no project-scaffolding surface left to configure (spec.md §6
//! only knows a REPL and a script runner), so this only holds VM tuning
//! knobs: the GC's initial heap threshold, its grow factor, and the
//! `stress_gc` debug flag spec.md §4.5 calls "stress GC" mode. Loaded from
//! an optional `faxt.toml`, the same `Config::load`/`load_from_path` search
//! order the teacher's config loader used.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FaxtError, Result};

pub const CONFIG_FILE_NAME: &str = "faxt.toml";

/// 1 MiB — starting collection pressure low rather than hand-tuning it.
const DEFAULT_NEXT_GC: usize = 1024 * 1024;
const DEFAULT_GROW_FACTOR: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Bytes allocated before the first collection runs.
    #[serde(default = "default_next_gc")]
    pub gc_next: usize,

    /// Multiplier applied to `bytes_allocated` to pick the next threshold
    /// after each collection.
    #[serde(default = "default_grow_factor")]
    pub gc_grow_factor: usize,

    /// Collect before every allocation instead of only past the threshold;
    /// shakes out GC bugs at the cost of throughput.
    #[serde(default)]
    pub stress_gc: bool,
}

fn default_next_gc() -> usize {
    DEFAULT_NEXT_GC
}

fn default_grow_factor() -> usize {
    DEFAULT_GROW_FACTOR
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gc_next: default_next_gc(),
            gc_grow_factor: default_grow_factor(),
            stress_gc: false,
        }
    }
}

impl Config {
    /// Looks for `faxt.toml` in the current directory and falls back to
    /// built-in defaults if none is present.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FaxtError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| FaxtError::Config(format!("failed to parse configuration: {e}")))
    }

    fn find_config_file() -> Option<PathBuf> {
        let path = PathBuf::from(CONFIG_FILE_NAME);
        path.exists().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gc_next, DEFAULT_NEXT_GC);
        assert_eq!(config.gc_grow_factor, DEFAULT_GROW_FACTOR);
        assert!(!config.stress_gc);
    }

    #[test]
    fn test_config_roundtrip_through_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("faxt.toml");
        std::fs::write(&config_path, "gc_next = 4096\ngc_grow_factor = 3\nstress_gc = true\n")
            .unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(
            loaded,
            Config {
                gc_next: 4096,
                gc_grow_factor: 3,
                stress_gc: true,
            }
        );
    }

    #[test]
    fn test_partial_config_fills_in_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("faxt.toml");
        std::fs::write(&config_path, "stress_gc = true\n").unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.gc_next, DEFAULT_NEXT_GC);
        assert_eq!(loaded.gc_grow_factor, DEFAULT_GROW_FACTOR);
        assert!(loaded.stress_gc);
    }

    #[test]
    fn test_load_from_nonexistent_path() {
        let result = Config::load_from_path(Path::new("/nonexistent/path/faxt.toml"));
        assert!(result.is_err());
    }
}

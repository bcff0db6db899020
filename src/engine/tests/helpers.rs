use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::engine::{Engine, EngineConfig};

/// Initialize tracing controlled by `RUST_LOG`.  Safe to call multiple
/// times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small structure parameters so splits, merges and spills actually
/// trigger in tests.
pub fn small_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        btree_order: 4,
        isam_block_factor: 4,
        hash_bucket_size: 4,
        sequential_rebuild_threshold: Some(8),
        spimi_memory_budget: 2048,
        rtree_max_entries: 4,
        default_limit: 10,
        ..EngineConfig::default()
    }
}

/// Engine rooted in a fresh temp directory.
pub fn fresh_engine(tmp: &TempDir) -> Engine {
    Engine::open(tmp.path().join("db"), small_config()).unwrap()
}

/// Write a CSV file and return its path as a string.
pub fn write_csv(dir: &Path, name: &str, content: &str) -> String {
    let path: PathBuf = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

/// The students fixture used across the SELECT tests.
pub fn students_csv(dir: &Path) -> String {
    write_csv(
        dir,
        "students.csv",
        "name,math_score\n\
         ana,85\n\
         bruno,92\n\
         carla,78\n\
         diego,85\n\
         elena,90\n\
         felix,61\n",
    )
}

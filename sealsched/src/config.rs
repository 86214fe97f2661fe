//! sealsched configuration types and loading

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use callstore::{KvStore, MemoryStore, SqliteStore};

use crate::domain::{GIB, ResourceTable, Resources, TaskType};
use crate::scheduler::SchedulerConfig;

/// Main sealsched configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler loop tuning
    pub scheduler: SchedulerConfig,

    /// Call store location
    pub storage: StorageConfig,

    /// Per-task footprint overrides on top of the built-in table
    pub resources: HashMap<TaskType, Resources>,

    /// Local worker fleet used by `simulate`
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .sealsched.yml
        let local_config = PathBuf::from(".sealsched.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/sealsched/sealsched.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sealsched").join("sealsched.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Built-in footprints with the configured overrides applied
    pub fn resource_table(&self) -> ResourceTable {
        ResourceTable::default().merged(&self.resources)
    }
}

/// Call store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding call records
    pub path: PathBuf,

    /// Keep call records in memory only
    #[serde(rename = "in-memory")]
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/sealsched on Linux)
        let path = dirs::data_dir()
            .map(|d| d.join("sealsched"))
            .unwrap_or_else(|| PathBuf::from(".sealsched"))
            .join("calls.db");

        Self { path, in_memory: false }
    }
}

impl StorageConfig {
    /// Open the configured store
    pub fn open(&self) -> Result<Arc<dyn KvStore>> {
        if self.in_memory {
            return Ok(Arc::new(MemoryStore::new()));
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }
        let store = SqliteStore::open(&self.path)
            .context(format!("Failed to open call store at {}", self.path.display()))?;
        Ok(Arc::new(store))
    }
}

/// One simulated worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimWorkerConfig {
    pub hostname: String,
    pub cpus: u64,
    #[serde(rename = "ram-gib")]
    pub ram_gib: u64,
    pub gpus: u64,
    #[serde(rename = "scratch-gib")]
    pub scratch_gib: u64,
    /// Supported task types; empty means all
    pub tasks: Vec<TaskType>,
}

impl Default for SimWorkerConfig {
    fn default() -> Self {
        Self {
            hostname: "sim-worker".to_string(),
            cpus: 16,
            ram_gib: 128,
            gpus: 1,
            scratch_gib: 1024,
            tasks: Vec::new(),
        }
    }
}

impl SimWorkerConfig {
    pub fn resources(&self) -> Resources {
        Resources::new(self.cpus, self.ram_gib * GIB, self.gpus, self.scratch_gib * GIB)
    }
}

/// Settings for the `simulate` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub workers: Vec<SimWorkerConfig>,

    /// Task types submitted, cycled in order
    pub tasks: Vec<TaskType>,

    /// Simulated duration of one task's work step
    #[serde(rename = "task-ms")]
    pub task_ms: u64,

    /// Fail every n-th task; 0 never fails
    #[serde(rename = "fail-every")]
    pub fail_every: u64,

    /// Initial wait used instead of the scheduler's
    #[serde(rename = "init-wait-ms")]
    pub init_wait_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            workers: vec![
                SimWorkerConfig {
                    hostname: "sim-1".to_string(),
                    cpus: 32,
                    ram_gib: 256,
                    gpus: 2,
                    scratch_gib: 2048,
                    tasks: Vec::new(),
                },
                SimWorkerConfig {
                    hostname: "sim-2".to_string(),
                    ..Default::default()
                },
            ],
            tasks: vec![
                TaskType::AddPiece,
                TaskType::PreCommit1,
                TaskType::PreCommit2,
                TaskType::Commit1,
            ],
            task_ms: 50,
            fail_every: 0,
            init_wait_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert!(!config.storage.in_memory);
        assert!(config.storage.path.ends_with("calls.db"));
        assert_eq!(config.simulation.workers.len(), 2);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
scheduler:
  assigner: spread
  max-windows: 3

storage:
  in-memory: true

resources:
  seal/v0/precommit/1:
    cpus: 2
    ram: 1024

simulation:
  task-ms: 5
  fail-every: 3
  workers:
    - hostname: box
      cpus: 4
      ram-gib: 8
      tasks: [seal/v0/addpiece]
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scheduler.assigner, "spread");
        assert_eq!(config.scheduler.max_windows, 3);
        assert_eq!(config.scheduler.init_wait_ms, 30_000);
        assert!(config.storage.in_memory);
        assert_eq!(config.simulation.task_ms, 5);
        assert_eq!(config.simulation.fail_every, 3);

        let worker = &config.simulation.workers[0];
        assert_eq!(worker.hostname, "box");
        assert_eq!(worker.resources(), Resources::new(4, 8 * GIB, 1, 1024 * GIB));
        assert_eq!(worker.tasks, vec![TaskType::AddPiece]);

        let table = config.resource_table();
        assert_eq!(table.get(TaskType::PreCommit1), Resources::new(2, 1024, 0, 0));
        assert_eq!(table.get(TaskType::Commit1), ResourceTable::default().get(TaskType::Commit1));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealsched.yml");
        fs::write(&path, "scheduler:\n  init-wait-ms: 7\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.init_wait_ms, 7);

        let missing = dir.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_open_memory_store() {
        let storage = StorageConfig {
            in_memory: true,
            ..Default::default()
        };
        let store = storage.open().unwrap();
        store.put("k", b"v").unwrap();
        assert!(store.has("k").unwrap());
    }

    #[test]
    fn test_open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            path: dir.path().join("nested").join("calls.db"),
            in_memory: false,
        };
        let store = storage.open().unwrap();
        store.put("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }
}

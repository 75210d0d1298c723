//! Node configuration: the closed protocol tunable set (§6) plus
//! the ambient `node`/`storage`/`logging` sections that configure the
//! runtime but not ledger/mesh semantics. Loaded from TOML with the source
//! tree's `load_from_file` / `load_or_create` / `save_to_file` shape.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Get the platform-specific data directory for meshledger.
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meshledger")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".meshledger")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub ledger: LedgerConfig,
    pub session: SessionConfig,
    pub mesh: MeshConfig,
    pub obfuscator: ObfuscatorConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// Path to the encrypted identity keypair file, relative to `storage.data_dir`
    /// unless absolute.
    pub identity_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sled" (durable) or "memory" (ephemeral, tests and short-lived demos).
    pub backend: String,
    pub data_dir: String,
    pub cache_size_mb: usize,
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
    pub output: String,
    pub file_path: String,
}

/// C3/C4 tunables: `min_fee`, `pow_difficulty`, `mempool_max_age`,
/// `mempool_sweep_interval`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub min_fee: i64,
    pub pow_difficulty: u32,
    pub mempool_max_age_secs: i64,
    pub mempool_sweep_interval_secs: u64,
}

/// C6 tunables: `session_time_rotation`, `session_volume_rotation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub time_rotation_secs: u64,
    pub volume_rotation_frames: u64,
    /// "aes256gcm" or "chacha20poly1305"; selects the `AeadCipher` backing
    /// every session's framing.
    pub cipher: String,
}

/// C7 tunables: `mesh_ttl_default`, `mesh_priority_fairness_cap`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeshConfig {
    pub ttl_default: u16,
    /// Max frames drained from a single priority class before yielding to the
    /// next lower class, preventing Bulk starvation.
    pub priority_fairness_cap: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Duplicate `message_id` suppression window.
    pub dedup_window_secs: u64,
    /// Top-K neighbors by reputation considered for a broadcast forward.
    pub broadcast_fanout: usize,
    pub failure_quarantine_threshold: u32,
}

/// C8 tunables, all optional features independently toggled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscatorConfig {
    pub padding_enabled: bool,
    pub padding_buckets: Vec<usize>,
    pub jitter_enabled: bool,
    pub max_jitter_ms: u64,
    pub decoy_enabled: bool,
    /// Decoy frames emitted per second when real traffic is below threshold.
    pub decoy_rate: f64,
}

/// C5 tunables: `sync_interval`, `sync_response_max_entries`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub response_max_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                name: "meshledger-node".to_string(),
                identity_path: "identity.key".to_string(),
            },
            storage: StorageConfig {
                backend: "sled".to_string(),
                data_dir: "".to_string(),
                cache_size_mb: 256,
                flush_interval_ms: 1000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                output: "stdout".to_string(),
                file_path: "./logs/meshledger.log".to_string(),
            },
            ledger: LedgerConfig {
                min_fee: 1,
                pow_difficulty: 12,
                mempool_max_age_secs: 30 * 60,
                mempool_sweep_interval_secs: 5 * 60,
            },
            session: SessionConfig {
                time_rotation_secs: 60 * 60,
                volume_rotation_frames: 100,
                cipher: "aes256gcm".to_string(),
            },
            mesh: MeshConfig {
                ttl_default: 6,
                priority_fairness_cap: 8,
                max_retries: 3,
                retry_backoff_ms: 500,
                dedup_window_secs: 5 * 60,
                broadcast_fanout: 3,
                failure_quarantine_threshold: 5,
            },
            obfuscator: ObfuscatorConfig {
                padding_enabled: false,
                padding_buckets: vec![256, 512, 1024, 4096],
                jitter_enabled: false,
                max_jitter_ms: 250,
                decoy_enabled: false,
                decoy_rate: 0.1,
            },
            sync: SyncConfig {
                interval_secs: 5 * 60,
                response_max_entries: 500,
            },
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Loads `path` if it exists; otherwise writes and returns a fresh
    /// default config rooted at the platform data directory.
    pub fn load_or_create(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if fs::metadata(path).is_ok() {
            let mut config = Self::load_from_file(path)?;
            if config.storage.data_dir.is_empty() {
                config.storage.data_dir = get_data_dir().to_string_lossy().to_string();
            }
            Ok(config)
        } else {
            let mut config = Config::default();
            let data_dir = get_data_dir();
            fs::create_dir_all(&data_dir)?;
            config.storage.data_dir = data_dir.to_string_lossy().to_string();
            config.save_to_file(path)?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.ledger.min_fee, config.ledger.min_fee);
        assert_eq!(back.mesh.ttl_default, config.mesh.ttl_default);
    }

    #[test]
    fn load_or_create_writes_a_default_config_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();

        assert!(!path.exists());
        let config = Config::load_or_create(path_str).unwrap();
        assert!(path.exists());
        assert_eq!(config.ledger.pow_difficulty, Config::default().ledger.pow_difficulty);

        let reloaded = Config::load_or_create(path_str).unwrap();
        assert_eq!(reloaded.node.name, config.node.name);
    }
}

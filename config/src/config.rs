use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// Node settings. Missing keys in the file fall back to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` the HTTP server binds to; also this node's own peer address.
    pub listen_addr: String,
    pub data_dir: String,
    /// Receiver of the coinbase reward for blocks mined here.
    pub miner_address: String,
    pub difficulty: u32,
    /// Seed peers as `host:port` or full URLs.
    pub peers: Vec<String>,
    pub header_timeout_ms: u64,
    pub chain_timeout_ms: u64,
    /// 0 disables the background miner.
    pub mine_interval_secs: u64,
    /// 0 disables periodic resolution.
    pub resolve_interval_secs: u64,
}

impl Config {
    fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path);
        PathBuf::from(expanded.into_owned())
    }

    fn base_dir() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        // Windows users expect app data under %APPDATA% rather than a dot folder.
        if cfg!(target_os = "windows") {
            return dirs::data_dir().unwrap_or(home).join("Minichain");
        }

        home.join(".minichain")
    }

    fn default_data_dir() -> String {
        Self::base_dir().join("data").to_string_lossy().into_owned()
    }

    pub fn default_path() -> PathBuf {
        Self::base_dir().join("config.json")
    }

    /// Data directory with tilde expansion applied.
    pub fn data_dir_resolved(&self) -> PathBuf {
        Self::expand_path(&self.data_dir)
    }

    /// Load from the default path, then apply process environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_from(&Self::default_path())?;
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Read `path`; a missing file is created with defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Configuration file not found, writing defaults to {}",
                path.display()
            );
            let cfg = Self::default();
            cfg.save_to(path)?;
            return Ok(cfg);
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("configuration file format error in {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply `MY_NETWORK_ADDRESS`, `SEED_NODES` (JSON array), `NODE_ADDRESS` and
    /// `MINICHAIN_DIFFICULTY` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("MY_NETWORK_ADDRESS") {
            self.listen_addr = addr;
        }
        if let Some(raw) = lookup("SEED_NODES") {
            self.peers = serde_json::from_str(&raw)
                .with_context(|| format!("SEED_NODES must be a JSON array of strings: {}", raw))?;
        }
        if let Some(addr) = lookup("NODE_ADDRESS") {
            self.miner_address = addr;
        }
        if let Some(raw) = lookup("MINICHAIN_DIFFICULTY") {
            self.difficulty = raw
                .trim()
                .parse()
                .with_context(|| format!("MINICHAIN_DIFFICULTY is not a number: {}", raw))?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.difficulty > 64 {
            return Err(anyhow!(
                "difficulty {} exceeds the 64 hex digits of a hash",
                self.difficulty
            ));
        }
        if self.listen_addr.trim().is_empty() {
            return Err(anyhow!("listen_addr must not be empty"));
        }
        Ok(())
    }

    /// Configured peers minus this node's own address and duplicates.
    pub fn peer_list(&self) -> Vec<String> {
        let own = normalize(&self.listen_addr);
        let mut out: Vec<String> = Vec::new();
        for peer in &self.peers {
            let norm = normalize(peer);
            if norm.is_empty() || norm == own || out.iter().any(|p| normalize(p) == norm) {
                continue;
            }
            out.push(peer.trim().to_string());
        }
        out
    }
}

fn normalize(addr: &str) -> String {
    addr.trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/')
        .to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            data_dir: Self::default_data_dir(),
            miner_address: "NODE_0001".to_string(),
            difficulty: 2,
            peers: Vec::new(),
            header_timeout_ms: 3_000,
            chain_timeout_ms: 5_000,
            mine_interval_secs: 0,
            resolve_interval_secs: 30,
        }
    }
}

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use arc_swap::ArcSwap;
use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Serialized},
    value::{Dict, Map, Value},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const DEFAULT_CONFIG_FILENAME: &str = "server_config.ini";
const DEFAULT_DATA_DIR: &str = "./browser_data";
const ADMIN_KEY_FILENAME: &str = "admin_key.txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub max_concurrent_clients: usize,
    pub heartbeat_interval: u64,
    pub max_inactive_minutes: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            max_concurrent_clients: 2,
            heartbeat_interval: 30,
            max_inactive_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    pub data_dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSection {
    /// Whether `GET /admin/key` is served at all (Open Question #3: opt-in).
    pub expose_key_endpoint: bool,
    /// Whether smart-import's `strategy.sharing` may rewrite `max_concurrent_clients`
    /// (Open Question #2: kept, gated).
    pub smart_import_adjusts_concurrency: bool,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            expose_key_endpoint: false,
            smart_import_adjusts_concurrency: true,
        }
    }
}

/// The broker's full runtime configuration. Held behind an `ArcSwap` so that
/// `setMaxConcurrent` is a lock-free atomic swap, the same pattern the
/// teacher uses for `CLEWDR_CONFIG`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerConfig {
    pub server: ServerSection,
    pub store: StoreSection,
    pub admin: AdminSection,
    #[serde(skip)]
    pub admin_key: String,
    #[serde(skip)]
    config_path: PathBuf,
}

impl BrokerConfig {
    /// Loads `path`, creating it with defaults if absent, then layers env
    /// overrides (`BROKER_SERVER_MAX_CONCURRENT_CLIENTS=...`) on top, and
    /// bootstraps the admin key from the data directory.
    pub fn load(path: &Path) -> figment::Result<Self> {
        if !path.exists() {
            info!("no config file at {}, writing defaults", path.display());
            let defaults = BrokerConfig::default();
            if let Err(e) = write_ini(path, &defaults) {
                warn!("failed to write default config: {e}");
            }
        }

        let ini = IniProvider::from_path(path)?;
        let mut config: BrokerConfig = Figment::new()
            .merge(Serialized::defaults(BrokerConfig::default()))
            .merge(ini)
            .merge(Env::prefixed("BROKER_").split("_"))
            .extract()?;

        config.config_path = path.to_path_buf();
        config.admin_key = load_or_create_admin_key(&config.store.data_dir);
        Ok(config)
    }

    /// Checks an `X-Admin-Key` header value against the bootstrapped key.
    pub fn admin_auth(&self, candidate: &str) -> bool {
        !self.admin_key.is_empty() && candidate == self.admin_key
    }

    /// Persists `server.max_concurrent_clients` back to the config file.
    pub fn persist_max_concurrent(&self) {
        if let Err(e) = write_ini(&self.config_path, self) {
            warn!("failed to persist config: {e}");
        }
    }
}

fn load_or_create_admin_key(data_dir: &Path) -> String {
    let path = data_dir.join(ADMIN_KEY_FILENAME);
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    use base64::Engine;
    let key = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        warn!("failed to create data dir {}: {e}", data_dir.display());
    }
    if let Err(e) = std::fs::write(&path, &key) {
        warn!("failed to persist admin key at {}: {e}", path.display());
    }
    key
}

fn write_ini(path: &Path, config: &BrokerConfig) -> std::io::Result<()> {
    let contents = format!(
        "[server]\nmax_concurrent_clients = {}\nheartbeat_interval     = {}\nmax_inactive_minutes   = {}\n",
        config.server.max_concurrent_clients,
        config.server.heartbeat_interval,
        config.server.max_inactive_minutes,
    );
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

/// Minimal `[section]\nkey = value` INI reader exposed as a `figment::Provider`.
///
/// The pack has no off-the-shelf crate for this exact "recreate with
/// defaults if absent" INI shape, so this follows `figment`'s own `Provider`
/// trait rather than reaching for an unlisted dependency.
struct IniProvider {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniProvider {
    fn from_path(path: &Path) -> figment::Result<Self> {
        let text = std::fs::read_to_string(path).unwrap_or_default();
        Ok(Self {
            sections: parse_ini(&text),
        })
    }
}

fn parse_ini(text: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections = HashMap::new();
    let mut current = String::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.trim().to_string();
            sections.entry(current.clone()).or_insert_with(HashMap::new);
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_insert_with(HashMap::new)
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}

impl Provider for IniProvider {
    fn metadata(&self) -> Metadata {
        Metadata::named("server_config.ini")
    }

    fn data(&self) -> figment::Result<Map<Profile, Dict>> {
        let mut dict = Dict::new();
        for (section, kvs) in &self.sections {
            let mut inner = Dict::new();
            for (k, v) in kvs {
                let value = if let Ok(n) = v.parse::<i64>() {
                    Value::from(n)
                } else if let Ok(b) = v.parse::<bool>() {
                    Value::from(b)
                } else {
                    Value::from(v.clone())
                };
                inner.insert(k.clone(), value);
            }
            dict.insert(section.clone(), Value::from(inner));
        }
        Ok(Map::from([(Profile::default(), dict)]))
    }
}

pub static BROKER_CONFIG: LazyLock<ArcSwap<BrokerConfig>> =
    LazyLock::new(|| ArcSwap::new(Arc::new(BrokerConfig::default())));

/// Atomically sets `max_concurrent_clients`, mirroring `CookieActor::save`'s
/// rcu-then-spawn-persist pattern.
pub fn set_max_concurrent(n: usize) {
    BROKER_CONFIG.rcu(|config| {
        let mut config = BrokerConfig::clone(config);
        config.server.max_concurrent_clients = n;
        config
    });
    let snapshot = BROKER_CONFIG.load_full();
    tokio::spawn(async move {
        snapshot.persist_max_concurrent();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_values() {
        let text = "[server]\nmax_concurrent_clients = 3\nheartbeat_interval = 45\n";
        let sections = parse_ini(text);
        assert_eq!(
            sections.get("server").unwrap().get("max_concurrent_clients"),
            Some(&"3".to_string())
        );
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = "; comment\n\n[server]\n# another\nmax_concurrent_clients = 1\n";
        let sections = parse_ini(text);
        assert_eq!(sections.get("server").unwrap().len(), 1);
    }
}

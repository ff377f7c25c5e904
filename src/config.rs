use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::RouterName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub router_name: RouterName,
    /// Directory for state that must survive restarts (sequence counters).
    pub state_dir: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,
    #[serde(default)]
    pub advertised_prefixes: Vec<String>,
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
    #[serde(default = "default_hello_interval")]
    pub hello_interval_secs: u64,
    #[serde(default = "default_hello_timeout")]
    pub hello_timeout_secs: u64,
    #[serde(default = "default_hello_retries")]
    pub hello_retries: u32,
    #[serde(default = "default_lsa_refresh_interval")]
    pub lsa_refresh_interval_secs: u64,
    #[serde(default = "default_lsa_fetch_lifetime")]
    pub lsa_fetch_lifetime_secs: u64,
    #[serde(default = "default_lsa_fetch_deadline")]
    pub lsa_fetch_deadline_secs: u64,
    #[serde(default = "default_lsa_grace_period")]
    pub lsa_grace_period_secs: u64,
    #[serde(default = "default_adj_lsa_build_interval")]
    pub adj_lsa_build_interval_secs: u64,
    #[serde(default = "default_routing_calc_interval")]
    pub routing_calc_interval_secs: u64,
    /// 0 means no limit.
    #[serde(default)]
    pub max_faces_per_prefix: usize,
    #[serde(default)]
    pub hyperbolic: HyperbolicConfig,
    #[serde(default)]
    pub debug_dump: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborConfig {
    pub name: RouterName,
    /// e.g. "udp4://10.0.0.2:6363"
    pub face_uri: String,
    #[serde(default = "default_link_cost")]
    pub link_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HyperbolicConfig {
    #[serde(default)]
    pub mode: HyperbolicMode,
    #[serde(default)]
    pub radius: f64,
    #[serde(default)]
    pub angles: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HyperbolicMode {
    #[default]
    Off,
    On,
    DryRun,
}

fn default_port() -> u16 {
    6363
}

fn default_multicast_group() -> Ipv4Addr {
    Ipv4Addr::new(224, 0, 0, 114)
}

fn default_hello_interval() -> u64 {
    60
}

fn default_hello_timeout() -> u64 {
    3
}

fn default_hello_retries() -> u32 {
    3
}

fn default_lsa_refresh_interval() -> u64 {
    1800
}

fn default_lsa_fetch_lifetime() -> u64 {
    4
}

fn default_lsa_fetch_deadline() -> u64 {
    60
}

fn default_lsa_grace_period() -> u64 {
    10
}

fn default_adj_lsa_build_interval() -> u64 {
    10
}

fn default_routing_calc_interval() -> u64 {
    15
}

fn default_link_cost() -> f64 {
    10.0
}

impl RouterConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RouterConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn hello_interval(&self) -> Duration {
        Duration::from_secs(self.hello_interval_secs)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    pub fn lsa_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.lsa_refresh_interval_secs)
    }

    pub fn lsa_fetch_lifetime(&self) -> Duration {
        Duration::from_secs(self.lsa_fetch_lifetime_secs)
    }

    pub fn lsa_fetch_deadline(&self) -> Duration {
        Duration::from_secs(self.lsa_fetch_deadline_secs)
    }

    pub fn lsa_grace_period(&self) -> Duration {
        Duration::from_secs(self.lsa_grace_period_secs)
    }

    pub fn adj_lsa_build_interval(&self) -> Duration {
        Duration::from_secs(self.adj_lsa_build_interval_secs)
    }

    /// Delay before retrying an adjacency-LSA build while neighbor
    /// statuses are still unresolved: one full probe round.
    pub fn adj_lsa_build_retry(&self) -> Duration {
        Duration::from_secs(self.hello_retries as u64 * self.hello_timeout_secs)
    }

    pub fn routing_calc_interval(&self) -> Duration {
        Duration::from_secs(self.routing_calc_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let json = r#"{"router_name": "/net/a", "state_dir": "/tmp/ndlsr"}"#;
        let config: RouterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 6363);
        assert_eq!(config.hello_retries, 3);
        assert_eq!(config.lsa_refresh_interval_secs, 1800);
        assert_eq!(config.hyperbolic.mode, HyperbolicMode::Off);
        assert!(config.neighbors.is_empty());
    }

    #[test]
    fn hyperbolic_mode_tags() {
        let json = r#"{
            "router_name": "/net/a",
            "state_dir": "/tmp/ndlsr",
            "hyperbolic": {"mode": "dry-run", "radius": 12.3, "angles": [1.45]}
        }"#;
        let config: RouterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.hyperbolic.mode, HyperbolicMode::DryRun);
        assert_eq!(config.hyperbolic.angles.len(), 1);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndlsr.conf.json");
        let json = r#"{
            "router_name": "/net/a",
            "state_dir": "/tmp/ndlsr",
            "neighbors": [{"name": "/net/b", "face_uri": "udp4://10.0.0.2:6363", "link_cost": 25.0}]
        }"#;
        let config: RouterConfig = serde_json::from_str(json).unwrap();
        config.save(&path).unwrap();

        let reloaded = RouterConfig::load(&path).unwrap();
        assert_eq!(reloaded.router_name, "/net/a");
        assert_eq!(reloaded.neighbors.len(), 1);
        assert_eq!(reloaded.neighbors[0].link_cost, 25.0);
    }
}

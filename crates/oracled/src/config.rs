//! Daemon configuration.
//!
//! One typed record, loaded from JSON at startup through the settings
//! crate; unknown keys are rejected. Defaults reproduce a complete
//! single-host deployment with both rails in front of one internal
//! backend.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rail {
    #[serde(rename = "lightning-channel")]
    Lightning,
    #[serde(rename = "stablecoin-evm")]
    StablecoinEvm,
}

/// One paid route. `backend_url` defaults to the in-process backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub path: String,
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Integer minor units (sats) on the Lightning rail; a decimal on
    /// the stablecoin rail.
    pub price: f64,
    pub rail: Rail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OracleConfig {
    pub payment_node_base_url: String,
    pub payment_node_credential_path: PathBuf,
    pub keystore_dir: PathBuf,
    pub event_data_dir: PathBuf,

    pub backend_listen: SocketAddr,
    pub lightning_listen: SocketAddr,
    pub stablecoin_listen: SocketAddr,

    pub route_table: Vec<RouteConfig>,
    pub prefix_route_table: Vec<RouteConfig>,
    pub free_route_table: Vec<String>,

    pub stablecoin_recipient_address: String,
    pub stablecoin_contract: String,
    pub evm_rpc_url: String,
    pub resource_base_url: String,

    pub depeg_tolerance: f64,
    pub depeg_check_interval_secs: u64,
    pub grace_cooldown_secs: u64,
    pub blocked_threshold: usize,
    pub blocked_window_secs: u64,
    pub settlement_timeout_secs: u64,
    pub settlement_interval_secs: u64,
    pub nonce_ttl_secs: u64,

    pub fetch_deadline_secs: u64,
    pub official_rate_max_age_secs: u64,
    pub vwap_window_secs: u64,
    pub vwap_min_trades: usize,
    pub vwap_min_sources: usize,

    pub attestation_pair: String,
    pub attestation_schedule_secs: u64,
    pub announcement_horizon_secs: u64,
    pub recovery_grace_secs: u64,
    pub digit_count: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let lightning = |path: &str, price: f64| RouteConfig {
            path: path.to_string(),
            backend_url: None,
            price,
            rail: Rail::Lightning,
        };
        let stablecoin = |path: &str, price: f64| RouteConfig {
            path: path.to_string(),
            backend_url: None,
            price,
            rail: Rail::StablecoinEvm,
        };
        Self {
            payment_node_base_url: "https://localhost:8081".to_string(),
            payment_node_credential_path: PathBuf::from("creds/invoice.macaroon"),
            keystore_dir: mycelia_keystore::default_keystore_dir(),
            event_data_dir: PathBuf::from("data/events"),

            backend_listen: "127.0.0.1:9100".parse().expect("static addr"),
            lightning_listen: "0.0.0.0:8080".parse().expect("static addr"),
            stablecoin_listen: "0.0.0.0:8402".parse().expect("static addr"),

            route_table: vec![
                lightning("/oracle/btcusd", 10.0),
                lightning("/oracle/btcusd/vwap", 20.0),
                lightning("/oracle/ethusd", 10.0),
                lightning("/oracle/solusd", 10.0),
                lightning("/oracle/eurusd", 10.0),
                lightning("/oracle/xauusd", 10.0),
                lightning("/oracle/soleur", 10.0),
                lightning("/oracle/btceur", 10.0),
                stablecoin("/oracle/btcusd", 0.001),
                stablecoin("/oracle/btcusd/vwap", 0.002),
                stablecoin("/oracle/ethusd", 0.001),
                stablecoin("/oracle/solusd", 0.001),
                stablecoin("/oracle/eurusd", 0.001),
                stablecoin("/oracle/xauusd", 0.001),
                stablecoin("/oracle/soleur", 0.001),
                stablecoin("/oracle/btceur", 0.001),
            ],
            prefix_route_table: vec![
                lightning("/dlc/oracle/attestations/", 1000.0),
                stablecoin("/dlc/oracle/attestations/", 0.01),
            ],
            free_route_table: vec![
                "/health".to_string(),
                "/oracle/status".to_string(),
                "/dlc/oracle/pubkey".to_string(),
                "/dlc/oracle/announcements".to_string(),
                "/dlc/oracle/status".to_string(),
            ],

            stablecoin_recipient_address: String::new(),
            stablecoin_contract: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            evm_rpc_url: "https://mainnet.base.org".to_string(),
            resource_base_url: "https://api.myceliasignal.com".to_string(),

            depeg_tolerance: 0.02,
            depeg_check_interval_secs: 60,
            grace_cooldown_secs: 600,
            blocked_threshold: 10,
            blocked_window_secs: 7 * 24 * 3600,
            settlement_timeout_secs: 300,
            settlement_interval_secs: 15,
            nonce_ttl_secs: 300,

            fetch_deadline_secs: 5,
            official_rate_max_age_secs: 7 * 24 * 3600,
            vwap_window_secs: 300,
            vwap_min_trades: 10,
            vwap_min_sources: 1,

            attestation_pair: "BTCUSD".to_string(),
            attestation_schedule_secs: 3600,
            announcement_horizon_secs: 24 * 3600,
            recovery_grace_secs: 3600,
            digit_count: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelia_settings::{Settings, SettingsError};

    #[test]
    fn test_defaults_roundtrip_through_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracled.json");

        let settings: Settings<OracleConfig> = Settings::load_or_default(&path).unwrap();
        assert_eq!(settings.config.depeg_tolerance, 0.02);
        assert_eq!(settings.config.route_table.len(), 16);

        let reloaded: Settings<OracleConfig> = Settings::load(&path).unwrap();
        assert_eq!(reloaded.config.nonce_ttl_secs, 300);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracled.json");
        std::fs::write(&path, r#"{"depeg_tolreance": 0.05}"#).unwrap();

        assert!(matches!(
            Settings::<OracleConfig>::load(&path),
            Err(SettingsError::ParseError(_, _))
        ));
    }

    #[test]
    fn test_rail_names_are_wire_stable() {
        let entry: RouteConfig = serde_json::from_str(
            r#"{"path":"/oracle/btcusd","price":10,"rail":"lightning-channel"}"#,
        )
        .unwrap();
        assert_eq!(entry.rail, Rail::Lightning);
        let entry: RouteConfig = serde_json::from_str(
            r#"{"path":"/oracle/btcusd","price":0.001,"rail":"stablecoin-evm"}"#,
        )
        .unwrap();
        assert_eq!(entry.rail, Rail::StablecoinEvm);
    }
}

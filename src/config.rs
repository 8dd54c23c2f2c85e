use crate::network::EvmChainPolicy;
use std::time::Duration;

/// Timing constants and policies of the bridge.
///
/// Every field has a default, so a partial JSON (or JS) object is enough:
///
/// ```
/// # use wallet_connector::BridgeConfig;
/// let config = BridgeConfig::from_json(r#"{ "connectTimeoutMs": 10000 }"#).unwrap();
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// how long a single `enable()` may wait for the user to approve
    pub connect_timeout_ms: u64,
    /// number of `enable()` attempts before giving up
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub discovery_poll_interval_ms: u64,
    /// how long discovery waits for extensions to inject their provider
    pub discovery_max_wait_ms: u64,
    /// how long the CIP-95 bridge waits for a response before we fall back
    /// to CIP-30
    pub bridge_timeout_ms: u64,
    pub history_limit: usize,
    pub polygon_chain_ids: Vec<String>,
    /// prefix of the keys written in the client side storage
    pub storage_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            discovery_poll_interval_ms: 100,
            discovery_max_wait_ms: 3_000,
            bridge_timeout_ms: 3_000,
            history_limit: 50,
            polygon_chain_ids: vec!["0x89".to_owned(), "0x13881".to_owned()],
            storage_prefix: "wallet-connector".to_owned(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }

    /// how long a connection attempt waits on the CIP-95 bridge before
    /// falling back to CIP-30, at most half of the connect timeout so the
    /// fallback still has time to run
    pub fn bridge_wait(&self) -> Duration {
        self.bridge_timeout().min(self.connect_timeout() / 2)
    }

    pub fn discovery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_interval_ms)
    }

    /// number of extra scans discovery performs before concluding a provider
    /// is absent
    pub fn discovery_polls(&self) -> u32 {
        let polls = self.discovery_max_wait_ms / self.discovery_poll_interval_ms.max(1);
        u32::try_from(polls).unwrap_or(u32::MAX)
    }

    /// at least one attempt is always made
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn evm_chains(&self) -> EvmChainPolicy {
        EvmChainPolicy::new(&self.polygon_chain_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::EvmChain;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json(
            r#"{ "connectTimeoutMs": 100, "maxRetries": 1, "polygonChainIds": ["137"] }"#,
        )
        .unwrap();

        assert_eq!(config.connect_timeout(), Duration::from_millis(100));
        assert_eq!(config.attempts(), 1);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.evm_chains().classify(137), EvmChain::Polygon);
        assert_eq!(config.evm_chains().classify(0x13881), EvmChain::Ethereum);
    }

    #[test]
    fn bounded_discovery_poll() {
        let config = BridgeConfig::default();
        assert_eq!(config.discovery_polls(), 30);

        let config = BridgeConfig {
            discovery_poll_interval_ms: 0,
            discovery_max_wait_ms: 0,
            max_retries: 0,
            ..BridgeConfig::default()
        };
        assert_eq!(config.discovery_polls(), 0);
        assert_eq!(config.attempts(), 1);
    }

    #[test]
    fn bridge_wait_within_connect_timeout() {
        let config = BridgeConfig {
            connect_timeout_ms: 200,
            bridge_timeout_ms: 500,
            ..BridgeConfig::default()
        };
        assert_eq!(config.bridge_wait(), Duration::from_millis(100));

        let config = BridgeConfig {
            connect_timeout_ms: 30_000,
            bridge_timeout_ms: 500,
            ..BridgeConfig::default()
        };
        assert_eq!(config.bridge_wait(), Duration::from_millis(500));
    }
}

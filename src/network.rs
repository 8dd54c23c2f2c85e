use core::fmt;

/// The chain families the bridge knows how to talk to.
///
/// Each family has its own provider namespace in the page and at most one
/// live session at a time.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Cardano,
    Evm,
    Solana,
}

impl ChainFamily {
    pub const ALL: [ChainFamily; 3] = [ChainFamily::Cardano, ChainFamily::Evm, ChainFamily::Solana];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Cardano => "cardano",
            ChainFamily::Evm => "evm",
            ChainFamily::Solana => "solana",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cardano network as reported by CIP-30 `getNetworkId`.
///
/// The wallet only tells us `0` or `1`, so the testing networks can't be told
/// apart.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum NetworkId {
    /// Pre-Production or Preview
    Testing,
    Mainnet,
    Unknown(u8),
}

impl From<NetworkId> for u8 {
    fn from(network_id: NetworkId) -> Self {
        match network_id {
            NetworkId::Testing => 0,
            NetworkId::Mainnet => 1,
            NetworkId::Unknown(n) => n,
        }
    }
}

impl From<u8> for NetworkId {
    fn from(id: u8) -> Self {
        match id {
            0 => NetworkId::Testing,
            1 => NetworkId::Mainnet,
            unknown => NetworkId::Unknown(unknown),
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkId::Testing => write!(f, "testing"),
            NetworkId::Mainnet => write!(f, "mainnet"),
            NetworkId::Unknown(id) => write!(f, "unknown-network-id({id:#02x})"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum EvmChain {
    Ethereum,
    Polygon,
}

impl fmt::Display for EvmChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvmChain::Ethereum => write!(f, "ethereum"),
            EvmChain::Polygon => write!(f, "polygon"),
        }
    }
}

/// The network a session is connected to.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Network {
    Cardano(NetworkId),
    Evm { chain_id: u64, chain: EvmChain },
    Solana,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Cardano(id) => write!(f, "cardano:{id}"),
            Network::Evm { chain_id, chain } => write!(f, "{chain}:{chain_id:#x}"),
            Network::Solana => write!(f, "solana"),
        }
    }
}

impl serde::Serialize for Network {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Which EVM chain ids are labelled "polygon". Everything else is
/// "ethereum". This is a display policy, not something the provider tells
/// us, hence configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmChainPolicy {
    polygon: Vec<u64>,
}

impl EvmChainPolicy {
    pub fn new<I, S>(polygon_chain_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let polygon = polygon_chain_ids
            .into_iter()
            .filter_map(|id| parse_chain_id(id.as_ref()))
            .collect();
        Self { polygon }
    }

    pub fn classify(&self, chain_id: u64) -> EvmChain {
        if self.polygon.contains(&chain_id) {
            EvmChain::Polygon
        } else {
            EvmChain::Ethereum
        }
    }

    pub fn network(&self, chain_id: u64) -> Network {
        Network::Evm {
            chain_id,
            chain: self.classify(chain_id),
        }
    }
}

/// parse an EIP-155 chain id, either `0x` prefixed hexadecimal (as returned
/// by `eth_chainId`) or decimal
pub fn parse_chain_id(chain_id: &str) -> Option<u64> {
    let chain_id = chain_id.trim();
    match chain_id
        .strip_prefix("0x")
        .or_else(|| chain_id.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => chain_id.parse().ok(),
    }
}

//! Chain tag vocabulary and chain-id mapping.
//!
//! This module defines the closed set of EVM networks the observer fleet
//! understands, plus a `chain-<id>` escape hatch for numeric chain ids that
//! bridge events reference but the vocabulary does not name.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Supported EVM networks.
///
/// Bridge events frequently carry a numeric chain id rather than a name;
/// [`Chain::from_chain_id`] resolves those, falling back to
/// [`Chain::Other`] so that no event is dropped over an unknown id.
///
/// Serialized as the lowercase wire name (`ethereum`, `chain-<id>`).
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    /// Ethereum mainnet (chain ID 1).
    Ethereum,
    /// BNB Smart Chain (chain ID 56).
    Bsc,
    /// Polygon PoS (chain ID 137).
    Polygon,
    /// Arbitrum One (chain ID 42161).
    Arbitrum,
    /// OP Mainnet (chain ID 10).
    Optimism,
    /// Avalanche C-Chain (chain ID 43114).
    Avalanche,
    /// Fantom Opera (chain ID 250).
    Fantom,
    /// zkSync Era (chain ID 324).
    Zksync,
    /// Linea (chain ID 59144).
    Linea,
    /// Base mainnet (chain ID 8453).
    Base,
    /// Any chain id outside the named vocabulary, rendered as `chain-<id>`.
    Other(u64),
}

impl Serialize for Chain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for Chain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Chain {
    /// Return the numeric chain ID associated with the network.
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Bsc => 56,
            Chain::Polygon => 137,
            Chain::Arbitrum => 42161,
            Chain::Optimism => 10,
            Chain::Avalanche => 43114,
            Chain::Fantom => 250,
            Chain::Zksync => 324,
            Chain::Linea => 59144,
            Chain::Base => 8453,
            Chain::Other(id) => *id,
        }
    }

    /// Resolve a numeric chain id to a chain tag. Total: unknown ids map to
    /// [`Chain::Other`].
    pub fn from_chain_id(id: u64) -> Chain {
        match id {
            1 => Chain::Ethereum,
            56 => Chain::Bsc,
            137 => Chain::Polygon,
            42161 => Chain::Arbitrum,
            10 => Chain::Optimism,
            43114 => Chain::Avalanche,
            250 => Chain::Fantom,
            324 => Chain::Zksync,
            59144 => Chain::Linea,
            8453 => Chain::Base,
            other => Chain::Other(other),
        }
    }

    /// Return all named [`Chain`] variants (excludes `Other`).
    pub fn variants() -> &'static [Chain] {
        &[
            Chain::Ethereum,
            Chain::Bsc,
            Chain::Polygon,
            Chain::Arbitrum,
            Chain::Optimism,
            Chain::Avalanche,
            Chain::Fantom,
            Chain::Zksync,
            Chain::Linea,
            Chain::Base,
        ]
    }

    /// The lowercase wire name, e.g. `ethereum` or `chain-1313161554`.
    pub fn as_str(&self) -> String {
        match self {
            Chain::Ethereum => "ethereum".to_string(),
            Chain::Bsc => "bsc".to_string(),
            Chain::Polygon => "polygon".to_string(),
            Chain::Arbitrum => "arbitrum".to_string(),
            Chain::Optimism => "optimism".to_string(),
            Chain::Avalanche => "avalanche".to_string(),
            Chain::Fantom => "fantom".to_string(),
            Chain::Zksync => "zksync".to_string(),
            Chain::Linea => "linea".to_string(),
            Chain::Base => "base".to_string(),
            Chain::Other(id) => format!("chain-{id}"),
        }
    }
}

impl Display for Chain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for chain names outside the vocabulary.
#[derive(Debug, thiserror::Error)]
#[error("unknown chain tag: {0}")]
pub struct UnknownChain(pub String);

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Chain::Ethereum),
            "bsc" => Ok(Chain::Bsc),
            "polygon" => Ok(Chain::Polygon),
            "arbitrum" => Ok(Chain::Arbitrum),
            "optimism" => Ok(Chain::Optimism),
            "avalanche" => Ok(Chain::Avalanche),
            "fantom" => Ok(Chain::Fantom),
            "zksync" => Ok(Chain::Zksync),
            "linea" => Ok(Chain::Linea),
            "base" => Ok(Chain::Base),
            other => match other.strip_prefix("chain-") {
                Some(id) => id
                    .parse::<u64>()
                    .map(Chain::Other)
                    .map_err(|_| UnknownChain(s.to_string())),
                None => Err(UnknownChain(s.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_round_trips_for_named_variants() {
        for chain in Chain::variants() {
            assert_eq!(Chain::from_chain_id(chain.chain_id()), *chain);
        }
    }

    #[test]
    fn unknown_id_resolves_to_other() {
        let chain = Chain::from_chain_id(1313161554);
        assert_eq!(chain, Chain::Other(1313161554));
        assert_eq!(chain.to_string(), "chain-1313161554");
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("ethereum".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("base".parse::<Chain>().unwrap(), Chain::Base);
        assert_eq!(
            "chain-7777".parse::<Chain>().unwrap(),
            Chain::Other(7777)
        );
        assert!("dogechain".parse::<Chain>().is_err());
        assert!("chain-abc".parse::<Chain>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_tags() {
        let json = serde_json::to_string(&Chain::Arbitrum).unwrap();
        assert_eq!(json, "\"arbitrum\"");
        let back: Chain = serde_json::from_str("\"optimism\"").unwrap();
        assert_eq!(back, Chain::Optimism);
    }
}

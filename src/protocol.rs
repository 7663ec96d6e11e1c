//! Bridge protocol tags.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The closed set of bridge protocols the fleet can observe.
///
/// External strings (configuration, query filters) are validated through
/// [`FromStr`] at the boundary; inside the engine the tag is always a
/// variant, never a free-form string.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeProtocol {
    #[serde(rename = "stargate")]
    Stargate,
    #[serde(rename = "celer-cbridge")]
    CelerCBridge,
    #[serde(rename = "wormhole")]
    Wormhole,
    #[serde(rename = "synapse")]
    Synapse,
    #[serde(rename = "hop")]
    Hop,
    #[serde(rename = "debridge")]
    DeBridge,
    #[serde(rename = "across")]
    Across,
    #[serde(rename = "orbiter")]
    Orbiter,
    #[serde(rename = "xbridge")]
    XBridge,
    #[serde(rename = "multichain")]
    Multichain,
}

impl BridgeProtocol {
    /// The kebab-case wire name, also used in the relational store.
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeProtocol::Stargate => "stargate",
            BridgeProtocol::CelerCBridge => "celer-cbridge",
            BridgeProtocol::Wormhole => "wormhole",
            BridgeProtocol::Synapse => "synapse",
            BridgeProtocol::Hop => "hop",
            BridgeProtocol::DeBridge => "debridge",
            BridgeProtocol::Across => "across",
            BridgeProtocol::Orbiter => "orbiter",
            BridgeProtocol::XBridge => "xbridge",
            BridgeProtocol::Multichain => "multichain",
        }
    }

    /// Return all [`BridgeProtocol`] variants.
    pub fn variants() -> &'static [BridgeProtocol] {
        &[
            BridgeProtocol::Stargate,
            BridgeProtocol::CelerCBridge,
            BridgeProtocol::Wormhole,
            BridgeProtocol::Synapse,
            BridgeProtocol::Hop,
            BridgeProtocol::DeBridge,
            BridgeProtocol::Across,
            BridgeProtocol::Orbiter,
            BridgeProtocol::XBridge,
            BridgeProtocol::Multichain,
        ]
    }
}

impl Display for BridgeProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for protocol names outside the closed set.
#[derive(Debug, thiserror::Error)]
#[error("unknown bridge protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for BridgeProtocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BridgeProtocol::variants()
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownProtocol(s.to_string()))
    }
}

//! Per-protocol event decoders.
//!
//! A decoder is data, not code: a [`BridgeDecoder`] is a record of event
//! bindings, each pairing a `topic0` signature hash with a pure mapping
//! function into the normalized event shape. Adding a protocol means adding
//! a binding table, not a listener class. Decoding selects by `topic0`, so
//! event renames and version drift within a protocol are handled by
//! declaring every alias in the table.
//!
//! Decoders perform no I/O. Logs whose `topic0` is not in the table decode
//! to `None` and are dropped (counted, not errored) by the observer.

use alloy_primitives::{B256, LogData};
use alloy_rpc_types_eth::Log;
use serde_json::Map;

use crate::chain::Chain;
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide, TransferStatus};

mod across;
mod celer;
mod debridge;
mod hop;
mod multichain;
mod orbiter;
mod stargate;
mod synapse;
mod xbridge;
mod wormhole;

/// The protocol-specific half of a normalized transfer, produced by a
/// mapping function. The observer supplies the rest (id, protocol, tx hash,
/// block, timestamp) and pins the observed chain to the event's side.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub event_type: &'static str,
    pub side: TransferSide,
    /// Chain the value left, when the event encodes it.
    pub source_chain: Option<Chain>,
    /// Chain the value arrives at, when the event encodes it.
    pub destination_chain: Option<Chain>,
    pub source_address: Option<EvmAddress>,
    pub destination_address: Option<EvmAddress>,
    pub token_address: Option<EvmAddress>,
    pub amount: TokenAmount,
    /// Almost always `Pending`; `Failed` for decoder-recognized failure
    /// events (e.g. refunds of failed sends).
    pub status: TransferStatus,
    pub metadata: Map<String, serde_json::Value>,
}

impl DecodedEvent {
    fn new(event_type: &'static str, side: TransferSide) -> Self {
        Self {
            event_type,
            side,
            source_chain: None,
            destination_chain: None,
            source_address: None,
            destination_address: None,
            token_address: None,
            amount: TokenAmount::zero(),
            status: TransferStatus::Pending,
            metadata: Map::new(),
        }
    }
}

/// Decode failure for a recognized topic. The observer drops the record and
/// increments its decode-error counter.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("event data does not match declared signature: {0}")]
    Abi(#[from] alloy_sol_types::Error),
    #[error("log carries no topics")]
    MissingTopic,
    #[error("malformed payload: {0}")]
    Payload(&'static str),
}

/// One recognized event signature and its mapping.
pub struct EventBinding {
    pub name: &'static str,
    pub topic0: B256,
    pub map: fn(&LogData) -> Result<DecodedEvent, DecodeError>,
}

/// A protocol's decoder: its recognized signatures and nothing else.
pub struct BridgeDecoder {
    pub protocol: BridgeProtocol,
    pub bindings: &'static [EventBinding],
}

impl BridgeDecoder {
    /// The decoder for a protocol. Total over the closed protocol set.
    pub fn for_protocol(protocol: BridgeProtocol) -> &'static BridgeDecoder {
        match protocol {
            BridgeProtocol::Stargate => &stargate::DECODER,
            BridgeProtocol::CelerCBridge => &celer::DECODER,
            BridgeProtocol::Wormhole => &wormhole::DECODER,
            BridgeProtocol::Synapse => &synapse::DECODER,
            BridgeProtocol::Hop => &hop::DECODER,
            BridgeProtocol::DeBridge => &debridge::DECODER,
            BridgeProtocol::Across => &across::DECODER,
            BridgeProtocol::Orbiter => &orbiter::DECODER,
            BridgeProtocol::XBridge => &xbridge::DECODER,
            BridgeProtocol::Multichain => &multichain::DECODER,
        }
    }

    /// All `topic0` values this decoder recognizes, for log filters.
    pub fn topics(&self) -> Vec<B256> {
        self.bindings.iter().map(|b| b.topic0).collect()
    }

    /// Decode a raw log.
    ///
    /// `Ok(None)` for unknown topics (the log is simply not a bridge event
    /// this decoder knows); `Err` only when a recognized topic carries data
    /// that does not match its declared shape.
    pub fn decode(&self, log: &Log) -> Result<Option<DecodedEvent>, DecodeError> {
        let data = &log.inner.data;
        let Some(topic0) = data.topics().first() else {
            return Ok(None);
        };
        let Some(binding) = self.bindings.iter().find(|b| b.topic0 == *topic0) else {
            return Ok(None);
        };
        (binding.map)(data).map(Some)
    }
}

/// Decode a chain-id word that EVM bridges encode as the network's own
/// numeric chain id.
pub(crate) fn evm_chain(id: u64) -> Chain {
    Chain::from_chain_id(id)
}

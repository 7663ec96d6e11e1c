//! Stargate (LayerZero) decoder.
//!
//! Stargate routers encode the remote network as a LayerZero chain id, not
//! an EVM chain id, so this decoder carries its own resolution table.

use alloy_primitives::LogData;
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding};
use crate::chain::Chain;
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event Swap(uint16 chainId, uint256 dstPoolId, uint256 srcPoolId, address from, uint256 amountSD, uint256 eqReward, uint256 eqFee, uint256 protocolFee, uint256 lpFee);
    event SwapRemote(address to, uint256 amountSD, uint256 protocolFee, uint256 dstFee);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::Stargate,
    bindings: &[
        EventBinding {
            name: "Swap",
            topic0: Swap::SIGNATURE_HASH,
            map: map_swap,
        },
        EventBinding {
            name: "SwapRemote",
            topic0: SwapRemote::SIGNATURE_HASH,
            map: map_swap_remote,
        },
    ],
};

/// LayerZero v1 endpoint ids for the networks in the chain vocabulary.
fn lz_chain(id: u16) -> Option<Chain> {
    match id {
        101 => Some(Chain::Ethereum),
        102 => Some(Chain::Bsc),
        106 => Some(Chain::Avalanche),
        109 => Some(Chain::Polygon),
        110 => Some(Chain::Arbitrum),
        111 => Some(Chain::Optimism),
        112 => Some(Chain::Fantom),
        165 => Some(Chain::Zksync),
        183 => Some(Chain::Linea),
        184 => Some(Chain::Base),
        _ => None,
    }
}

fn map_swap(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = Swap::decode_log_data(data)?;
    let mut out = DecodedEvent::new("Swap", TransferSide::Source);
    out.source_address = Some(EvmAddress(ev.from));
    out.destination_chain = lz_chain(ev.chainId);
    out.amount = TokenAmount::from_base_units(ev.amountSD, None);
    out.metadata.insert("lzChainId".into(), json!(ev.chainId));
    out.metadata.insert("dstPoolId".into(), json!(ev.dstPoolId.to_string()));
    out.metadata.insert("srcPoolId".into(), json!(ev.srcPoolId.to_string()));
    out.metadata.insert("eqFee".into(), json!(ev.eqFee.to_string()));
    out.metadata.insert("protocolFee".into(), json!(ev.protocolFee.to_string()));
    Ok(out)
}

// Remote fills do not name the origin network; the record stays half-sided
// until correlated.
fn map_swap_remote(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = SwapRemote::decode_log_data(data)?;
    let mut out = DecodedEvent::new("SwapRemote", TransferSide::Destination);
    out.destination_address = Some(EvmAddress(ev.to));
    out.amount = TokenAmount::from_base_units(ev.amountSD, None);
    out.metadata.insert("protocolFee".into(), json!(ev.protocolFee.to_string()));
    out.metadata.insert("dstFee".into(), json!(ev.dstFee.to_string()));
    Ok(out)
}

//! Wormhole decoder.
//!
//! The core bridge publishes one `LogMessagePublished` per message; for the
//! token bridge, the payload itself carries the transfer (payload type 1:
//! amount, token, recipient, target chain). Redemptions emit
//! `TransferRedeemed` with no amount, so destination records stay thin
//! until correlated.
//!
//! Wormhole numbers chains with its own id space, distinct from EVM chain
//! ids.

use alloy_primitives::{B256, LogData, U256};
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding};
use crate::chain::Chain;
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event LogMessagePublished(address indexed sender, uint64 sequence, uint32 nonce, bytes payload, uint8 consistencyLevel);
    event TransferRedeemed(uint16 indexed emitterChainId, bytes32 indexed emitterAddress, uint64 indexed sequence);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::Wormhole,
    bindings: &[
        EventBinding {
            name: "LogMessagePublished",
            topic0: LogMessagePublished::SIGNATURE_HASH,
            map: map_message_published,
        },
        EventBinding {
            name: "TransferRedeemed",
            topic0: TransferRedeemed::SIGNATURE_HASH,
            map: map_transfer_redeemed,
        },
    ],
};

/// Wormhole chain ids for the networks in the chain vocabulary.
fn wormhole_chain(id: u16) -> Option<Chain> {
    match id {
        2 => Some(Chain::Ethereum),
        4 => Some(Chain::Bsc),
        5 => Some(Chain::Polygon),
        6 => Some(Chain::Avalanche),
        10 => Some(Chain::Fantom),
        23 => Some(Chain::Arbitrum),
        24 => Some(Chain::Optimism),
        30 => Some(Chain::Base),
        _ => None,
    }
}

// Token-bridge transfer payload (type 1/3) layout:
//   [0]      payload id
//   [1..33]  amount (u256, normalized to 8 decimals)
//   [33..65] origin token address (32-byte word)
//   [65..67] origin token chain (u16)
//   [67..99] recipient (32-byte word)
//   [99..101] target chain (u16)
fn map_message_published(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = LogMessagePublished::decode_log_data(data)?;
    let mut out = DecodedEvent::new("LogMessagePublished", TransferSide::Source);
    out.source_address = Some(EvmAddress(ev.sender));
    out.metadata.insert("sequence".into(), json!(ev.sequence));
    out.metadata.insert("nonce".into(), json!(ev.nonce));
    out.metadata
        .insert("consistencyLevel".into(), json!(ev.consistencyLevel));

    let payload = ev.payload.as_ref();
    let is_token_transfer = payload.len() >= 101 && (payload[0] == 1 || payload[0] == 3);
    if is_token_transfer {
        let amount = U256::from_be_slice(&payload[1..33]);
        let token_word = B256::from_slice(&payload[33..65]);
        let recipient_word = B256::from_slice(&payload[67..99]);
        let target = u16::from_be_bytes([payload[99], payload[100]]);
        out.amount = TokenAmount::from_base_units(amount, None);
        out.token_address = Some(EvmAddress::from_word(token_word));
        out.destination_address = Some(EvmAddress::from_word(recipient_word));
        out.destination_chain = wormhole_chain(target);
        out.metadata.insert("payloadType".into(), json!(payload[0]));
    }
    Ok(out)
}

fn map_transfer_redeemed(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TransferRedeemed::decode_log_data(data)?;
    let mut out = DecodedEvent::new("TransferRedeemed", TransferSide::Destination);
    out.source_chain = wormhole_chain(ev.emitterChainId);
    out.metadata.insert("sequence".into(), json!(ev.sequence));
    out.metadata.insert(
        "emitterAddress".into(),
        json!(format!("{:#x}", ev.emitterAddress)),
    );
    out.metadata
        .insert("emitterChainId".into(), json!(ev.emitterChainId));
    Ok(out)
}

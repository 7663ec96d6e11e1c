//! deBridge decoder.
//!
//! `Sent` carries the receiver as variable-length bytes (deBridge supports
//! non-EVM targets); for EVM-shaped receivers the last 20 bytes are the
//! address. `Claimed` is the destination-side fill.

use alloy_primitives::{Address, LogData};
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding, evm_chain};
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event Sent(bytes32 submissionId, bytes32 indexed debridgeId, uint256 amount, bytes receiver, uint256 nonce, uint256 indexed chainIdTo);
    event Claimed(bytes32 submissionId, bytes32 indexed debridgeId, uint256 amount, address indexed receiver, uint256 nonce, uint256 indexed chainIdFrom);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::DeBridge,
    bindings: &[
        EventBinding {
            name: "Sent",
            topic0: Sent::SIGNATURE_HASH,
            map: map_sent,
        },
        EventBinding {
            name: "Claimed",
            topic0: Claimed::SIGNATURE_HASH,
            map: map_claimed,
        },
    ],
};

fn receiver_address(receiver: &[u8]) -> Option<EvmAddress> {
    if receiver.len() < Address::len_bytes() {
        return None;
    }
    let tail = &receiver[receiver.len() - Address::len_bytes()..];
    Some(EvmAddress(Address::from_slice(tail)))
}

fn map_sent(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = Sent::decode_log_data(data)?;
    let mut out = DecodedEvent::new("Sent", TransferSide::Source);
    out.destination_address = receiver_address(ev.receiver.as_ref());
    out.destination_chain = Some(evm_chain(ev.chainIdTo.saturating_to::<u64>()));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert(
        "submissionId".into(),
        json!(format!("{:#x}", ev.submissionId)),
    );
    out.metadata.insert("debridgeId".into(), json!(format!("{:#x}", ev.debridgeId)));
    out.metadata.insert("nonce".into(), json!(ev.nonce.to_string()));
    Ok(out)
}

fn map_claimed(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = Claimed::decode_log_data(data)?;
    let mut out = DecodedEvent::new("Claimed", TransferSide::Destination);
    out.destination_address = Some(EvmAddress(ev.receiver));
    out.source_chain = Some(evm_chain(ev.chainIdFrom.saturating_to::<u64>()));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert(
        "submissionId".into(),
        json!(format!("{:#x}", ev.submissionId)),
    );
    out.metadata.insert("debridgeId".into(), json!(format!("{:#x}", ev.debridgeId)));
    out.metadata.insert("nonce".into(), json!(ev.nonce.to_string()));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use alloy_primitives::{B256, Bytes, U256, address};

    #[test]
    fn sent_unpads_evm_receiver() {
        let mut padded = vec![0u8; 32];
        padded[12..].copy_from_slice(&[0xbb; 20]);
        let event = Sent {
            submissionId: B256::repeat_byte(0x66),
            debridgeId: B256::repeat_byte(0x77),
            amount: U256::from(42u64),
            receiver: Bytes::from(padded),
            nonce: U256::from(3u64),
            chainIdTo: U256::from(56u64),
        };
        let decoded = map_sent(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.destination_chain, Some(Chain::Bsc));
        assert_eq!(
            decoded.destination_address.unwrap().to_string(),
            format!("0x{}", "bb".repeat(20))
        );
    }

    #[test]
    fn sent_with_short_receiver_stays_half_sided() {
        let event = Sent {
            submissionId: B256::repeat_byte(0x66),
            debridgeId: B256::repeat_byte(0x77),
            amount: U256::from(42u64),
            receiver: Bytes::from(vec![0x01, 0x02]),
            nonce: U256::ZERO,
            chainIdTo: U256::from(137u64),
        };
        let decoded = map_sent(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.destination_address, None);
    }

    #[test]
    fn claimed_is_destination_side() {
        let event = Claimed {
            submissionId: B256::repeat_byte(0x66),
            debridgeId: B256::repeat_byte(0x77),
            amount: U256::from(42u64),
            receiver: address!("0x00000000000000000000000000000000000000bb"),
            nonce: U256::from(3u64),
            chainIdFrom: U256::from(1u64),
        };
        let decoded = map_claimed(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.side, TransferSide::Destination);
        assert_eq!(decoded.source_chain, Some(Chain::Ethereum));
    }
}

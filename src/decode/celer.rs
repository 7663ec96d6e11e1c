//! Celer cBridge decoder.
//!
//! `Send` is the source-side event, `Relay` the destination-side fill. A
//! `WithdrawDone` refund on the origin chain marks the transfer failed.

use alloy_primitives::LogData;
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding, evm_chain};
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide, TransferStatus};

sol! {
    event Send(bytes32 transferId, address sender, address receiver, address token, uint256 amount, uint64 dstChainId, uint64 nonce, uint32 maxSlippage);
    event Relay(bytes32 transferId, address sender, address receiver, address token, uint256 amount, uint64 srcChainId, bytes32 srcTransferId);
    event WithdrawDone(bytes32 withdrawId, uint64 seqnum, address receiver, address token, uint256 amount, bytes32 refid);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::CelerCBridge,
    bindings: &[
        EventBinding {
            name: "Send",
            topic0: Send::SIGNATURE_HASH,
            map: map_send,
        },
        EventBinding {
            name: "Relay",
            topic0: Relay::SIGNATURE_HASH,
            map: map_relay,
        },
        EventBinding {
            name: "WithdrawDone",
            topic0: WithdrawDone::SIGNATURE_HASH,
            map: map_withdraw_done,
        },
    ],
};

fn map_send(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = Send::decode_log_data(data)?;
    let mut out = DecodedEvent::new("Send", TransferSide::Source);
    out.source_address = Some(EvmAddress(ev.sender));
    out.destination_address = Some(EvmAddress(ev.receiver));
    out.destination_chain = Some(evm_chain(ev.dstChainId));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("transferId".into(), json!(format!("{:#x}", ev.transferId)));
    out.metadata.insert("nonce".into(), json!(ev.nonce));
    out.metadata.insert("maxSlippage".into(), json!(ev.maxSlippage));
    Ok(out)
}

fn map_relay(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = Relay::decode_log_data(data)?;
    let mut out = DecodedEvent::new("Relay", TransferSide::Destination);
    out.source_address = Some(EvmAddress(ev.sender));
    out.destination_address = Some(EvmAddress(ev.receiver));
    out.source_chain = Some(evm_chain(ev.srcChainId));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("transferId".into(), json!(format!("{:#x}", ev.transferId)));
    out.metadata.insert(
        "srcTransferId".into(),
        json!(format!("{:#x}", ev.srcTransferId)),
    );
    Ok(out)
}

// A refund withdrawal on the origin chain is the terminal signal for a
// transfer that never completed on the destination.
fn map_withdraw_done(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = WithdrawDone::decode_log_data(data)?;
    let mut out = DecodedEvent::new("WithdrawDone", TransferSide::Source);
    out.status = TransferStatus::Failed;
    out.source_address = Some(EvmAddress(ev.receiver));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("withdrawId".into(), json!(format!("{:#x}", ev.withdrawId)));
    out.metadata.insert("seqnum".into(), json!(ev.seqnum));
    out.metadata.insert("refid".into(), json!(format!("{:#x}", ev.refid)));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use alloy_primitives::{B256, U256, address};

    #[test]
    fn send_maps_to_source_side() {
        let event = Send {
            transferId: B256::repeat_byte(0x11),
            sender: address!("0x00000000000000000000000000000000000000aa"),
            receiver: address!("0x00000000000000000000000000000000000000bb"),
            token: address!("0x00000000000000000000000000000000000000cc"),
            amount: U256::from(5_000_000u64),
            dstChainId: 137,
            nonce: 42,
            maxSlippage: 3000,
        };
        let decoded = map_send(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.side, TransferSide::Source);
        assert_eq!(decoded.destination_chain, Some(Chain::Polygon));
        assert_eq!(decoded.amount, TokenAmount::Raw("5000000".into()));
        assert_eq!(decoded.status, TransferStatus::Pending);
        assert_eq!(decoded.metadata["nonce"], 42);
    }

    #[test]
    fn relay_maps_to_destination_side() {
        let event = Relay {
            transferId: B256::repeat_byte(0x22),
            sender: address!("0x00000000000000000000000000000000000000aa"),
            receiver: address!("0x00000000000000000000000000000000000000bb"),
            token: address!("0x00000000000000000000000000000000000000cc"),
            amount: U256::from(5_000_000u64),
            srcChainId: 1,
            srcTransferId: B256::repeat_byte(0x11),
        };
        let decoded = map_relay(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.side, TransferSide::Destination);
        assert_eq!(decoded.source_chain, Some(Chain::Ethereum));
        assert_eq!(decoded.amount, TokenAmount::Raw("5000000".into()));
    }

    #[test]
    fn withdraw_done_marks_failed() {
        let event = WithdrawDone {
            withdrawId: B256::repeat_byte(0x33),
            seqnum: 7,
            receiver: address!("0x00000000000000000000000000000000000000aa"),
            token: address!("0x00000000000000000000000000000000000000cc"),
            amount: U256::from(100u64),
            refid: B256::repeat_byte(0x11),
        };
        let decoded = map_withdraw_done(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.status, TransferStatus::Failed);
    }
}

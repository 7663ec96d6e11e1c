//! Hop protocol decoder.
//!
//! `TransferSent` leaves an L2; `TransferFromL1Completed` arrives from L1
//! (so its source chain is always ethereum); `WithdrawalBonded` is the
//! bonder-side fill keyed by transfer id.

use alloy_primitives::LogData;
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding, evm_chain};
use crate::chain::Chain;
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event TransferSent(bytes32 indexed transferId, uint256 indexed chainId, address indexed recipient, uint256 amount, bytes32 transferNonce, uint256 bonderFee, uint256 index, uint256 amountOutMin, uint256 deadline);
    event TransferFromL1Completed(address indexed recipient, uint256 amount, uint256 amountOutMin, uint256 deadline, address indexed relayer, uint256 relayerFee);
    event WithdrawalBonded(bytes32 indexed transferId, uint256 amount);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::Hop,
    bindings: &[
        EventBinding {
            name: "TransferSent",
            topic0: TransferSent::SIGNATURE_HASH,
            map: map_transfer_sent,
        },
        EventBinding {
            name: "TransferFromL1Completed",
            topic0: TransferFromL1Completed::SIGNATURE_HASH,
            map: map_from_l1_completed,
        },
        EventBinding {
            name: "WithdrawalBonded",
            topic0: WithdrawalBonded::SIGNATURE_HASH,
            map: map_withdrawal_bonded,
        },
    ],
};

fn map_transfer_sent(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TransferSent::decode_log_data(data)?;
    let mut out = DecodedEvent::new("TransferSent", TransferSide::Source);
    out.destination_address = Some(EvmAddress(ev.recipient));
    out.destination_chain = Some(evm_chain(ev.chainId.saturating_to::<u64>()));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("transferId".into(), json!(format!("{:#x}", ev.transferId)));
    out.metadata.insert(
        "transferNonce".into(),
        json!(format!("{:#x}", ev.transferNonce)),
    );
    out.metadata.insert("bonderFee".into(), json!(ev.bonderFee.to_string()));
    Ok(out)
}

fn map_from_l1_completed(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TransferFromL1Completed::decode_log_data(data)?;
    let mut out = DecodedEvent::new("TransferFromL1Completed", TransferSide::Destination);
    out.destination_address = Some(EvmAddress(ev.recipient));
    out.source_chain = Some(Chain::Ethereum);
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("relayer".into(), json!(EvmAddress(ev.relayer).to_string()));
    out.metadata.insert("relayerFee".into(), json!(ev.relayerFee.to_string()));
    Ok(out)
}

fn map_withdrawal_bonded(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = WithdrawalBonded::decode_log_data(data)?;
    let mut out = DecodedEvent::new("WithdrawalBonded", TransferSide::Destination);
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("transferId".into(), json!(format!("{:#x}", ev.transferId)));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256, address};

    #[test]
    fn transfer_sent_resolves_destination() {
        let event = TransferSent {
            transferId: B256::repeat_byte(0x44),
            chainId: U256::from(10u64),
            recipient: address!("0x00000000000000000000000000000000000000bb"),
            amount: U256::from(123u64),
            transferNonce: B256::repeat_byte(0x55),
            bonderFee: U256::from(2u64),
            index: U256::ZERO,
            amountOutMin: U256::from(120u64),
            deadline: U256::from(1_700_000_000u64),
        };
        let decoded = map_transfer_sent(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.destination_chain, Some(Chain::Optimism));
        assert_eq!(decoded.side, TransferSide::Source);
    }

    #[test]
    fn l1_completion_pins_source_to_ethereum() {
        let event = TransferFromL1Completed {
            recipient: address!("0x00000000000000000000000000000000000000bb"),
            amount: U256::from(123u64),
            amountOutMin: U256::from(120u64),
            deadline: U256::from(1_700_000_000u64),
            relayer: address!("0x00000000000000000000000000000000000000dd"),
            relayerFee: U256::from(1u64),
        };
        let decoded = map_from_l1_completed(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.source_chain, Some(Chain::Ethereum));
    }

    #[test]
    fn withdrawal_bonded_is_amount_only() {
        let event = WithdrawalBonded {
            transferId: B256::repeat_byte(0x44),
            amount: U256::from(123u64),
        };
        let decoded = map_withdrawal_bonded(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.destination_address, None);
        assert_eq!(decoded.amount, TokenAmount::Raw("123".into()));
    }
}

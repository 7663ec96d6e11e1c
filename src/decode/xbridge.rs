//! XBridge decoder.

use alloy_primitives::LogData;
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding, evm_chain};
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event LogBridgeTo(address indexed sender, address indexed token, uint256 amount, uint256 toChainId, address receiver, uint256 orderId);
    event LogBridgeIn(address indexed receiver, address indexed token, uint256 amount, uint256 fromChainId, uint256 orderId);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::XBridge,
    bindings: &[
        EventBinding {
            name: "LogBridgeTo",
            topic0: LogBridgeTo::SIGNATURE_HASH,
            map: map_bridge_to,
        },
        EventBinding {
            name: "LogBridgeIn",
            topic0: LogBridgeIn::SIGNATURE_HASH,
            map: map_bridge_in,
        },
    ],
};

fn map_bridge_to(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = LogBridgeTo::decode_log_data(data)?;
    let mut out = DecodedEvent::new("LogBridgeTo", TransferSide::Source);
    out.source_address = Some(EvmAddress(ev.sender));
    out.destination_address = Some(EvmAddress(ev.receiver));
    out.destination_chain = Some(evm_chain(ev.toChainId.saturating_to::<u64>()));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("orderId".into(), json!(ev.orderId.to_string()));
    Ok(out)
}

fn map_bridge_in(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = LogBridgeIn::decode_log_data(data)?;
    let mut out = DecodedEvent::new("LogBridgeIn", TransferSide::Destination);
    out.destination_address = Some(EvmAddress(ev.receiver));
    out.source_chain = Some(evm_chain(ev.fromChainId.saturating_to::<u64>()));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("orderId".into(), json!(ev.orderId.to_string()));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use alloy_primitives::{U256, address};

    #[test]
    fn bridge_to_and_in_share_order_id() {
        let out_event = LogBridgeTo {
            sender: address!("0x00000000000000000000000000000000000000aa"),
            token: address!("0x00000000000000000000000000000000000000cc"),
            amount: U256::from(777u64),
            toChainId: U256::from(324u64),
            receiver: address!("0x00000000000000000000000000000000000000bb"),
            orderId: U256::from(31337u64),
        };
        let in_event = LogBridgeIn {
            receiver: address!("0x00000000000000000000000000000000000000bb"),
            token: address!("0x00000000000000000000000000000000000000cc"),
            amount: U256::from(777u64),
            fromChainId: U256::from(1u64),
            orderId: U256::from(31337u64),
        };
        let sent = map_bridge_to(&out_event.encode_log_data()).unwrap();
        let received = map_bridge_in(&in_event.encode_log_data()).unwrap();
        assert_eq!(sent.destination_chain, Some(Chain::Zksync));
        assert_eq!(received.source_chain, Some(Chain::Ethereum));
        assert_eq!(sent.metadata["orderId"], received.metadata["orderId"]);
        assert_eq!(sent.amount, received.amount);
    }
}

//! Across (spoke pool) decoder.

use alloy_primitives::LogData;
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding, evm_chain};
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event FundsDeposited(uint256 amount, uint256 originChainId, uint256 indexed destinationChainId, int64 relayerFeePct, uint32 indexed depositId, uint32 quoteTimestamp, address originToken, address recipient, address indexed depositor, bytes message);
    event FilledRelay(uint256 amount, uint256 totalFilledAmount, uint256 fillAmount, uint256 repaymentChainId, uint256 indexed originChainId, uint256 destinationChainId, uint32 indexed depositId, address destinationToken, address relayer, address indexed depositor, address recipient, bytes message);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::Across,
    bindings: &[
        EventBinding {
            name: "FundsDeposited",
            topic0: FundsDeposited::SIGNATURE_HASH,
            map: map_funds_deposited,
        },
        EventBinding {
            name: "FilledRelay",
            topic0: FilledRelay::SIGNATURE_HASH,
            map: map_filled_relay,
        },
    ],
};

fn map_funds_deposited(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = FundsDeposited::decode_log_data(data)?;
    let mut out = DecodedEvent::new("FundsDeposited", TransferSide::Source);
    out.source_address = Some(EvmAddress(ev.depositor));
    out.destination_address = Some(EvmAddress(ev.recipient));
    out.source_chain = Some(evm_chain(ev.originChainId.saturating_to::<u64>()));
    out.destination_chain = Some(evm_chain(ev.destinationChainId.saturating_to::<u64>()));
    out.token_address = Some(EvmAddress(ev.originToken));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("depositId".into(), json!(ev.depositId));
    out.metadata.insert("relayerFeePct".into(), json!(ev.relayerFeePct));
    out.metadata.insert("quoteTimestamp".into(), json!(ev.quoteTimestamp));
    Ok(out)
}

fn map_filled_relay(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = FilledRelay::decode_log_data(data)?;
    let mut out = DecodedEvent::new("FilledRelay", TransferSide::Destination);
    out.source_address = Some(EvmAddress(ev.depositor));
    out.destination_address = Some(EvmAddress(ev.recipient));
    out.source_chain = Some(evm_chain(ev.originChainId.saturating_to::<u64>()));
    out.destination_chain = Some(evm_chain(ev.destinationChainId.saturating_to::<u64>()));
    out.token_address = Some(EvmAddress(ev.destinationToken));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("depositId".into(), json!(ev.depositId));
    out.metadata.insert("relayer".into(), json!(EvmAddress(ev.relayer).to_string()));
    out.metadata.insert(
        "fillAmount".into(),
        json!(ev.fillAmount.to_string()),
    );
    Ok(out)
}

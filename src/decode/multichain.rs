//! Multichain (anyCall router) decoder.

use alloy_primitives::LogData;
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding, evm_chain};
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event LogAnySwapOut(address indexed token, address indexed from, address indexed to, uint256 amount, uint256 fromChainID, uint256 toChainID);
    event LogAnySwapIn(bytes32 indexed txhash, address indexed token, address indexed to, uint256 amount, uint256 fromChainID, uint256 toChainID);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::Multichain,
    bindings: &[
        EventBinding {
            name: "LogAnySwapOut",
            topic0: LogAnySwapOut::SIGNATURE_HASH,
            map: map_swap_out,
        },
        EventBinding {
            name: "LogAnySwapIn",
            topic0: LogAnySwapIn::SIGNATURE_HASH,
            map: map_swap_in,
        },
    ],
};

fn map_swap_out(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = LogAnySwapOut::decode_log_data(data)?;
    let mut out = DecodedEvent::new("LogAnySwapOut", TransferSide::Source);
    out.source_address = Some(EvmAddress(ev.from));
    out.destination_address = Some(EvmAddress(ev.to));
    out.source_chain = Some(evm_chain(ev.fromChainID.saturating_to::<u64>()));
    out.destination_chain = Some(evm_chain(ev.toChainID.saturating_to::<u64>()));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    Ok(out)
}

fn map_swap_in(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = LogAnySwapIn::decode_log_data(data)?;
    let mut out = DecodedEvent::new("LogAnySwapIn", TransferSide::Destination);
    out.destination_address = Some(EvmAddress(ev.to));
    out.source_chain = Some(evm_chain(ev.fromChainID.saturating_to::<u64>()));
    out.destination_chain = Some(evm_chain(ev.toChainID.saturating_to::<u64>()));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    // The origin transaction hash ties the fill back to its source leg.
    out.metadata.insert("srcTxHash".into(), json!(format!("{:#x}", ev.txhash)));
    Ok(out)
}

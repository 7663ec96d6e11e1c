//! Orbiter decoder.
//!
//! Orbiter routes value through maker EOAs, so its contract surface is
//! thin: deposits into the router emit `Transfer`/`TransferERC20` on the
//! source chain only. Records are always half-sided here; the destination
//! leg is an ordinary transfer with no contract event, so correlation
//! relies on the sweep finding the mirror record from another observer.

use alloy_primitives::LogData;
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding};
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event Transfer(address indexed to, uint256 amount);
    event TransferERC20(address indexed token, address indexed to, uint256 amount);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::Orbiter,
    bindings: &[
        EventBinding {
            name: "Transfer",
            topic0: Transfer::SIGNATURE_HASH,
            map: map_transfer,
        },
        EventBinding {
            name: "TransferERC20",
            topic0: TransferERC20::SIGNATURE_HASH,
            map: map_transfer_erc20,
        },
    ],
};

fn map_transfer(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = Transfer::decode_log_data(data)?;
    let mut out = DecodedEvent::new("Transfer", TransferSide::Source);
    out.destination_address = Some(EvmAddress(ev.to));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    Ok(out)
}

fn map_transfer_erc20(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TransferERC20::decode_log_data(data)?;
    let mut out = DecodedEvent::new("TransferERC20", TransferSide::Source);
    out.destination_address = Some(EvmAddress(ev.to));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("router".into(), json!(true));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address};

    #[test]
    fn native_transfer_is_half_sided_source() {
        let event = Transfer {
            to: address!("0x00000000000000000000000000000000000000bb"),
            amount: U256::from(9_000u64),
        };
        let decoded = map_transfer(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.side, TransferSide::Source);
        assert_eq!(decoded.destination_chain, None);
        assert_eq!(decoded.token_address, None);
    }

    #[test]
    fn erc20_transfer_keeps_token() {
        let event = TransferERC20 {
            token: address!("0x00000000000000000000000000000000000000cc"),
            to: address!("0x00000000000000000000000000000000000000bb"),
            amount: U256::from(9_000u64),
        };
        let decoded = map_transfer_erc20(&event.encode_log_data()).unwrap();
        assert_eq!(
            decoded.token_address.unwrap().to_string(),
            "0x00000000000000000000000000000000000000cc"
        );
    }
}

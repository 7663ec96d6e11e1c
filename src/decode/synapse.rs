//! Synapse bridge decoder.
//!
//! Source-side burns/deposits come in plain and `AndSwap` flavors; both
//! aliases map identically apart from swap metadata. `TokenMint` and
//! `TokenWithdraw` are the destination-side fills, correlated back through
//! the `kappa` digest.

use alloy_primitives::LogData;
use alloy_sol_types::{SolEvent, sol};
use serde_json::json;

use super::{BridgeDecoder, DecodeError, DecodedEvent, EventBinding, evm_chain};
use crate::protocol::BridgeProtocol;
use crate::types::{EvmAddress, TokenAmount, TransferSide};

sol! {
    event TokenDeposit(address indexed to, uint256 chainId, address token, uint256 amount);
    event TokenDepositAndSwap(address indexed to, uint256 chainId, address token, uint256 amount, uint8 tokenIndexFrom, uint8 tokenIndexTo, uint256 minDy, uint256 deadline);
    event TokenRedeem(address indexed to, uint256 chainId, address token, uint256 amount);
    event TokenRedeemAndSwap(address indexed to, uint256 chainId, address token, uint256 amount, uint8 tokenIndexFrom, uint8 tokenIndexTo, uint256 minDy, uint256 deadline);
    event TokenMint(address indexed to, address token, uint256 amount, uint256 fee, bytes32 kappa);
    event TokenWithdraw(address indexed to, address token, uint256 amount, uint256 fee, bytes32 kappa);
}

pub(super) static DECODER: BridgeDecoder = BridgeDecoder {
    protocol: BridgeProtocol::Synapse,
    bindings: &[
        EventBinding {
            name: "TokenDeposit",
            topic0: TokenDeposit::SIGNATURE_HASH,
            map: map_deposit,
        },
        EventBinding {
            name: "TokenDepositAndSwap",
            topic0: TokenDepositAndSwap::SIGNATURE_HASH,
            map: map_deposit_and_swap,
        },
        EventBinding {
            name: "TokenRedeem",
            topic0: TokenRedeem::SIGNATURE_HASH,
            map: map_redeem,
        },
        EventBinding {
            name: "TokenRedeemAndSwap",
            topic0: TokenRedeemAndSwap::SIGNATURE_HASH,
            map: map_redeem_and_swap,
        },
        EventBinding {
            name: "TokenMint",
            topic0: TokenMint::SIGNATURE_HASH,
            map: map_mint,
        },
        EventBinding {
            name: "TokenWithdraw",
            topic0: TokenWithdraw::SIGNATURE_HASH,
            map: map_withdraw,
        },
    ],
};

fn source_event(
    event_type: &'static str,
    to: alloy_primitives::Address,
    chain_id: alloy_primitives::U256,
    token: alloy_primitives::Address,
    amount: alloy_primitives::U256,
) -> DecodedEvent {
    let mut out = DecodedEvent::new(event_type, TransferSide::Source);
    out.destination_address = Some(EvmAddress(to));
    out.destination_chain = Some(evm_chain(chain_id.saturating_to::<u64>()));
    out.token_address = Some(EvmAddress(token));
    out.amount = TokenAmount::from_base_units(amount, None);
    out
}

fn map_deposit(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TokenDeposit::decode_log_data(data)?;
    Ok(source_event("TokenDeposit", ev.to, ev.chainId, ev.token, ev.amount))
}

fn map_deposit_and_swap(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TokenDepositAndSwap::decode_log_data(data)?;
    let mut out = source_event("TokenDepositAndSwap", ev.to, ev.chainId, ev.token, ev.amount);
    out.metadata.insert("minDy".into(), json!(ev.minDy.to_string()));
    Ok(out)
}

fn map_redeem(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TokenRedeem::decode_log_data(data)?;
    Ok(source_event("TokenRedeem", ev.to, ev.chainId, ev.token, ev.amount))
}

fn map_redeem_and_swap(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TokenRedeemAndSwap::decode_log_data(data)?;
    let mut out = source_event("TokenRedeemAndSwap", ev.to, ev.chainId, ev.token, ev.amount);
    out.metadata.insert("minDy".into(), json!(ev.minDy.to_string()));
    Ok(out)
}

fn map_mint(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TokenMint::decode_log_data(data)?;
    let mut out = DecodedEvent::new("TokenMint", TransferSide::Destination);
    out.destination_address = Some(EvmAddress(ev.to));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("fee".into(), json!(ev.fee.to_string()));
    out.metadata.insert("kappa".into(), json!(format!("{:#x}", ev.kappa)));
    Ok(out)
}

fn map_withdraw(data: &LogData) -> Result<DecodedEvent, DecodeError> {
    let ev = TokenWithdraw::decode_log_data(data)?;
    let mut out = DecodedEvent::new("TokenWithdraw", TransferSide::Destination);
    out.destination_address = Some(EvmAddress(ev.to));
    out.token_address = Some(EvmAddress(ev.token));
    out.amount = TokenAmount::from_base_units(ev.amount, None);
    out.metadata.insert("fee".into(), json!(ev.fee.to_string()));
    out.metadata.insert("kappa".into(), json!(format!("{:#x}", ev.kappa)));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use alloy_primitives::{B256, U256, address};

    #[test]
    fn deposit_and_alias_map_identically() {
        let to = address!("0x00000000000000000000000000000000000000bb");
        let token = address!("0x00000000000000000000000000000000000000cc");
        let plain = TokenDeposit {
            to,
            chainId: U256::from(42161u64),
            token,
            amount: U256::from(900u64),
        };
        let with_swap = TokenDepositAndSwap {
            to,
            chainId: U256::from(42161u64),
            token,
            amount: U256::from(900u64),
            tokenIndexFrom: 0,
            tokenIndexTo: 1,
            minDy: U256::from(890u64),
            deadline: U256::from(1_700_000_000u64),
        };
        let a = map_deposit(&plain.encode_log_data()).unwrap();
        let b = map_deposit_and_swap(&with_swap.encode_log_data()).unwrap();
        assert_eq!(a.destination_chain, Some(Chain::Arbitrum));
        assert_eq!(a.destination_chain, b.destination_chain);
        assert_eq!(a.amount, b.amount);
        assert_eq!(a.side, b.side);
    }

    #[test]
    fn mint_is_destination_side_with_kappa() {
        let event = TokenMint {
            to: address!("0x00000000000000000000000000000000000000bb"),
            token: address!("0x00000000000000000000000000000000000000cc"),
            amount: U256::from(890u64),
            fee: U256::from(10u64),
            kappa: B256::repeat_byte(0x99),
        };
        let decoded = map_mint(&event.encode_log_data()).unwrap();
        assert_eq!(decoded.side, TransferSide::Destination);
        assert!(decoded.metadata["kappa"].as_str().unwrap().starts_with("0x9999"));
    }
}

//! Core data model: the normalized cross-chain transfer record and its
//! building blocks.
//!
//! Every protocol decoder maps raw logs into [`CrossChainTransfer`]; the
//! correlator, risk engine and both stores operate on that one shape. The
//! wrapper types here enforce the boundary invariants: addresses are
//! lowercased 20-byte hex, amounts are precision-safe, scores stay in
//! `[0, 1]`.

use alloy_primitives::{Address, B256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

use crate::chain::Chain;
use crate::protocol::BridgeProtocol;
use crate::timestamp::UnixTimestamp;

/// Token symbol used until lazy resolution fills in the real one.
pub const UNKNOWN_TOKEN_SYMBOL: &str = "UNKNOWN";

/// A 20-byte EVM address, stored and rendered lowercased (`0x` + 40 hex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvmAddress(pub Address);

impl EvmAddress {
    /// Decode a recipient carried as a 32-byte left-padded word: take the
    /// last 20 bytes.
    pub fn from_word(word: B256) -> Self {
        EvmAddress(Address::from_word(word))
    }

    /// The zero address marks disabled contract placeholders in config.
    pub fn is_zero(&self) -> bool {
        self.0 == Address::ZERO
    }

    /// Lowercase hex with `0x` prefix, the canonical stored form.
    pub fn to_lowercase_hex(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl From<Address> for EvmAddress {
    fn from(value: Address) -> Self {
        EvmAddress(value)
    }
}

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Error for malformed address strings.
#[derive(Debug, thiserror::Error)]
#[error("invalid EVM address: {0}")]
pub struct InvalidAddress(pub String);

impl FromStr for EvmAddress {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_str(s)
            .map(EvmAddress)
            .map_err(|_| InvalidAddress(s.to_string()))
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_lowercase_hex())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte transaction hash, rendered lowercased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub B256);

impl From<B256> for TxHash {
    fn from(value: B256) -> Self {
        TxHash(value)
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Error for malformed transaction hashes.
#[derive(Debug, thiserror::Error)]
#[error("invalid transaction hash: {0}")]
pub struct InvalidTxHash(pub String);

impl FromStr for TxHash {
    type Err = InvalidTxHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(TxHash)
            .map_err(|_| InvalidTxHash(s.to_string()))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A non-negative token amount, preserved without precision loss.
///
/// When token decimals are known, the amount is the human-readable
/// [`Decimal`] value. When they are not, the raw base-unit integer string is
/// kept verbatim and the human-readable conversion is left to downstream
/// viewers. Correlation equality is exact on this representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenAmount {
    /// Human-readable units (token decimals were known at decode time).
    Units(Decimal),
    /// Base-unit integer string, decimals unknown.
    Raw(String),
}

/// Error for amount strings the engine refuses to carry.
#[derive(Debug, thiserror::Error)]
pub enum AmountError {
    #[error("invalid amount format: {0}")]
    InvalidFormat(String),
    #[error("negative amount is not allowed: {0}")]
    Negative(String),
}

impl TokenAmount {
    /// Build from a base-unit integer and the token's decimals.
    ///
    /// Values whose digit count exceeds [`Decimal`] precision fall back to
    /// the raw representation rather than rounding.
    pub fn from_base_units(value: U256, decimals: Option<u8>) -> Self {
        let raw = value.to_string();
        let Some(decimals) = decimals else {
            return TokenAmount::Raw(raw);
        };
        match Self::scale_down(&raw, decimals as u32) {
            Some(units) => TokenAmount::Units(units),
            None => TokenAmount::Raw(raw),
        }
    }

    fn scale_down(raw: &str, decimals: u32) -> Option<Decimal> {
        let mantissa: i128 = raw.parse().ok()?;
        let mut units = Decimal::try_from_i128_with_scale(mantissa, decimals).ok()?;
        units.normalize_assign();
        Some(units)
    }

    /// The human-readable decimal value, if this amount has one.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            TokenAmount::Units(units) => Some(*units),
            TokenAmount::Raw(_) => None,
        }
    }

    pub fn zero() -> Self {
        TokenAmount::Units(Decimal::ZERO)
    }

    /// Canonical stored form: decimal string or raw integer string.
    pub fn canonical(&self) -> String {
        match self {
            TokenAmount::Units(units) => units.normalize().to_string(),
            TokenAmount::Raw(raw) => raw.clone(),
        }
    }

    /// Parse the stored form back. Digit-only strings longer than Decimal
    /// precision stay raw; everything else must parse as a non-negative
    /// decimal.
    pub fn parse(s: &str) -> Result<Self, AmountError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AmountError::InvalidFormat(s.to_string()));
        }
        if let Ok(units) = Decimal::from_str(trimmed) {
            if units.is_sign_negative() {
                return Err(AmountError::Negative(s.to_string()));
            }
            return Ok(TokenAmount::Units(units.normalize()));
        }
        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(TokenAmount::Raw(trimmed.to_string()));
        }
        Err(AmountError::InvalidFormat(s.to_string()))
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl FromStr for TokenAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenAmount::parse(s)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TokenAmount::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Transfer lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
        }
    }
}

impl Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for status strings outside the lifecycle set.
#[derive(Debug, thiserror::Error)]
#[error("unknown transfer status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TransferStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransferStatus::Pending),
            "COMPLETED" => Ok(TransferStatus::Completed),
            "FAILED" => Ok(TransferStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Which side of the bridge an event was emitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSide {
    Source,
    Destination,
}

/// Severity attached to a risk flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagSeverity {
    Low,
    Medium,
    High,
}

/// Kinds of risk flags the engine and sweeps emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskFlagKind {
    #[serde(rename = "SANCTIONS_MATCH")]
    SanctionsMatch,
    #[serde(rename = "HIGH_VALUE_TRANSFER")]
    HighValueTransfer,
    #[serde(rename = "FREQUENT_BRIDGE_USAGE")]
    FrequentBridgeUsage,
    #[serde(rename = "ANALYSIS_INCOMPLETE")]
    AnalysisIncomplete,
    #[serde(rename = "CORRELATION_TIMEOUT")]
    CorrelationTimeout,
}

impl RiskFlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlagKind::SanctionsMatch => "SANCTIONS_MATCH",
            RiskFlagKind::HighValueTransfer => "HIGH_VALUE_TRANSFER",
            RiskFlagKind::FrequentBridgeUsage => "FREQUENT_BRIDGE_USAGE",
            RiskFlagKind::AnalysisIncomplete => "ANALYSIS_INCOMPLETE",
            RiskFlagKind::CorrelationTimeout => "CORRELATION_TIMEOUT",
        }
    }
}

impl Display for RiskFlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One risk signal attached to a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    #[serde(rename = "type")]
    pub kind: RiskFlagKind,
    pub severity: FlagSeverity,
    pub description: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl RiskFlag {
    pub fn new(kind: RiskFlagKind, severity: FlagSeverity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A risk score in `[0, 1]`. Construction clamps; the invariant holds by
/// type.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskScore(f64);

impl RiskScore {
    pub const ZERO: RiskScore = RiskScore(0.0);

    pub fn new(value: f64) -> Self {
        RiskScore(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The normalized cross-chain transfer record, one per decoded bridge
/// event.
///
/// Created by the observer at decode time. Mutated at most twice after
/// creation: once by the risk engine (`risk_score`, `risk_flags`,
/// `analyzed_at`) and once by the correlator (`status`,
/// `linked_transfer_id`). Never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainTransfer {
    pub id: Uuid,
    pub protocol: BridgeProtocol,
    pub source_chain: Option<Chain>,
    pub destination_chain: Option<Chain>,
    pub source_address: Option<EvmAddress>,
    pub destination_address: Option<EvmAddress>,
    pub token_address: Option<EvmAddress>,
    pub token_symbol: String,
    pub amount: TokenAmount,
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub timestamp: UnixTimestamp,
    pub event_type: String,
    pub status: TransferStatus,
    pub linked_transfer_id: Option<Uuid>,
    pub risk_score: Option<RiskScore>,
    pub risk_flags: Vec<RiskFlag>,
    pub analyzed_at: Option<UnixTimestamp>,
    /// Protocol-specific fields (nonce, depositId, relayerFee, ...).
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CrossChainTransfer {
    /// Addresses involved in this transfer, deduplicated.
    pub fn endpoints(&self) -> Vec<EvmAddress> {
        let mut out = Vec::with_capacity(2);
        if let Some(source) = self.source_address {
            out.push(source);
        }
        if let Some(destination) = self.destination_address {
            if Some(destination) != self.source_address {
                out.push(destination);
            }
        }
        out
    }
}

/// One row of the read-only sanctions watchlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionsEntry {
    pub source: String,
    pub entity_name: String,
    pub wallet_address: Option<EvmAddress>,
    pub chain: Option<Chain>,
    pub risk_level: FlagSeverity,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn address_renders_lowercase() {
        let addr: EvmAddress = "0xD8DA6BF26964AF9D7EED9E03E53415D37AA96045"
            .parse()
            .unwrap();
        assert_eq!(
            addr.to_string(),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
    }

    #[test]
    fn address_from_padded_word() {
        let word = B256::from_slice(&{
            let mut bytes = [0u8; 32];
            bytes[12..].copy_from_slice(address!("0xd8da6bf26964af9d7eed9e03e53415d37aa96045").as_slice());
            bytes
        });
        let addr = EvmAddress::from_word(word);
        assert_eq!(
            addr.to_string(),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
    }

    #[test]
    fn amount_with_known_decimals_is_human_readable() {
        let amount = TokenAmount::from_base_units(U256::from(1_500_000u64), Some(6));
        assert_eq!(amount, TokenAmount::Units(Decimal::new(15, 1)));
        assert_eq!(amount.canonical(), "1.5");
    }

    #[test]
    fn amount_with_unknown_decimals_stays_raw() {
        let amount = TokenAmount::from_base_units(U256::from(123456789u64), None);
        assert_eq!(amount, TokenAmount::Raw("123456789".to_string()));
        assert_eq!(amount.to_decimal(), None);
    }

    #[test]
    fn oversized_amount_falls_back_to_raw() {
        let amount = TokenAmount::from_base_units(U256::MAX, Some(18));
        assert!(matches!(amount, TokenAmount::Raw(_)));
    }

    #[test]
    fn amount_parse_rejects_negative_and_garbage() {
        assert!(TokenAmount::parse("-1").is_err());
        assert!(TokenAmount::parse("1.2.3").is_err());
        assert!(TokenAmount::parse("").is_err());
    }

    #[test]
    fn amount_equality_ignores_trailing_zeroes() {
        let a = TokenAmount::parse("100.0").unwrap();
        let b = TokenAmount::parse("100").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn risk_score_clamps_to_unit_interval() {
        assert_eq!(RiskScore::new(1.5).value(), 1.0);
        assert_eq!(RiskScore::new(-0.2).value(), 0.0);
        assert_eq!(RiskScore::new(0.7).value(), 0.7);
    }

    #[test]
    fn status_round_trips() {
        for status in [
            TransferStatus::Pending,
            TransferStatus::Completed,
            TransferStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
        }
    }
}

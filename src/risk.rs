//! Risk scoring engine.
//!
//! A pure, deterministic function over one transfer plus two lookups. Each
//! signal contributes additively and the final score is capped at 1.0:
//!
//! - active sanctions hit on either endpoint: +0.8, `SANCTIONS_MATCH` (HIGH)
//! - amount above the configured threshold: +0.3, `HIGH_VALUE_TRANSFER` (MEDIUM)
//! - either endpoint in more transfers than the configured count over the
//!   last 24 h: +0.4, `FREQUENT_BRIDGE_USAGE` (MEDIUM)
//!
//! The engine never blocks the observer: a failed lookup yields the partial
//! score plus an `ANALYSIS_INCOMPLETE` flag.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::timestamp::UnixTimestamp;
use crate::types::{
    CrossChainTransfer, EvmAddress, FlagSeverity, RiskFlag, RiskFlagKind, RiskScore,
    SanctionsEntry,
};

/// Seconds in the behavioral look-back window.
const ACTIVITY_WINDOW_SECS: u64 = 24 * 60 * 60;

const SANCTIONS_WEIGHT: f64 = 0.8;
const HIGH_VALUE_WEIGHT: f64 = 0.3;
const FREQUENCY_WEIGHT: f64 = 0.4;

/// A sub-lookup failure. Recoverable: scoring continues with what it has.
#[derive(Debug, thiserror::Error)]
#[error("risk lookup unavailable: {0}")]
pub struct LookupError(pub String);

/// Read-only query over the sanctions watchlist.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SanctionsLookup: Send + Sync {
    /// The active watchlist entry for an address, if any. Matching is
    /// case-insensitive exact (addresses are lowercased on both sides).
    async fn active_entry(
        &self,
        address: EvmAddress,
    ) -> Result<Option<SanctionsEntry>, LookupError>;
}

/// Recent-activity counter over persisted transfers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityLookup: Send + Sync {
    /// Number of transfers involving `address` (either side) in the last
    /// `window_secs` seconds.
    async fn transfer_count(
        &self,
        address: EvmAddress,
        window_secs: u64,
    ) -> Result<u64, LookupError>;
}

/// The engine's verdict for one transfer.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: RiskScore,
    pub flags: Vec<RiskFlag>,
    pub analyzed_at: UnixTimestamp,
}

/// Scores transfers against the watchlist and behavioral thresholds.
pub struct RiskEngine {
    sanctions: Arc<dyn SanctionsLookup>,
    activity: Arc<dyn ActivityLookup>,
    high_value_threshold: Decimal,
    frequent_bridge_count: u64,
}

impl RiskEngine {
    pub fn new(
        sanctions: Arc<dyn SanctionsLookup>,
        activity: Arc<dyn ActivityLookup>,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            sanctions,
            activity,
            high_value_threshold: engine.high_value_threshold,
            frequent_bridge_count: engine.frequent_bridge_count,
        }
    }

    /// Score one transfer. Infallible by design; lookup failures degrade to
    /// a partial score with `ANALYSIS_INCOMPLETE`.
    pub async fn assess(&self, transfer: &CrossChainTransfer) -> RiskAssessment {
        let mut score = 0.0_f64;
        let mut flags = Vec::new();
        let mut incomplete: Option<String> = None;

        let endpoints = transfer.endpoints();

        // Sanctions: one weight even if both endpoints match, but every
        // matched address gets its own flag for the investigator.
        let mut sanctions_hit = false;
        for address in &endpoints {
            match self.sanctions.active_entry(*address).await {
                Ok(Some(entry)) => {
                    sanctions_hit = true;
                    flags.push(
                        RiskFlag::new(
                            RiskFlagKind::SanctionsMatch,
                            FlagSeverity::High,
                            format!("address {address} is on an active sanctions list"),
                        )
                        .with_details(json!({
                            "address": address.to_string(),
                            "source": entry.source,
                            "entityName": entry.entity_name,
                        })),
                    );
                }
                Ok(None) => {}
                Err(error) => {
                    incomplete.get_or_insert_with(|| format!("sanctions lookup: {error}"));
                }
            }
        }
        if sanctions_hit {
            score += SANCTIONS_WEIGHT;
        }

        if let Some(amount) = transfer.amount.to_decimal() {
            if amount > self.high_value_threshold {
                score += HIGH_VALUE_WEIGHT;
                flags.push(
                    RiskFlag::new(
                        RiskFlagKind::HighValueTransfer,
                        FlagSeverity::Medium,
                        format!(
                            "amount {amount} exceeds high-value threshold {}",
                            self.high_value_threshold
                        ),
                    )
                    .with_details(json!({
                        "amount": amount.to_string(),
                        "threshold": self.high_value_threshold.to_string(),
                    })),
                );
            }
        }

        let mut max_count: u64 = 0;
        let mut counted = false;
        for address in &endpoints {
            match self
                .activity
                .transfer_count(*address, ACTIVITY_WINDOW_SECS)
                .await
            {
                Ok(count) => {
                    counted = true;
                    max_count = max_count.max(count);
                }
                Err(error) => {
                    incomplete.get_or_insert_with(|| format!("activity lookup: {error}"));
                }
            }
        }
        if counted && max_count > self.frequent_bridge_count {
            score += FREQUENCY_WEIGHT;
            flags.push(
                RiskFlag::new(
                    RiskFlagKind::FrequentBridgeUsage,
                    FlagSeverity::Medium,
                    format!(
                        "{max_count} transfers in 24h exceeds threshold {}",
                        self.frequent_bridge_count
                    ),
                )
                .with_details(json!({
                    "count": max_count,
                    "threshold": self.frequent_bridge_count,
                })),
            );
        }

        if let Some(reason) = incomplete {
            flags.push(RiskFlag::new(
                RiskFlagKind::AnalysisIncomplete,
                FlagSeverity::Low,
                reason,
            ));
        }

        RiskAssessment {
            score: RiskScore::new(score),
            flags,
            analyzed_at: UnixTimestamp::try_now().unwrap_or(UnixTimestamp(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::protocol::BridgeProtocol;
    use crate::types::{TokenAmount, TransferStatus, TxHash};
    use alloy_primitives::B256;
    use uuid::Uuid;

    fn transfer(amount: &str) -> CrossChainTransfer {
        CrossChainTransfer {
            id: Uuid::new_v4(),
            protocol: BridgeProtocol::Stargate,
            source_chain: Some(Chain::Ethereum),
            destination_chain: Some(Chain::Polygon),
            source_address: Some("0x00000000000000000000000000000000000000aa".parse().unwrap()),
            destination_address: Some(
                "0x00000000000000000000000000000000000000bb".parse().unwrap(),
            ),
            token_address: Some("0x00000000000000000000000000000000000000cc".parse().unwrap()),
            token_symbol: "UNKNOWN".into(),
            amount: TokenAmount::parse(amount).unwrap(),
            transaction_hash: TxHash(B256::repeat_byte(0x01)),
            block_number: 1000,
            timestamp: UnixTimestamp(1_700_000_000),
            event_type: "Send".into(),
            status: TransferStatus::Pending,
            linked_transfer_id: None,
            risk_score: None,
            risk_flags: vec![],
            analyzed_at: None,
            metadata: serde_json::Map::new(),
        }
    }

    fn engine_with(
        sanctions: MockSanctionsLookup,
        activity: MockActivityLookup,
    ) -> RiskEngine {
        RiskEngine {
            sanctions: Arc::new(sanctions),
            activity: Arc::new(activity),
            high_value_threshold: Decimal::from(100_000u64),
            frequent_bridge_count: 10,
        }
    }

    fn sanctioned_entry() -> SanctionsEntry {
        SanctionsEntry {
            source: "OFAC".into(),
            entity_name: "Blocked Entity".into(),
            wallet_address: Some("0x00000000000000000000000000000000000000bb".parse().unwrap()),
            chain: None,
            risk_level: FlagSeverity::High,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn clean_transfer_scores_zero() {
        let mut sanctions = MockSanctionsLookup::new();
        sanctions.expect_active_entry().returning(|_| Ok(None));
        let mut activity = MockActivityLookup::new();
        activity.expect_transfer_count().returning(|_, _| Ok(1));

        let assessment = engine_with(sanctions, activity).assess(&transfer("100.0")).await;
        assert_eq!(assessment.score, RiskScore::ZERO);
        assert!(assessment.flags.is_empty());
    }

    #[tokio::test]
    async fn sanctions_hit_scores_point_eight() {
        let mut sanctions = MockSanctionsLookup::new();
        sanctions
            .expect_active_entry()
            .returning(|address| {
                if address.to_string().ends_with("bb") {
                    Ok(Some(sanctioned_entry()))
                } else {
                    Ok(None)
                }
            });
        let mut activity = MockActivityLookup::new();
        activity.expect_transfer_count().returning(|_, _| Ok(0));

        let assessment = engine_with(sanctions, activity).assess(&transfer("100.0")).await;
        assert_eq!(assessment.score, RiskScore::new(0.8));
        assert_eq!(assessment.flags.len(), 1);
        assert_eq!(assessment.flags[0].kind, RiskFlagKind::SanctionsMatch);
        assert_eq!(assessment.flags[0].severity, FlagSeverity::High);
    }

    #[tokio::test]
    async fn high_value_plus_frequency_sums_to_point_seven() {
        let mut sanctions = MockSanctionsLookup::new();
        sanctions.expect_active_entry().returning(|_| Ok(None));
        let mut activity = MockActivityLookup::new();
        activity.expect_transfer_count().returning(|_, _| Ok(12));

        let assessment = engine_with(sanctions, activity).assess(&transfer("250000")).await;
        assert!((assessment.score.value() - 0.7).abs() < 1e-9);
        let kinds: Vec<_> = assessment.flags.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&RiskFlagKind::HighValueTransfer));
        assert!(kinds.contains(&RiskFlagKind::FrequentBridgeUsage));
    }

    #[tokio::test]
    async fn all_signals_cap_at_one() {
        let mut sanctions = MockSanctionsLookup::new();
        sanctions
            .expect_active_entry()
            .returning(|_| Ok(Some(sanctioned_entry())));
        let mut activity = MockActivityLookup::new();
        activity.expect_transfer_count().returning(|_, _| Ok(100));

        let assessment = engine_with(sanctions, activity).assess(&transfer("9000000")).await;
        assert_eq!(assessment.score, RiskScore::new(1.0));
    }

    #[tokio::test]
    async fn lookup_failure_adds_incomplete_flag() {
        let mut sanctions = MockSanctionsLookup::new();
        sanctions
            .expect_active_entry()
            .returning(|_| Err(LookupError("connection refused".into())));
        let mut activity = MockActivityLookup::new();
        activity.expect_transfer_count().returning(|_, _| Ok(12));

        let assessment = engine_with(sanctions, activity).assess(&transfer("50")).await;
        // Frequency still fires; sanctions is unknown, not assumed.
        assert_eq!(assessment.score, RiskScore::new(0.4));
        let kinds: Vec<_> = assessment.flags.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&RiskFlagKind::AnalysisIncomplete));
    }

    #[tokio::test]
    async fn raw_amount_skips_high_value_signal() {
        let mut sanctions = MockSanctionsLookup::new();
        sanctions.expect_active_entry().returning(|_| Ok(None));
        let mut activity = MockActivityLookup::new();
        activity.expect_transfer_count().returning(|_, _| Ok(0));

        let mut subject = transfer("1");
        // Base-unit integer with unknown decimals: no human-readable value
        // to compare against a token-unit threshold.
        subject.amount = TokenAmount::Raw("999999999999999999999999".into());
        let assessment = engine_with(sanctions, activity).assess(&subject).await;
        assert_eq!(assessment.score, RiskScore::ZERO);
    }
}

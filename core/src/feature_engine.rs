//! Per-loan risk feature derivation.
//!
//! `derive_risk_features` is a pure function of the loan + customer
//! facts and the risk configuration: same input, byte-identical output.
//! The batch runner upserts one row per loan and collects per-loan
//! failures instead of aborting — one bad record never sinks the batch.

use crate::{
    config::RiskConfig,
    error::{CoreError, CoreResult},
    store::{LoanSnapshot, PortfolioStore},
    types::{LoanId, RiskClass},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFeature {
    pub loan_id: LoanId,
    pub utilization_risk: RiskClass,
    /// None when the customer's income is zero — the ratio is undefined
    /// and the utilization class falls back to the unknown sentinel.
    pub emi_to_income_ratio: Option<f64>,
    pub income_risk: RiskClass,
    pub combined_risk_score: f64,
    pub risk_grade: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanFailure {
    pub loan_id: LoanId,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivationReport {
    pub derived: usize,
    pub failures: Vec<LoanFailure>,
}

/// Derive the risk feature row for one loan. Pure and deterministic.
pub fn derive_risk_features(
    snapshot: &LoanSnapshot,
    config: &RiskConfig,
) -> CoreResult<RiskFeature> {
    if snapshot.emi_amount <= 0.0 {
        return Err(CoreError::Validation(format!(
            "loan '{}' has non-positive EMI",
            snapshot.loan_id
        )));
    }

    let monthly_income = snapshot.annual_income / 12.0;
    let (emi_to_income_ratio, utilization_risk) = if monthly_income > 0.0 {
        let ratio = snapshot.emi_amount / monthly_income;
        let class = if ratio <= config.utilization_low_max {
            RiskClass::Low
        } else if ratio <= config.utilization_medium_max {
            RiskClass::Medium
        } else {
            RiskClass::High
        };
        (Some(ratio), class)
    } else {
        // Division-by-zero risk: substitute the sentinel class rather
        // than fail the loan.
        (None, RiskClass::Unknown)
    };

    let income_risk = if snapshot.annual_income <= 0.0 {
        RiskClass::Unknown
    } else if snapshot.annual_income <= config.income_high_risk_max {
        RiskClass::High
    } else if snapshot.annual_income <= config.income_medium_risk_max {
        RiskClass::Medium
    } else {
        RiskClass::Low
    };

    let utilization_component = class_score(utilization_risk, config);
    let income_component = class_score(income_risk, config);
    // Both delinquency components are monotone non-decreasing in their
    // inputs, so the combined score never drops when bounces or DPD rise.
    let bounce_component = snapshot.bounce_rate.clamp(0.0, 100.0);
    let dpd_component = (snapshot.dpd.max(0) as f64
        / config.dpd_saturation_days.max(1) as f64)
        .min(1.0)
        * 100.0;

    let raw_score = config.weight_utilization * utilization_component
        + config.weight_income * income_component
        + config.weight_bounce * bounce_component
        + config.weight_dpd * dpd_component;
    let combined_risk_score = round2(raw_score.clamp(0.0, 100.0));

    Ok(RiskFeature {
        loan_id: snapshot.loan_id.clone(),
        utilization_risk,
        emi_to_income_ratio,
        income_risk,
        combined_risk_score,
        risk_grade: config.grade(combined_risk_score).to_string(),
    })
}

fn class_score(class: RiskClass, config: &RiskConfig) -> f64 {
    match class {
        RiskClass::Low => config.class_score_low,
        RiskClass::Medium => config.class_score_medium,
        RiskClass::High => config.class_score_high,
        RiskClass::Unknown => config.class_score_unknown,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct FeatureEngine<'a> {
    store: &'a PortfolioStore,
    config: &'a RiskConfig,
}

impl<'a> FeatureEngine<'a> {
    pub fn new(store: &'a PortfolioStore, config: &'a RiskConfig) -> Self {
        Self { store, config }
    }

    /// Derive and upsert risk features for every loan in the book.
    /// Callers wrap this in the recompute snapshot.
    pub fn run(&self, computed_at: &str) -> CoreResult<DerivationReport> {
        let mut report = DerivationReport::default();
        for snapshot in self.store.loans_for_derivation()? {
            match derive_risk_features(&snapshot, self.config) {
                Ok(feature) => {
                    self.store.upsert_risk_feature(&feature, computed_at)?;
                    report.derived += 1;
                }
                Err(err) => {
                    log::warn!("risk derivation failed for {}: {err}", snapshot.loan_id);
                    report.failures.push(LoanFailure {
                        loan_id: snapshot.loan_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        log::info!(
            "risk features: {} derived, {} failed",
            report.derived,
            report.failures.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(emi: f64, income: f64, bounce_rate: f64, dpd: i64) -> LoanSnapshot {
        LoanSnapshot {
            loan_id: "LN000001".into(),
            loan_amount: 200_000.0,
            emi_amount: emi,
            bounce_rate,
            dpd,
            annual_income: income,
        }
    }

    #[test]
    fn zero_income_uses_unknown_sentinel() {
        let cfg = RiskConfig::default();
        let feature = derive_risk_features(&snapshot(8000.0, 0.0, 0.0, 0), &cfg).unwrap();
        assert_eq!(feature.utilization_risk, RiskClass::Unknown);
        assert_eq!(feature.income_risk, RiskClass::Unknown);
        assert!(feature.emi_to_income_ratio.is_none());
    }

    #[test]
    fn derivation_is_deterministic() {
        let cfg = RiskConfig::default();
        let input = snapshot(9000.0, 600_000.0, 12.5, 30);
        let a = derive_risk_features(&input, &cfg).unwrap();
        let b = derive_risk_features(&input, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn score_monotone_in_bounce_rate_and_dpd() {
        let cfg = RiskConfig::default();
        let mut last = -1.0;
        for bounce in [0.0, 10.0, 25.0, 60.0, 100.0] {
            let score = derive_risk_features(&snapshot(9000.0, 600_000.0, bounce, 0), &cfg)
                .unwrap()
                .combined_risk_score;
            assert!(score >= last, "score dropped: {score} < {last}");
            last = score;
        }
        let mut last = -1.0;
        for dpd in [0, 15, 30, 60, 90, 180] {
            let score = derive_risk_features(&snapshot(9000.0, 600_000.0, 0.0, dpd), &cfg)
                .unwrap()
                .combined_risk_score;
            assert!(score >= last, "score dropped: {score} < {last}");
            last = score;
        }
    }

    #[test]
    fn utilization_bands_follow_config() {
        let cfg = RiskConfig::default();
        // 600k/year => 50k/month. EMI 10k => ratio 0.2 (low).
        let low = derive_risk_features(&snapshot(10_000.0, 600_000.0, 0.0, 0), &cfg).unwrap();
        assert_eq!(low.utilization_risk, RiskClass::Low);
        // EMI 20k => ratio 0.4 (medium).
        let med = derive_risk_features(&snapshot(20_000.0, 600_000.0, 0.0, 0), &cfg).unwrap();
        assert_eq!(med.utilization_risk, RiskClass::Medium);
        // EMI 30k => ratio 0.6 (high).
        let high = derive_risk_features(&snapshot(30_000.0, 600_000.0, 0.0, 0), &cfg).unwrap();
        assert_eq!(high.utilization_risk, RiskClass::High);
    }

    #[test]
    fn bad_emi_is_a_per_loan_error() {
        let cfg = RiskConfig::default();
        let err = derive_risk_features(&snapshot(0.0, 600_000.0, 0.0, 0), &cfg);
        assert!(err.is_err());
    }
}

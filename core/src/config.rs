//! Engine configuration.
//!
//! Every tunable the risk model uses is a named field here, with the
//! defaults documented next to it. Nothing in the derivation or
//! aggregation code hard-codes a threshold.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Row ceiling injected into ad-hoc queries that carry no LIMIT,
/// and the clamp applied to larger ones.
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Wall-clock budget for a single ad-hoc query.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub risk: RiskConfig,
    pub query: QueryLimits,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            risk: RiskConfig::default(),
            query: QueryLimits::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::Validation(format!("cannot read config: {e}")))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.risk.validate()?;
        if self.query.max_rows == 0 {
            return Err(CoreError::Validation("max_rows must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLimits {
    pub max_rows: usize,
    pub timeout_ms: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }
}

/// Parameters of the per-loan risk model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// EMI-to-income ratio at or below which utilization risk is low.
    pub utilization_low_max: f64,
    /// EMI-to-income ratio at or below which utilization risk is medium.
    /// Above it, high.
    pub utilization_medium_max: f64,

    /// Annual income at or below which income risk is high.
    pub income_high_risk_max: f64,
    /// Annual income at or below which income risk is medium.
    /// Above it, low.
    pub income_medium_risk_max: f64,

    /// Combined-score weights. Must sum to 1.0.
    pub weight_utilization: f64,
    pub weight_income: f64,
    pub weight_bounce: f64,
    pub weight_dpd: f64,

    /// Numeric score assigned to each categorical class (0..=100 scale).
    pub class_score_low: f64,
    pub class_score_medium: f64,
    pub class_score_high: f64,
    /// Sentinel score for the unknown class (zero/null income).
    pub class_score_unknown: f64,

    /// DPD at which the DPD component saturates at 100.
    pub dpd_saturation_days: u32,

    /// Grade boundaries: combined score strictly below each bound maps to
    /// the grade at the same index; anything at or above the last bound
    /// gets `grade_floor`. Ascending score means worse credit.
    pub grade_bounds: Vec<(String, f64)>,
    pub grade_floor: String,

    /// Interest-rate upper bounds mapping loans into risk bands A..E.
    pub rate_band_bounds: Vec<(String, f64)>,
    pub rate_band_floor: String,

    /// Credit-score lower bounds mapping customers into segments.
    pub segment_bounds: Vec<(String, i64)>,
    pub segment_floor: String,

    /// Annual-income upper bounds mapping customers into income bands.
    pub income_band_bounds: Vec<(String, f64)>,
    pub income_band_floor: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            utilization_low_max: 0.25,
            utilization_medium_max: 0.50,

            income_high_risk_max: 300_000.0,
            income_medium_risk_max: 1_200_000.0,

            weight_utilization: 0.35,
            weight_income: 0.25,
            weight_bounce: 0.25,
            weight_dpd: 0.15,

            class_score_low: 20.0,
            class_score_medium: 55.0,
            class_score_high: 85.0,
            class_score_unknown: 60.0,

            dpd_saturation_days: 90,

            grade_bounds: vec![
                ("A".into(), 30.0),
                ("B".into(), 45.0),
                ("C".into(), 60.0),
                ("D".into(), 75.0),
            ],
            grade_floor: "E".into(),

            rate_band_bounds: vec![
                ("A".into(), 10.0),
                ("B".into(), 12.0),
                ("C".into(), 14.0),
                ("D".into(), 16.0),
            ],
            rate_band_floor: "E".into(),

            segment_bounds: vec![
                ("Premium".into(), 750),
                ("Gold".into(), 700),
                ("Silver".into(), 650),
            ],
            segment_floor: "Standard".into(),

            income_band_bounds: vec![
                ("Low".into(), 500_000.0),
                ("Middle".into(), 1_500_000.0),
            ],
            income_band_floor: "High".into(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> CoreResult<()> {
        let weight_sum = self.weight_utilization
            + self.weight_income
            + self.weight_bounce
            + self.weight_dpd;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(CoreError::Validation(format!(
                "risk weights must sum to 1.0, got {weight_sum}"
            )));
        }
        if self.utilization_low_max >= self.utilization_medium_max {
            return Err(CoreError::Validation(
                "utilization band bounds must be ascending".into(),
            ));
        }
        if self.grade_bounds.is_empty() {
            return Err(CoreError::Validation("grade_bounds must not be empty".into()));
        }
        if self
            .grade_bounds
            .windows(2)
            .any(|w| w[0].1 >= w[1].1)
        {
            return Err(CoreError::Validation(
                "grade_bounds must be strictly ascending".into(),
            ));
        }
        Ok(())
    }

    /// Risk band for a loan, from its interest rate.
    pub fn rate_band(&self, interest_rate: f64) -> &str {
        for (band, bound) in &self.rate_band_bounds {
            if interest_rate <= *bound {
                return band;
            }
        }
        &self.rate_band_floor
    }

    /// Customer segment from credit score. Scoreless customers land in
    /// the floor segment.
    pub fn segment(&self, credit_score: Option<i64>) -> &str {
        if let Some(score) = credit_score {
            for (segment, bound) in &self.segment_bounds {
                if score >= *bound {
                    return segment;
                }
            }
        }
        &self.segment_floor
    }

    /// Income band from annual income.
    pub fn income_band(&self, annual_income: f64) -> &str {
        for (band, bound) in &self.income_band_bounds {
            if annual_income <= *bound {
                return band;
            }
        }
        &self.income_band_floor
    }

    /// Grade for a combined risk score.
    pub fn grade(&self, score: f64) -> &str {
        for (grade, bound) in &self.grade_bounds {
            if score < *bound {
                return grade;
            }
        }
        &self.grade_floor
    }
}

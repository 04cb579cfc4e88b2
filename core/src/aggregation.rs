//! Portfolio-level aggregation: point-in-time summaries, monthly trends,
//! and RAROC by risk band.
//!
//! Derived tables are caches of pure functions over the base tables.
//! Recomputing them is always safe; they are never a source of truth.

use crate::{
    error::CoreResult,
    store::PortfolioStore,
    types::MonthKey,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of the append-only summary time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub id: Option<i64>,
    pub calculation_date: String,
    pub total_loans: i64,
    pub total_disbursed: f64,
    pub active_loans: i64,
    pub delinquent_loans: i64,
    pub delinquency_rate: f64,
    pub avg_interest_rate: f64,
    pub weighted_avg_interest_rate: f64,
    pub collection_efficiency: f64,
    /// Bounced share of the whole ledger, as a 0..=100 percentage —
    /// the same unit every other bounce_rate column carries.
    pub bounce_rate: f64,
}

/// One row per calendar month, upserted on the month key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTrend {
    pub month: MonthKey,
    pub collection_amount: f64,
    pub transaction_count: i64,
    pub bounce_rate: f64,
}

/// Risk-adjusted return on capital for one risk band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RarocRow {
    pub risk_band: String,
    pub loan_count: i64,
    pub total_exposure: f64,
    pub expected_interest: f64,
    pub expected_loss: f64,
    pub raroc_pct: f64,
}

/// One early-warning stage over the active book, most severe first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyWarningRow {
    pub risk_stage: String,
    pub loan_count: i64,
    pub already_delinquent: i64,
    pub behind_schedule: i64,
    /// None until risk features have been derived for the stage's loans.
    pub avg_risk_score: Option<f64>,
    pub avg_bounce_rate: f64,
}

/// Borrower retention for one (joining cohort, lending quarter) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortRow {
    pub cohort_quarter: String,
    pub loan_quarter: String,
    pub active_customers: i64,
    pub total_loans: i64,
    pub retention_rate: f64,
}

/// One recency/frequency/monetary cell of the customer base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfmRow {
    pub rfm_cell: String,
    pub segment: String,
    pub customer_count: i64,
    pub avg_recency: f64,
    pub avg_frequency: f64,
    pub avg_monetary: f64,
    pub avg_risk_score: f64,
}

pub struct AggregationEngine<'a> {
    store: &'a PortfolioStore,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(store: &'a PortfolioStore) -> Self {
        Self { store }
    }

    /// Compute the portfolio summary as of `as_of` and append it to the
    /// time series. Callers wrap this in the recompute snapshot.
    pub fn compute_portfolio_summary(&self, as_of: NaiveDate) -> CoreResult<PortfolioSummary> {
        let mut summary = self.store.portfolio_metrics(&as_of.to_string())?;
        let id = self.store.insert_portfolio_summary(&summary)?;
        summary.id = Some(id);
        log::info!(
            "portfolio summary {as_of}: {} loans, delinquency {:.4}, collection {:.4}",
            summary.total_loans,
            summary.delinquency_rate,
            summary.collection_efficiency
        );
        Ok(summary)
    }

    /// Recompute every month present in the ledger. Upsert semantics:
    /// a month recomputed twice overwrites, never duplicates, its row.
    pub fn compute_monthly_trends(&self, computed_at: &str) -> CoreResult<Vec<MonthlyTrend>> {
        let trends = self.store.monthly_rollups()?;
        for trend in &trends {
            self.store.upsert_monthly_trend(trend, computed_at)?;
        }
        log::info!("monthly trends: {} months upserted", trends.len());
        Ok(trends)
    }

    /// RAROC per risk band over base tables, descending by RAROC with
    /// band order as the deterministic tie-break.
    pub fn raroc_by_band(&self) -> CoreResult<Vec<RarocRow>> {
        self.store.raroc_by_band()
    }

    /// Early-warning stages over the active book. Reads the loan columns
    /// the schedule refresh maintains, so run a recompute first.
    pub fn early_warning(&self) -> CoreResult<Vec<EarlyWarningRow>> {
        self.store.early_warning()
    }

    pub fn customer_cohorts(&self) -> CoreResult<Vec<CohortRow>> {
        self.store.customer_cohorts()
    }

    pub fn rfm_segments(&self, as_of: NaiveDate) -> CoreResult<Vec<RfmRow>> {
        self.store.rfm_segments(&as_of.to_string())
    }
}

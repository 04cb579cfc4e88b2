//! The portfolio engine — wires the store, config, and the three
//! compute surfaces together.
//!
//! RECOMPUTE ORDER (fixed, documented, never reordered):
//!   1. Loan schedule refresh (days since disbursement, DPD, delinquency)
//!   2. Customer segment/band refresh
//!   3. Risk feature derivation (per loan, partial-failure)
//!   4. Portfolio summary append
//!   5. Monthly trend upserts
//! All five run inside one IMMEDIATE transaction: concurrent readers see
//! either the old or the new derived tables, never a mix, and two
//! recomputes for the same date cannot race.

use crate::{
    aggregation::{
        AggregationEngine, CohortRow, EarlyWarningRow, MonthlyTrend, PortfolioSummary,
        RarocRow, RfmRow,
    },
    config::AnalyticsConfig,
    error::CoreResult,
    feature_engine::{DerivationReport, FeatureEngine},
    ingest::{CustomerRecord, IngestReport, Loader, LoanRecord, TransactionRecord},
    query_executor::{QueryOutcome, RowSet, SafeQueryExecutor},
    store::{PortfolioStore, QueryHistoryEntry},
    types::TxnStatus,
};
use chrono::{NaiveDate, Utc};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecomputeReport {
    pub as_of: NaiveDate,
    pub derivation: DerivationReport,
    pub summary: PortfolioSummary,
    pub months_updated: usize,
}

pub struct PortfolioEngine {
    store: PortfolioStore,
    config: AnalyticsConfig,
}

impl PortfolioEngine {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn open(path: &str, config: AnalyticsConfig) -> CoreResult<Self> {
        config.validate()?;
        let store = PortfolioStore::open(path)?;
        store.migrate()?;
        Ok(Self { store, config })
    }

    pub fn store(&self) -> &PortfolioStore {
        &self.store
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    // ── Ingestion ──────────────────────────────────────────────

    pub fn load_customers(&self, records: &[CustomerRecord]) -> CoreResult<IngestReport> {
        Loader::new(&self.store, &self.config.risk).load_customers(records)
    }

    pub fn load_loans(&self, records: &[LoanRecord]) -> CoreResult<IngestReport> {
        Loader::new(&self.store, &self.config.risk).load_loans(records)
    }

    pub fn load_transactions(&self, records: &[TransactionRecord]) -> CoreResult<IngestReport> {
        Loader::new(&self.store, &self.config.risk).load_transactions(records)
    }

    pub fn settle_transaction(
        &self,
        transaction_id: &str,
        final_status: TxnStatus,
    ) -> CoreResult<()> {
        self.store.settle_transaction(transaction_id, final_status)
    }

    // ── Recompute (administrative trigger) ─────────────────────

    /// Rebuild every derived table from the base tables as of `as_of`.
    pub fn recompute(&self, as_of: NaiveDate) -> CoreResult<RecomputeReport> {
        let computed_at = Utc::now().to_rfc3339();
        self.store.with_snapshot_write(|store| {
            store.refresh_loan_schedule(as_of)?;
            let risk = &self.config.risk;
            store.update_customer_segments(|score, income| {
                (
                    risk.segment(score).to_string(),
                    risk.income_band(income).to_string(),
                )
            })?;

            let derivation = FeatureEngine::new(store, risk).run(&computed_at)?;
            let aggregation = AggregationEngine::new(store);
            let summary = aggregation.compute_portfolio_summary(as_of)?;
            let months = aggregation.compute_monthly_trends(&computed_at)?;

            Ok(RecomputeReport {
                as_of,
                derivation,
                summary,
                months_updated: months.len(),
            })
        })
    }

    pub fn raroc_by_band(&self) -> CoreResult<Vec<RarocRow>> {
        AggregationEngine::new(&self.store).raroc_by_band()
    }

    pub fn monthly_trend(&self, month: &str) -> CoreResult<Option<MonthlyTrend>> {
        self.store.monthly_trend(month)
    }

    pub fn early_warning(&self) -> CoreResult<Vec<EarlyWarningRow>> {
        AggregationEngine::new(&self.store).early_warning()
    }

    pub fn customer_cohorts(&self) -> CoreResult<Vec<CohortRow>> {
        AggregationEngine::new(&self.store).customer_cohorts()
    }

    pub fn rfm_segments(&self, as_of: NaiveDate) -> CoreResult<Vec<RfmRow>> {
        AggregationEngine::new(&self.store).rfm_segments(as_of)
    }

    // ── Ad-hoc queries ─────────────────────────────────────────

    /// Execute one analyst query under the read-only policy and record
    /// the attempt — rejected, failed, or timed out included — in the
    /// query history.
    pub fn execute_query(&self, text: &str) -> CoreResult<RowSet> {
        let started = Instant::now();
        let result = SafeQueryExecutor::new(&self.store, self.config.query.clone())
            .and_then(|executor| executor.execute(text));

        let (outcome, row_count, error_message) = match &result {
            Ok(rows) => (QueryOutcome::Succeeded, rows.row_count() as i64, None),
            Err(err) => (QueryOutcome::from_error(err), 0, Some(err.to_string())),
        };
        let entry = QueryHistoryEntry {
            entry_id: Uuid::new_v4().to_string(),
            query_text: text.to_string(),
            executed_at: Utc::now().to_rfc3339(),
            outcome,
            row_count,
            duration_ms: started.elapsed().as_millis() as i64,
            error_message,
        };
        self.store.record_query(&entry)?;
        log::debug!(
            "query {} -> {} ({} rows, {}ms)",
            entry.entry_id,
            outcome.as_str(),
            row_count,
            entry.duration_ms
        );
        result
    }

    pub fn query_history(&self, limit: usize) -> CoreResult<Vec<QueryHistoryEntry>> {
        self.store.list_query_history(limit)
    }

    pub fn history_entry(&self, entry_id: &str) -> CoreResult<QueryHistoryEntry> {
        self.store.get_query_history(entry_id)
    }
}

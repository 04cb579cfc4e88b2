//! Bulk ingestion of customers, loans, and transactions.
//!
//! Raw records arrive from an external loader; this module validates
//! them, computes the derived columns (segments, bands, EMI math,
//! timestamp features), and writes them through the store. A record that
//! violates a key constraint or a value invariant is rejected on its own
//! — it never sinks the rest of the batch.

use crate::{
    config::RiskConfig,
    error::{CoreError, CoreResult},
    store::PortfolioStore,
    types::{CustomerId, LoanId, LoanStatus, TransactionId, TxnStatus},
};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

// ── Raw input records ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: CustomerId,
    pub joining_date: NaiveDate,
    pub credit_score: Option<i64>,
    pub annual_income: f64,
    pub employment_status: String,
    pub residential_status: String,
    pub age: i64,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRecord {
    pub loan_id: LoanId,
    pub customer_id: CustomerId,
    pub disbursement_date: NaiveDate,
    pub loan_amount: f64,
    pub interest_rate: f64,
    pub tenure_months: u32,
    pub loan_type: String,
    /// When absent, computed by the standard annuity formula.
    pub emi_amount: Option<f64>,
    pub current_status: LoanStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    pub loan_id: LoanId,
    pub transaction_date: NaiveDateTime,
    pub amount: f64,
    pub payment_mode: String,
    pub status: TxnStatus,
    pub bounce_flag: bool,
}

// ── Enriched rows, as persisted ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CustomerRow {
    pub customer_id: CustomerId,
    pub joining_date: NaiveDate,
    pub credit_score: Option<i64>,
    pub annual_income: f64,
    pub employment_status: String,
    pub residential_status: String,
    pub age: i64,
    pub state: String,
    pub customer_segment: String,
    pub income_band: String,
}

#[derive(Debug, Clone)]
pub struct LoanRow {
    pub loan_id: LoanId,
    pub customer_id: CustomerId,
    pub disbursement_date: NaiveDate,
    pub loan_amount: f64,
    pub interest_rate: f64,
    pub tenure_months: u32,
    pub loan_type: String,
    pub emi_amount: f64,
    pub total_payable: f64,
    pub total_interest: f64,
    pub current_status: LoanStatus,
    pub risk_band: String,
}

#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub transaction_id: TransactionId,
    pub loan_id: LoanId,
    pub transaction_date: NaiveDateTime,
    pub amount: f64,
    pub payment_mode: String,
    pub status: TxnStatus,
    pub bounce_flag: bool,
    pub transaction_month: String,
    pub day_of_week: i64,
    pub hour: i64,
    pub is_weekend: bool,
    pub is_month_end: bool,
    pub amount_bucket: String,
}

// ── Batch report ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub rejected: Vec<RejectedRecord>,
}

impl IngestReport {
    fn accept(&mut self) {
        self.inserted += 1;
    }

    fn reject(&mut self, id: &str, err: CoreError) {
        self.rejected.push(RejectedRecord {
            id: id.to_string(),
            error: err.to_string(),
        });
    }
}

// ── Pure enrichment math ─────────────────────────────────────────────────────

/// Equated monthly installment by the standard annuity formula.
/// Zero-rate loans amortize linearly.
pub fn emi(principal: f64, annual_rate_pct: f64, tenure_months: u32) -> f64 {
    let n = tenure_months as f64;
    if annual_rate_pct == 0.0 {
        return principal / n;
    }
    let r = annual_rate_pct / 12.0 / 100.0;
    let factor = (1.0 + r).powf(n);
    principal * r * factor / (factor - 1.0)
}

/// Coarse amount buckets used by the dashboard's histograms.
pub fn amount_bucket(amount: f64) -> &'static str {
    if amount < 5_000.0 {
        "0-5k"
    } else if amount < 20_000.0 {
        "5k-20k"
    } else if amount < 50_000.0 {
        "20k-50k"
    } else {
        "50k+"
    }
}

fn is_month_end(date: NaiveDate) -> bool {
    date.succ_opt().map(|next| next.month() != date.month()).unwrap_or(true)
}

impl TransactionRecord {
    /// Compute the timestamp-derived columns. Pure; recorded once at
    /// ingest because the ledger is append-only.
    pub fn enrich(self) -> TransactionRow {
        let date = self.transaction_date.date();
        TransactionRow {
            transaction_month: date.format("%Y-%m").to_string(),
            day_of_week: date.weekday().num_days_from_monday() as i64,
            hour: self.transaction_date.hour() as i64,
            is_weekend: matches!(date.weekday().num_days_from_monday(), 5 | 6),
            is_month_end: is_month_end(date),
            amount_bucket: amount_bucket(self.amount).to_string(),
            transaction_id: self.transaction_id,
            loan_id: self.loan_id,
            transaction_date: self.transaction_date,
            amount: self.amount,
            payment_mode: self.payment_mode,
            status: self.status,
            bounce_flag: self.bounce_flag,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

pub struct Loader<'a> {
    store: &'a PortfolioStore,
    config: &'a RiskConfig,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a PortfolioStore, config: &'a RiskConfig) -> Self {
        Self { store, config }
    }

    pub fn load_customers(&self, records: &[CustomerRecord]) -> CoreResult<IngestReport> {
        let mut report = IngestReport::default();
        for record in records {
            match self.insert_customer(record) {
                Ok(()) => report.accept(),
                Err(err) => report.reject(&record.customer_id, err),
            }
        }
        log::info!(
            "customers: {} inserted, {} rejected",
            report.inserted,
            report.rejected.len()
        );
        Ok(report)
    }

    fn insert_customer(&self, record: &CustomerRecord) -> CoreResult<()> {
        if let Some(score) = record.credit_score {
            if !(300..=900).contains(&score) {
                return Err(CoreError::Validation(format!(
                    "credit score {score} outside [300, 900]"
                )));
            }
        }
        if record.annual_income < 0.0 {
            return Err(CoreError::Validation("annual income must be >= 0".into()));
        }
        let row = CustomerRow {
            customer_segment: self.config.segment(record.credit_score).to_string(),
            income_band: self.config.income_band(record.annual_income).to_string(),
            customer_id: record.customer_id.clone(),
            joining_date: record.joining_date,
            credit_score: record.credit_score,
            annual_income: record.annual_income,
            employment_status: record.employment_status.clone(),
            residential_status: record.residential_status.clone(),
            age: record.age,
            state: record.state.clone(),
        };
        self.store.insert_customer(&row)
    }

    pub fn load_loans(&self, records: &[LoanRecord]) -> CoreResult<IngestReport> {
        let mut report = IngestReport::default();
        for record in records {
            match self.insert_loan(record) {
                Ok(()) => report.accept(),
                Err(err) => report.reject(&record.loan_id, err),
            }
        }
        log::info!(
            "loans: {} inserted, {} rejected",
            report.inserted,
            report.rejected.len()
        );
        Ok(report)
    }

    fn insert_loan(&self, record: &LoanRecord) -> CoreResult<()> {
        if record.loan_amount <= 0.0 {
            return Err(CoreError::Validation("loan amount must be > 0".into()));
        }
        if record.tenure_months == 0 {
            return Err(CoreError::Validation("tenure must be > 0 months".into()));
        }
        let emi_amount = match record.emi_amount {
            Some(value) if value > 0.0 => value,
            Some(_) => return Err(CoreError::Validation("EMI must be > 0".into())),
            None => emi(record.loan_amount, record.interest_rate, record.tenure_months),
        };
        let total_payable = emi_amount * record.tenure_months as f64;
        let row = LoanRow {
            risk_band: self.config.rate_band(record.interest_rate).to_string(),
            emi_amount,
            total_payable,
            total_interest: total_payable - record.loan_amount,
            loan_id: record.loan_id.clone(),
            customer_id: record.customer_id.clone(),
            disbursement_date: record.disbursement_date,
            loan_amount: record.loan_amount,
            interest_rate: record.interest_rate,
            tenure_months: record.tenure_months,
            loan_type: record.loan_type.clone(),
            current_status: record.current_status,
        };
        self.store.insert_loan(&row)
    }

    pub fn load_transactions(&self, records: &[TransactionRecord]) -> CoreResult<IngestReport> {
        let mut report = IngestReport::default();
        for record in records {
            let id = record.transaction_id.clone();
            let result = if record.amount < 0.0 {
                Err(CoreError::Validation("amount must be >= 0".into()))
            } else {
                self.store.insert_transaction(&record.clone().enrich())
            };
            match result {
                Ok(()) => report.accept(),
                Err(err) => report.reject(&id, err),
            }
        }
        log::info!(
            "transactions: {} inserted, {} rejected",
            report.inserted,
            report.rejected.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn emi_matches_annuity_formula() {
        // 100k at 12% over 12 months: known value ~8884.88
        let value = emi(100_000.0, 12.0, 12);
        assert!((value - 8884.88).abs() < 0.01, "got {value}");
    }

    #[test]
    fn emi_zero_rate_is_linear() {
        assert!((emi(120_000.0, 0.0, 12) - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn weekend_and_month_end_flags() {
        let saturday = NaiveDate::from_ymd_opt(2024, 3, 30)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let row = TransactionRecord {
            transaction_id: "t1".into(),
            loan_id: "l1".into(),
            transaction_date: saturday,
            amount: 12_000.0,
            payment_mode: "UPI".into(),
            status: TxnStatus::Success,
            bounce_flag: false,
        }
        .enrich();
        assert!(row.is_weekend);
        assert!(!row.is_month_end);
        assert_eq!(row.transaction_month, "2024-03");
        assert_eq!(row.hour, 14);
        assert_eq!(row.amount_bucket, "5k-20k");

        let eom = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert!(is_month_end(eom));
        assert!(!is_month_end(NaiveDate::from_ymd_opt(2024, 2, 28).unwrap()));
    }
}

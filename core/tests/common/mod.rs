//! Shared fixtures for the integration tests.
//!
//! Tests use shared-cache in-memory URIs so the safe query executor can
//! open its second, read-only connection to the same database. Each test
//! must pass a unique name — shared-cache databases are per-process.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use loanbook_core::{
    ingest::{CustomerRecord, LoanRecord, TransactionRecord},
    types::{LoanStatus, TxnStatus},
    AnalyticsConfig, PortfolioEngine,
};

pub fn engine(name: &str) -> PortfolioEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let uri = format!("file:{name}?mode=memory&cache=shared");
    PortfolioEngine::open(&uri, AnalyticsConfig::default()).expect("open test engine")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn datetime(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, 0, 0).expect("valid time")
}

pub fn customer(id: &str, income: f64, score: Option<i64>) -> CustomerRecord {
    CustomerRecord {
        customer_id: id.to_string(),
        joining_date: date(2022, 6, 1),
        credit_score: score,
        annual_income: income,
        employment_status: "Employed".to_string(),
        residential_status: "Owned".to_string(),
        age: 35,
        state: "Karnataka".to_string(),
    }
}

pub fn loan(id: &str, customer_id: &str, amount: f64, rate: f64, tenure: u32) -> LoanRecord {
    LoanRecord {
        loan_id: id.to_string(),
        customer_id: customer_id.to_string(),
        disbursement_date: date(2024, 1, 15),
        loan_amount: amount,
        interest_rate: rate,
        tenure_months: tenure,
        loan_type: "Personal".to_string(),
        emi_amount: None,
        current_status: LoanStatus::Active,
    }
}

pub fn txn(
    id: &str,
    loan_id: &str,
    when: NaiveDateTime,
    amount: f64,
    status: TxnStatus,
    bounce: bool,
) -> TransactionRecord {
    TransactionRecord {
        transaction_id: id.to_string(),
        loan_id: loan_id.to_string(),
        transaction_date: when,
        amount,
        payment_mode: "UPI".to_string(),
        status,
        bounce_flag: bounce,
    }
}

/// One customer with one active loan, ready for transactions.
pub fn seed_single_loan(engine: &PortfolioEngine, loan_id: &str) {
    let customers = engine
        .load_customers(&[customer("CUST000001", 900_000.0, Some(720))])
        .unwrap();
    assert!(customers.rejected.is_empty());
    let loans = engine
        .load_loans(&[loan(loan_id, "CUST000001", 200_000.0, 12.0, 24)])
        .unwrap();
    assert!(loans.rejected.is_empty());
}

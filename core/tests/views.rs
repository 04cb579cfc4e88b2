//! The reporting views, exercised through the safe query executor the
//! way an analyst would reach them.

mod common;

use common::{customer, datetime, engine, loan, txn};
use loanbook_core::{
    ingest::TransactionRecord,
    query_executor::SqlValue,
    types::{LoanStatus, TxnStatus},
};

fn mode_txn(id: &str, mode: &str, status: TxnStatus, bounce: bool) -> TransactionRecord {
    let mut record = txn(id, "LN000001", datetime(2024, 2, 5, 9), 5_000.0, status, bounce);
    record.payment_mode = mode.to_string();
    record
}

#[test]
fn active_portfolio_excludes_closed_and_defaulted_loans() {
    let engine = engine("views-active-only");
    engine
        .load_customers(&[customer("CUST000001", 900_000.0, Some(720))])
        .unwrap();
    let mut closed = loan("LN000002", "CUST000001", 100_000.0, 11.0, 12);
    closed.current_status = LoanStatus::Closed;
    let mut defaulted = loan("LN000003", "CUST000001", 100_000.0, 11.0, 12);
    defaulted.current_status = LoanStatus::Default;
    engine
        .load_loans(&[
            loan("LN000001", "CUST000001", 200_000.0, 12.0, 24),
            closed,
            defaulted,
        ])
        .unwrap();

    let rows = engine
        .execute_query("SELECT loan_id FROM active_portfolio ORDER BY loan_id")
        .unwrap();
    assert_eq!(rows.row_count(), 1);
    assert_eq!(rows.rows[0][0], SqlValue::Text("LN000001".to_string()));
}

#[test]
fn active_portfolio_shows_grades_after_recompute() {
    let engine = engine("views-grades");
    engine
        .load_customers(&[customer("CUST000001", 900_000.0, Some(720))])
        .unwrap();
    engine
        .load_loans(&[loan("LN000001", "CUST000001", 200_000.0, 12.0, 24)])
        .unwrap();

    // Before derivation the left join yields a NULL grade, not a
    // missing row.
    let rows = engine
        .execute_query("SELECT risk_grade FROM active_portfolio")
        .unwrap();
    assert_eq!(rows.row_count(), 1);
    assert_eq!(rows.rows[0][0], SqlValue::Null);

    engine.recompute(common::date(2024, 2, 1)).unwrap();
    let rows = engine
        .execute_query("SELECT risk_grade FROM active_portfolio")
        .unwrap();
    assert!(matches!(rows.rows[0][0], SqlValue::Text(_)));
}

#[test]
fn collection_by_mode_rates_per_payment_channel() {
    let engine = engine("views-by-mode");
    engine
        .load_customers(&[customer("CUST000001", 900_000.0, Some(720))])
        .unwrap();
    engine
        .load_loans(&[loan("LN000001", "CUST000001", 200_000.0, 12.0, 24)])
        .unwrap();
    engine
        .load_transactions(&[
            mode_txn("TXN000001", "UPI", TxnStatus::Success, false),
            mode_txn("TXN000002", "UPI", TxnStatus::Success, false),
            mode_txn("TXN000003", "UPI", TxnStatus::Failed, true),
            mode_txn("TXN000004", "NEFT", TxnStatus::Success, false),
        ])
        .unwrap();

    let rows = engine
        .execute_query(
            "SELECT payment_mode, total_transactions, successful_transactions,
                    total_amount, success_rate, bounce_rate
             FROM collection_by_mode ORDER BY payment_mode",
        )
        .unwrap();
    assert_eq!(rows.row_count(), 2);

    let neft = &rows.rows[0];
    assert_eq!(neft[0], SqlValue::Text("NEFT".to_string()));
    assert_eq!(neft[1], SqlValue::Integer(1));
    assert_eq!(neft[4], SqlValue::Real(100.0));
    assert_eq!(neft[5], SqlValue::Real(0.0));

    let upi = &rows.rows[1];
    assert_eq!(upi[1], SqlValue::Integer(3));
    assert_eq!(upi[2], SqlValue::Integer(2));
    // Only SUCCESS money counts toward the collected amount.
    assert_eq!(upi[3], SqlValue::Real(10_000.0));
    assert_eq!(upi[4], SqlValue::Real(66.67));
    assert_eq!(upi[5], SqlValue::Real(33.33));
}

//! Ingestion: key constraints, per-record rejection, atomic
//! transaction application, and the paid-percentage invariants.

mod common;

use common::{customer, datetime, engine, loan, seed_single_loan, txn};
use loanbook_core::types::{LoanStatus, TxnStatus};

#[test]
fn duplicate_customer_rejected_not_batch() {
    let engine = engine("ingest-dup-customer");
    let report = engine
        .load_customers(&[
            customer("CUST000001", 500_000.0, Some(700)),
            customer("CUST000001", 800_000.0, Some(750)),
            customer("CUST000002", 600_000.0, Some(680)),
        ])
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].id, "CUST000001");
    assert_eq!(engine.store().customer_count().unwrap(), 2);
}

#[test]
fn out_of_range_credit_score_rejected() {
    let engine = engine("ingest-bad-score");
    let report = engine
        .load_customers(&[customer("CUST000001", 500_000.0, Some(250))])
        .unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.rejected.len(), 1);
    // A missing score is legal and lands in the floor segment.
    let report = engine
        .load_customers(&[customer("CUST000002", 500_000.0, None)])
        .unwrap();
    assert_eq!(report.inserted, 1);
}

#[test]
fn loan_with_unknown_customer_rejected() {
    let engine = engine("ingest-orphan-loan");
    engine
        .load_customers(&[customer("CUST000001", 500_000.0, Some(700))])
        .unwrap();
    let report = engine
        .load_loans(&[
            loan("LN000001", "CUST000001", 100_000.0, 11.0, 12),
            loan("LN000002", "CUST999999", 100_000.0, 11.0, 12),
        ])
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].id, "LN000002");
}

#[test]
fn transaction_with_unknown_loan_leaves_no_trace() {
    let engine = engine("ingest-orphan-txn");
    seed_single_loan(&engine, "LN000001");
    let report = engine
        .load_transactions(&[txn(
            "TXN000001",
            "LN999999",
            datetime(2024, 3, 5, 10),
            9000.0,
            TxnStatus::Success,
            false,
        )])
        .unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.rejected.len(), 1);
    // Atomicity: neither the ledger row nor any loan update persisted.
    assert_eq!(engine.store().transaction_count().unwrap(), 0);
    let loan_state = engine.store().get_loan("LN000001").unwrap();
    assert_eq!(loan_state.total_paid, 0.0);
    assert_eq!(loan_state.payment_count, 0);
}

#[test]
fn success_transactions_update_running_state() {
    let engine = engine("ingest-running-state");
    seed_single_loan(&engine, "LN000001");
    engine
        .load_transactions(&[
            txn("TXN000001", "LN000001", datetime(2024, 2, 5, 9), 9400.0, TxnStatus::Success, false),
            txn("TXN000002", "LN000001", datetime(2024, 3, 5, 9), 9400.0, TxnStatus::Success, false),
            txn("TXN000003", "LN000001", datetime(2024, 4, 5, 9), 9400.0, TxnStatus::Failed, true),
        ])
        .unwrap();
    let state = engine.store().get_loan("LN000001").unwrap();
    assert!((state.total_paid - 18_800.0).abs() < 1e-9);
    assert_eq!(state.payment_count, 2);
    assert_eq!(state.bounce_count, 1);
    // 1 bounce out of 3 settled attempts.
    assert!((state.bounce_rate - 100.0 / 3.0).abs() < 1e-9);
}

#[test]
fn paid_percentage_clamped_and_monotone() {
    let engine = engine("ingest-paid-pct");
    seed_single_loan(&engine, "LN000001");
    let mut last = 0.0;
    for i in 0..30 {
        engine
            .load_transactions(&[txn(
                &format!("TXN{i:06}"),
                "LN000001",
                datetime(2024, 2, 5, 9),
                10_000.0,
                TxnStatus::Success,
                false,
            )])
            .unwrap();
        let state = engine.store().get_loan("LN000001").unwrap();
        assert!(
            state.paid_percentage >= last,
            "paid_percentage decreased: {} -> {}",
            last,
            state.paid_percentage
        );
        assert!((0.0..=100.0).contains(&state.paid_percentage));
        last = state.paid_percentage;
    }
    // 300k offered against ~226k payable: the ledger stops at the
    // contract, the percentage at 100, and the loan closes.
    let state = engine.store().get_loan("LN000001").unwrap();
    assert_eq!(state.paid_percentage, 100.0);
    assert!((state.total_paid - state.total_payable).abs() < 1e-9);
    assert!(state.current_status.is_terminal());
}

#[test]
fn overpayment_never_exceeds_total_payable() {
    let engine = engine("ingest-overpay");
    seed_single_loan(&engine, "LN000001");
    for i in 0..30 {
        engine
            .load_transactions(&[txn(
                &format!("TXN{i:06}"),
                "LN000001",
                datetime(2024, 2, 5, 9),
                10_000.0,
                TxnStatus::Success,
                false,
            )])
            .unwrap();
        let state = engine.store().get_loan("LN000001").unwrap();
        assert!(
            state.total_paid <= state.total_payable,
            "total_paid {} exceeds total_payable {}",
            state.total_paid,
            state.total_payable
        );
    }
    let state = engine.store().get_loan("LN000001").unwrap();
    assert!((state.total_paid - state.total_payable).abs() < 1e-9);
    assert_eq!(state.payment_count, 30);
}

#[test]
fn default_loan_recoveries_keep_accumulating() {
    let engine = engine("ingest-default-recovery");
    engine
        .load_customers(&[customer("CUST000001", 900_000.0, Some(720))])
        .unwrap();
    let mut defaulted = loan("LN000001", "CUST000001", 100_000.0, 11.0, 10);
    defaulted.emi_amount = Some(11_000.0);
    defaulted.current_status = LoanStatus::Default;
    engine.load_loans(&[defaulted]).unwrap();

    // Post-default recoveries are not contract installments; they land
    // uncapped so the unrecovered exposure stays honest.
    for i in 0..3 {
        engine
            .load_transactions(&[txn(
                &format!("TXN{i:06}"),
                "LN000001",
                datetime(2024, 2, 5, 9),
                50_000.0,
                TxnStatus::Success,
                false,
            )])
            .unwrap();
    }
    let state = engine.store().get_loan("LN000001").unwrap();
    assert!((state.total_paid - 150_000.0).abs() < 1e-9);
    assert_eq!(state.current_status, LoanStatus::Default);
    // The display percentage still clamps even when recoveries overshoot.
    assert_eq!(state.paid_percentage, 100.0);
}

#[test]
fn pending_settlement_is_the_only_ledger_mutation() {
    let engine = engine("ingest-settlement");
    seed_single_loan(&engine, "LN000001");
    engine
        .load_transactions(&[txn(
            "TXN000001",
            "LN000001",
            datetime(2024, 2, 5, 9),
            9400.0,
            TxnStatus::Pending,
            false,
        )])
        .unwrap();
    // Pending money is not collected money.
    let state = engine.store().get_loan("LN000001").unwrap();
    assert_eq!(state.total_paid, 0.0);

    engine
        .settle_transaction("TXN000001", TxnStatus::Success)
        .unwrap();
    let state = engine.store().get_loan("LN000001").unwrap();
    assert!((state.total_paid - 9400.0).abs() < 1e-9);
    assert_eq!(
        engine.store().transaction_status("TXN000001").unwrap(),
        TxnStatus::Success
    );

    // Settling twice is a contract violation, not a double-count.
    assert!(engine
        .settle_transaction("TXN000001", TxnStatus::Failed)
        .is_err());
    let state = engine.store().get_loan("LN000001").unwrap();
    assert!((state.total_paid - 9400.0).abs() < 1e-9);
}

#[test]
fn emi_computed_when_loader_omits_it() {
    let engine = engine("ingest-emi");
    engine
        .load_customers(&[customer("CUST000001", 900_000.0, Some(720))])
        .unwrap();
    engine
        .load_loans(&[loan("LN000001", "CUST000001", 100_000.0, 12.0, 12)])
        .unwrap();
    let state = engine.store().get_loan("LN000001").unwrap();
    assert!((state.emi_amount - 8884.88).abs() < 0.01, "emi {}", state.emi_amount);
    assert!((state.total_payable - state.emi_amount * 12.0).abs() < 1e-6);
}

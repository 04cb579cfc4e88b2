//! Deterministic demo-portfolio generator.
//!
//! RULE: nothing here calls a platform RNG. All draws flow through one
//! Pcg64Mcg stream derived from the master seed, so the same seed always
//! produces the same portfolio.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use loanbook_core::{
    ingest::{CustomerRecord, LoanRecord, TransactionRecord},
    types::{LoanStatus, TxnStatus},
};
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct SeedRng {
    inner: Pcg64Mcg,
}

impl SeedRng {
    pub fn new(master_seed: u64) -> Self {
        Self {
            inner: Pcg64Mcg::seed_from_u64(master_seed),
        }
    }

    fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    fn below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.below(items.len() as u64) as usize]
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

pub struct DemoPortfolio {
    pub customers: Vec<CustomerRecord>,
    pub loans: Vec<LoanRecord>,
    pub transactions: Vec<TransactionRecord>,
}

const STATES: &[&str] = &["Maharashtra", "Karnataka", "Delhi", "Tamil Nadu", "Gujarat"];
const EMPLOYMENT: &[&str] = &["Employed", "Self-Employed", "Unemployed"];
const RESIDENTIAL: &[&str] = &["Owned", "Rented"];
const LOAN_TYPES: &[&str] = &["Personal", "Business", "Home", "Auto", "Education"];
const PAYMENT_MODES: &[&str] = &["UPI", "Net Banking", "Debit Card", "NEFT"];
const LOAN_AMOUNTS: &[f64] = &[50_000.0, 100_000.0, 200_000.0, 500_000.0];
const TENURES: &[u32] = &[12, 24, 36, 48];

pub fn generate(
    rng: &mut SeedRng,
    n_customers: usize,
    n_loans: usize,
    n_transactions: usize,
) -> DemoPortfolio {
    let epoch = NaiveDate::from_ymd_opt(2022, 1, 1).expect("valid date");
    let loan_epoch = NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid date");

    let customers: Vec<CustomerRecord> = (1..=n_customers)
        .map(|i| CustomerRecord {
            customer_id: format!("CUST{i:06}"),
            joining_date: epoch + Duration::days(rng.below(365) as i64),
            credit_score: if rng.chance(0.95) {
                Some(300 + rng.below(601) as i64)
            } else {
                None
            },
            annual_income: rng.uniform(300_000.0, 5_000_000.0),
            employment_status: rng.pick(EMPLOYMENT).to_string(),
            residential_status: rng.pick(RESIDENTIAL).to_string(),
            age: 22 + rng.below(48) as i64,
            state: rng.pick(STATES).to_string(),
        })
        .collect();

    let loans: Vec<LoanRecord> = (1..=n_loans)
        .map(|i| {
            let status_roll = rng.next_f64();
            LoanRecord {
                loan_id: format!("LN{i:06}"),
                customer_id: format!("CUST{:06}", 1 + rng.below(n_customers as u64)),
                disbursement_date: loan_epoch + Duration::days(rng.below(400) as i64),
                loan_amount: *rng.pick(LOAN_AMOUNTS),
                interest_rate: rng.uniform(8.0, 18.0),
                tenure_months: *rng.pick(TENURES),
                loan_type: rng.pick(LOAN_TYPES).to_string(),
                emi_amount: None, // let the loader compute the annuity EMI
                current_status: if status_roll < 0.70 {
                    LoanStatus::Active
                } else if status_roll < 0.95 {
                    LoanStatus::Closed
                } else {
                    LoanStatus::Default
                },
            }
        })
        .collect();

    let transactions: Vec<TransactionRecord> = (1..=n_transactions)
        .map(|i| {
            let bounced = rng.chance(0.05);
            let date: NaiveDateTime = (loan_epoch + Duration::days(rng.below(420) as i64))
                .and_hms_opt(rng.below(24) as u32, rng.below(60) as u32, 0)
                .expect("valid time");
            TransactionRecord {
                transaction_id: format!("TXN{i:06}"),
                loan_id: format!("LN{:06}", 1 + rng.below(n_loans as u64)),
                transaction_date: date,
                amount: rng.uniform(1_000.0, 50_000.0),
                payment_mode: rng.pick(PAYMENT_MODES).to_string(),
                status: if bounced || rng.chance(0.05) {
                    TxnStatus::Failed
                } else {
                    TxnStatus::Success
                },
                bounce_flag: bounced,
            }
        })
        .collect();

    DemoPortfolio {
        customers,
        loans,
        transactions,
    }
}

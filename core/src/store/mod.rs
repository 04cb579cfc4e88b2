//! SQLite persistence layer.
//!
//! RULE: Only the store modules talk to the database.
//! Engines call store methods — they never execute SQL directly.
//! The one exception is the safe query executor, which runs analyst SQL
//! through a dedicated read-only connection obtained from here.

mod aggregate;
mod history;
mod risk;

pub use history::QueryHistoryEntry;
pub use risk::LoanSnapshot;

use crate::{
    error::{CoreError, CoreResult},
    ingest::{CustomerRow, LoanRow, TransactionRow},
    types::{LoanStatus, TxnStatus},
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

pub struct PortfolioStore {
    conn: Connection,
    path: String,
}

/// Current persisted state of a loan, as read back from the book.
#[derive(Debug, Clone)]
pub struct LoanState {
    pub loan_id: String,
    pub customer_id: String,
    pub loan_amount: f64,
    pub emi_amount: f64,
    pub total_payable: f64,
    pub total_paid: f64,
    pub payment_count: i64,
    pub bounce_count: i64,
    pub paid_percentage: f64,
    pub bounce_rate: f64,
    pub is_delinquent: bool,
    pub dpd: i64,
    pub days_since_disbursement: i64,
    pub current_status: LoanStatus,
    pub risk_band: String,
}

impl PortfolioStore {
    /// Open (or create) the portfolio database at `path`.
    /// URI filenames are accepted, which is what the tests use to share
    /// an in-memory database with the read-only query connection.
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only helps real files; shared-memory DBs ignore it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    /// Open a second, read-only connection to the same database for the
    /// query executor. Even a hostile statement cannot mutate state
    /// through it.
    pub fn reopen_read_only(&self) -> CoreResult<Connection> {
        // A plain :memory: database is private to its connection; a second
        // connection would see a different, empty database.
        if self.path == ":memory:" {
            return Err(CoreError::Validation(
                "ad-hoc queries need a file or shared-cache database".into(),
            ));
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.execute_batch("PRAGMA query_only=ON;")?;
        Ok(conn)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CoreResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_base_tables.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_derived_tables.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_views.sql"))?;
        Ok(())
    }

    /// Run `f` inside a single IMMEDIATE transaction.
    ///
    /// BEGIN IMMEDIATE takes SQLite's writer lock up front, so concurrent
    /// recomputes serialize (single-writer discipline) and readers on
    /// other connections observe either the pre- or post-recompute state
    /// of the derived tables, never a mix.
    pub fn with_snapshot_write<T>(
        &self,
        f: impl FnOnce(&Self) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT;")?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK;");
                Err(err)
            }
        }
    }

    // ── Schema ─────────────────────────────────────────────────

    /// Names of every table and view in the schema, for relation checks.
    pub fn known_relations(&self) -> CoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    // ── Customers ──────────────────────────────────────────────

    pub fn insert_customer(&self, c: &CustomerRow) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO customers (
                    customer_id, joining_date, credit_score, annual_income,
                    employment_status, residential_status, age, state,
                    customer_segment, income_band
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    c.customer_id,
                    c.joining_date.to_string(),
                    c.credit_score,
                    c.annual_income,
                    c.employment_status,
                    c.residential_status,
                    c.age,
                    c.state,
                    c.customer_segment,
                    c.income_band,
                ],
            )
            .map_err(CoreError::from_sqlite_write)?;
        Ok(())
    }

    pub fn customer_count(&self) -> CoreResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Recompute derived segment and income band for every customer.
    /// The only mutation customers ever see after onboarding.
    pub fn update_customer_segments(
        &self,
        assign: impl Fn(Option<i64>, f64) -> (String, String),
    ) -> CoreResult<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT customer_id, credit_score, annual_income FROM customers")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut updated = 0;
        for (customer_id, credit_score, annual_income) in rows {
            let (segment, band) = assign(credit_score, annual_income);
            updated += self.conn.execute(
                "UPDATE customers SET customer_segment = ?1, income_band = ?2
                 WHERE customer_id = ?3",
                params![segment, band, customer_id],
            )?;
        }
        Ok(updated)
    }

    // ── Loans ──────────────────────────────────────────────────

    pub fn insert_loan(&self, l: &LoanRow) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO loans (
                    loan_id, customer_id, disbursement_date, loan_amount,
                    interest_rate, tenure_months, loan_type, emi_amount,
                    total_payable, total_interest, current_status, risk_band
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    l.loan_id,
                    l.customer_id,
                    l.disbursement_date.to_string(),
                    l.loan_amount,
                    l.interest_rate,
                    l.tenure_months,
                    l.loan_type,
                    l.emi_amount,
                    l.total_payable,
                    l.total_interest,
                    l.current_status.as_str(),
                    l.risk_band,
                ],
            )
            .map_err(CoreError::from_sqlite_write)?;
        Ok(())
    }

    pub fn loan_count(&self) -> CoreResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM loans", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn get_loan(&self, loan_id: &str) -> CoreResult<LoanState> {
        self.conn
            .query_row(
                "SELECT loan_id, customer_id, loan_amount, emi_amount, total_payable,
                        total_paid, payment_count, bounce_count, paid_percentage,
                        bounce_rate, is_delinquent, dpd, days_since_disbursement,
                        current_status, risk_band
                 FROM loans WHERE loan_id = ?1",
                params![loan_id],
                |row| {
                    Ok(LoanState {
                        loan_id: row.get(0)?,
                        customer_id: row.get(1)?,
                        loan_amount: row.get(2)?,
                        emi_amount: row.get(3)?,
                        total_payable: row.get(4)?,
                        total_paid: row.get(5)?,
                        payment_count: row.get(6)?,
                        bounce_count: row.get(7)?,
                        paid_percentage: row.get(8)?,
                        bounce_rate: row.get(9)?,
                        is_delinquent: row.get::<_, i64>(10)? != 0,
                        dpd: row.get(11)?,
                        days_since_disbursement: row.get(12)?,
                        current_status: LoanStatus::parse(&row.get::<_, String>(13)?)
                            .unwrap_or(LoanStatus::Active),
                        risk_band: row.get(14)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| CoreError::NotFound {
                entity: "loan",
                id: loan_id.to_string(),
            })
    }

    /// Refresh the schedule-derived loan columns as of `as_of`.
    ///
    /// DPD is derived from the installment schedule: one EMI expected per
    /// 30 days since disbursement (capped at the tenure), compared with
    /// the EMIs actually covered by total_paid.
    pub fn refresh_loan_schedule(&self, as_of: NaiveDate) -> CoreResult<usize> {
        let as_of = as_of.to_string();
        let updated = self.conn.execute(
            "UPDATE loans SET
                days_since_disbursement =
                    MAX(0, CAST(julianday(?1) - julianday(disbursement_date) AS INTEGER)),
                dpd = MAX(0,
                    (MIN(MAX(0, CAST((julianday(?1) - julianday(disbursement_date)) / 30 AS INTEGER)),
                         tenure_months)
                     - CAST(total_paid / emi_amount AS INTEGER)) * 30)
             WHERE current_status = 'ACTIVE'",
            params![as_of],
        )?;
        self.conn.execute(
            "UPDATE loans SET is_delinquent = CASE WHEN dpd > 0 THEN 1 ELSE 0 END
             WHERE current_status = 'ACTIVE'",
            [],
        )?;
        Ok(updated)
    }

    // ── Transactions ───────────────────────────────────────────

    /// Append a transaction and apply it to the owning loan's running
    /// state in one database transaction — both persist or neither does.
    pub fn insert_transaction(&self, t: &TransactionRow) -> CoreResult<()> {
        let txn = self.conn.unchecked_transaction()?;
        txn.execute(
            "INSERT INTO transactions (
                transaction_id, loan_id, transaction_date, amount, payment_mode,
                status, bounce_flag, transaction_month, day_of_week, hour,
                is_weekend, is_month_end, amount_bucket
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                t.transaction_id,
                t.loan_id,
                t.transaction_date.format("%Y-%m-%d %H:%M:%S").to_string(),
                t.amount,
                t.payment_mode,
                t.status.as_str(),
                t.bounce_flag as i64,
                t.transaction_month,
                t.day_of_week,
                t.hour,
                t.is_weekend as i64,
                t.is_month_end as i64,
                t.amount_bucket,
            ],
        )
        .map_err(CoreError::from_sqlite_write)?;
        self.apply_to_loan(&t.loan_id, t.amount, t.status, t.bounce_flag)?;
        txn.commit()?;
        Ok(())
    }

    /// Settle a PENDING transaction. The only mutation the append-only
    /// ledger permits; loan totals are applied atomically with it.
    pub fn settle_transaction(
        &self,
        transaction_id: &str,
        final_status: TxnStatus,
    ) -> CoreResult<()> {
        if final_status == TxnStatus::Pending {
            return Err(CoreError::Validation(
                "settlement status must be SUCCESS or FAILED".into(),
            ));
        }
        let txn = self.conn.unchecked_transaction()?;
        let row = txn
            .query_row(
                "SELECT loan_id, amount, status FROM transactions
                 WHERE transaction_id = ?1",
                params![transaction_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let (loan_id, amount, status) = row.ok_or_else(|| CoreError::NotFound {
            entity: "transaction",
            id: transaction_id.to_string(),
        })?;
        if TxnStatus::parse(&status) != Some(TxnStatus::Pending) {
            return Err(CoreError::Validation(format!(
                "transaction '{transaction_id}' is {status}, not PENDING"
            )));
        }
        txn.execute(
            "UPDATE transactions SET status = ?1 WHERE transaction_id = ?2",
            params![final_status.as_str(), transaction_id],
        )?;
        // The bounce, if any, was already counted when the row was appended.
        self.apply_to_loan(&loan_id, amount, final_status, false)?;
        txn.commit()?;
        Ok(())
    }

    /// Fold one settled transaction into the owning loan's running state.
    /// Callers hold the enclosing database transaction.
    fn apply_to_loan(
        &self,
        loan_id: &str,
        amount: f64,
        status: TxnStatus,
        bounce_flag: bool,
    ) -> CoreResult<()> {
        match status {
            TxnStatus::Success => {
                // Collected money on a live loan is capped at the contract:
                // total_paid never exceeds total_payable. Recoveries against
                // a DEFAULT loan keep accumulating, since the unrecovered
                // exposure is what the loss reports net against.
                self.conn.execute(
                    "UPDATE loans SET
                        total_paid = CASE
                            WHEN current_status = 'DEFAULT' THEN total_paid + ?1
                            ELSE MIN(total_payable, total_paid + ?1)
                        END,
                        payment_count = payment_count + 1
                     WHERE loan_id = ?2",
                    params![amount, loan_id],
                )?;
            }
            TxnStatus::Failed | TxnStatus::Pending => {}
        }
        if bounce_flag {
            self.conn.execute(
                "UPDATE loans SET bounce_count = bounce_count + 1 WHERE loan_id = ?1",
                params![loan_id],
            )?;
        }
        // Recompute the ratios from the updated counters.
        self.conn.execute(
            "UPDATE loans SET
                paid_percentage =
                    MIN(100.0, MAX(0.0, total_paid * 100.0 / total_payable)),
                bounce_rate = CASE
                    WHEN payment_count + bounce_count = 0 THEN 0.0
                    ELSE bounce_count * 100.0 / (payment_count + bounce_count)
                END
             WHERE loan_id = ?1",
            params![loan_id],
        )?;
        // A fully paid ACTIVE loan closes terminally.
        self.conn.execute(
            "UPDATE loans SET current_status = 'CLOSED'
             WHERE loan_id = ?1 AND current_status = 'ACTIVE'
               AND total_paid >= total_payable",
            params![loan_id],
        )?;
        Ok(())
    }

    pub fn transaction_count(&self) -> CoreResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn transaction_status(&self, transaction_id: &str) -> CoreResult<TxnStatus> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM transactions WHERE transaction_id = ?1",
                params![transaction_id],
                |row| row.get(0),
            )
            .optional()?;
        status
            .as_deref()
            .and_then(TxnStatus::parse)
            .ok_or_else(|| CoreError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })
    }
}

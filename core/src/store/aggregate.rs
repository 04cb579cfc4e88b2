use super::PortfolioStore;
use crate::{
    aggregation::{CohortRow, EarlyWarningRow, MonthlyTrend, PortfolioSummary, RarocRow, RfmRow},
    error::CoreResult,
};
use rusqlite::{params, OptionalExtension};

impl PortfolioStore {
    /// Point-in-time portfolio metrics over the loan book and ledger.
    /// Every ratio degrades to 0 on an empty denominator — an empty book
    /// must never be a division fault.
    pub fn portfolio_metrics(&self, calculation_date: &str) -> CoreResult<PortfolioSummary> {
        let summary = self.conn.query_row(
            "SELECT
                COUNT(*) AS total_loans,
                COALESCE(SUM(loan_amount), 0) AS total_disbursed,
                COALESCE(SUM(CASE WHEN current_status = 'ACTIVE' THEN 1 ELSE 0 END), 0)
                    AS active_loans,
                COALESCE(SUM(CASE WHEN is_delinquent = 1
                                    OR current_status IN ('DELINQUENT', 'DEFAULT')
                                  THEN 1 ELSE 0 END), 0) AS delinquent_loans,
                COALESCE(AVG(interest_rate), 0) AS avg_interest_rate,
                CASE WHEN COALESCE(SUM(loan_amount), 0) = 0 THEN 0
                     ELSE SUM(loan_amount * interest_rate) / SUM(loan_amount)
                END AS weighted_avg_interest_rate,
                CASE WHEN COALESCE(SUM(CASE WHEN current_status IN ('ACTIVE', 'CLOSED')
                                            THEN total_payable ELSE 0 END), 0) = 0 THEN 0
                     ELSE SUM(CASE WHEN current_status IN ('ACTIVE', 'CLOSED')
                                   THEN total_paid ELSE 0 END)
                          / SUM(CASE WHEN current_status IN ('ACTIVE', 'CLOSED')
                                     THEN total_payable ELSE 0 END)
                END AS collection_efficiency,
                COALESCE((SELECT CASE WHEN COUNT(*) = 0 THEN 0
                                      ELSE SUM(bounce_flag) * 100.0 / COUNT(*)
                                 END
                          FROM transactions), 0) AS bounce_rate
             FROM loans",
            [],
            |row| {
                Ok(PortfolioSummary {
                    id: None,
                    calculation_date: calculation_date.to_string(),
                    total_loans: row.get(0)?,
                    total_disbursed: row.get(1)?,
                    active_loans: row.get(2)?,
                    delinquent_loans: row.get(3)?,
                    delinquency_rate: 0.0, // filled below
                    avg_interest_rate: row.get(4)?,
                    weighted_avg_interest_rate: row.get(5)?,
                    collection_efficiency: row.get(6)?,
                    bounce_rate: row.get(7)?,
                })
            },
        )?;
        let mut summary = summary;
        summary.delinquency_rate = if summary.total_loans > 0 {
            summary.delinquent_loans as f64 / summary.total_loans as f64
        } else {
            0.0
        };
        Ok(summary)
    }

    /// Append a summary row. The time series is never updated in place;
    /// corrections are new rows.
    pub fn insert_portfolio_summary(&self, s: &PortfolioSummary) -> CoreResult<i64> {
        self.conn.execute(
            "INSERT INTO portfolio_summary (
                calculation_date, total_loans, total_disbursed, active_loans,
                delinquent_loans, delinquency_rate, avg_interest_rate,
                weighted_avg_interest_rate, collection_efficiency, bounce_rate
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                s.calculation_date,
                s.total_loans,
                s.total_disbursed,
                s.active_loans,
                s.delinquent_loans,
                s.delinquency_rate,
                s.avg_interest_rate,
                s.weighted_avg_interest_rate,
                s.collection_efficiency,
                s.bounce_rate,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn latest_portfolio_summary(&self) -> CoreResult<Option<PortfolioSummary>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, calculation_date, total_loans, total_disbursed,
                        active_loans, delinquent_loans, delinquency_rate,
                        avg_interest_rate, weighted_avg_interest_rate,
                        collection_efficiency, bounce_rate
                 FROM portfolio_summary ORDER BY id DESC LIMIT 1",
                [],
                Self::map_summary_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn summary_count(&self) -> CoreResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM portfolio_summary", [], |row| row.get(0))?;
        Ok(n)
    }

    fn map_summary_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PortfolioSummary> {
        Ok(PortfolioSummary {
            id: Some(row.get(0)?),
            calculation_date: row.get(1)?,
            total_loans: row.get(2)?,
            total_disbursed: row.get(3)?,
            active_loans: row.get(4)?,
            delinquent_loans: row.get(5)?,
            delinquency_rate: row.get(6)?,
            avg_interest_rate: row.get(7)?,
            weighted_avg_interest_rate: row.get(8)?,
            collection_efficiency: row.get(9)?,
            bounce_rate: row.get(10)?,
        })
    }

    // ── Monthly trends ─────────────────────────────────────────

    /// Per-month collection amount and bounce rate over the whole ledger.
    pub fn monthly_rollups(&self) -> CoreResult<Vec<MonthlyTrend>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_month,
                    COALESCE(SUM(CASE WHEN status = 'SUCCESS' THEN amount ELSE 0 END), 0),
                    COUNT(*),
                    ROUND(SUM(bounce_flag) * 100.0 / COUNT(*), 2)
             FROM transactions
             GROUP BY transaction_month
             ORDER BY transaction_month",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MonthlyTrend {
                    month: row.get(0)?,
                    collection_amount: row.get(1)?,
                    transaction_count: row.get(2)?,
                    bounce_rate: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Unique on the month key: recomputing a month overwrites its row.
    pub fn upsert_monthly_trend(&self, t: &MonthlyTrend, computed_at: &str) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO monthly_trends (
                month, collection_amount, transaction_count, bounce_rate, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(month) DO UPDATE SET
                collection_amount = excluded.collection_amount,
                transaction_count = excluded.transaction_count,
                bounce_rate = excluded.bounce_rate,
                computed_at = excluded.computed_at",
            params![
                t.month,
                t.collection_amount,
                t.transaction_count,
                t.bounce_rate,
                computed_at,
            ],
        )?;
        Ok(())
    }

    pub fn monthly_trend(&self, month: &str) -> CoreResult<Option<MonthlyTrend>> {
        let row = self
            .conn
            .query_row(
                "SELECT month, collection_amount, transaction_count, bounce_rate
                 FROM monthly_trends WHERE month = ?1",
                params![month],
                |row| {
                    Ok(MonthlyTrend {
                        month: row.get(0)?,
                        collection_amount: row.get(1)?,
                        transaction_count: row.get(2)?,
                        bounce_rate: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn trend_count(&self) -> CoreResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM monthly_trends", [], |row| row.get(0))?;
        Ok(n)
    }

    // ── RAROC ──────────────────────────────────────────────────

    /// Risk-adjusted return on capital per risk band, over base tables
    /// only. Expected loss on a DEFAULT loan is the unrecovered exposure;
    /// zero everywhere else. Descending by RAROC, ties broken by band for
    /// deterministic reporting.
    pub fn raroc_by_band(&self) -> CoreResult<Vec<RarocRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT risk_band,
                    COUNT(*) AS loan_count,
                    SUM(loan_amount) AS total_exposure,
                    SUM(total_interest) AS expected_interest,
                    SUM(CASE WHEN current_status = 'DEFAULT'
                             THEN loan_amount - COALESCE(total_paid, 0)
                             ELSE 0 END) AS expected_loss,
                    ROUND(
                        (SUM(total_interest)
                         - SUM(CASE WHEN current_status = 'DEFAULT'
                                    THEN loan_amount - COALESCE(total_paid, 0)
                                    ELSE 0 END)) * 100.0
                        / SUM(loan_amount), 2) AS raroc_pct
             FROM loans
             GROUP BY risk_band
             ORDER BY raroc_pct DESC, risk_band ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RarocRow {
                    risk_band: row.get(0)?,
                    loan_count: row.get(1)?,
                    total_exposure: row.get(2)?,
                    expected_interest: row.get(3)?,
                    expected_loss: row.get(4)?,
                    raroc_pct: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Canned reports ─────────────────────────────────────────

    /// Active loans bucketed into early-warning stages by DPD, most
    /// severe first. A loan is behind schedule when its paid share
    /// trails 80% of the elapsed share of its tenure.
    pub fn early_warning(&self) -> CoreResult<Vec<EarlyWarningRow>> {
        let mut stmt = self.conn.prepare(
            "WITH staged AS (
                SELECT l.is_delinquent,
                       l.bounce_rate,
                       rf.combined_risk_score,
                       CASE
                           WHEN l.dpd > 30 THEN 'Stage 3 - High Risk'
                           WHEN l.dpd BETWEEN 15 AND 30 THEN 'Stage 2 - Medium Risk'
                           WHEN l.dpd BETWEEN 1 AND 15 THEN 'Stage 1 - Low Risk'
                           ELSE 'Current'
                       END AS risk_stage,
                       CASE WHEN l.paid_percentage <
                                 (l.days_since_disbursement * 100.0
                                  / (l.tenure_months * 30)) * 0.8
                            THEN 1 ELSE 0 END AS behind_schedule
                FROM loans l
                LEFT JOIN risk_features rf ON rf.loan_id = l.loan_id
                WHERE l.current_status = 'ACTIVE'
            )
            SELECT risk_stage,
                   COUNT(*),
                   SUM(is_delinquent),
                   SUM(behind_schedule),
                   ROUND(AVG(combined_risk_score), 2),
                   ROUND(AVG(bounce_rate), 2)
            FROM staged
            GROUP BY risk_stage
            ORDER BY CASE risk_stage
                WHEN 'Stage 3 - High Risk' THEN 1
                WHEN 'Stage 2 - Medium Risk' THEN 2
                WHEN 'Stage 1 - Low Risk' THEN 3
                ELSE 4
            END",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EarlyWarningRow {
                    risk_stage: row.get(0)?,
                    loan_count: row.get(1)?,
                    already_delinquent: row.get(2)?,
                    behind_schedule: row.get(3)?,
                    avg_risk_score: row.get(4)?,
                    avg_bounce_rate: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Borrower retention by joining-quarter cohort: for each cohort,
    /// how many of its customers took loans in each later quarter,
    /// as a share of the cohort's first active quarter.
    pub fn customer_cohorts(&self) -> CoreResult<Vec<CohortRow>> {
        let mut stmt = self.conn.prepare(
            "WITH cohorts AS (
                SELECT c.customer_id,
                       strftime('%Y', c.joining_date) || '-Q' ||
                           ((strftime('%m', c.joining_date) + 2) / 3) AS cohort_quarter
                FROM customers c
                JOIN loans l ON l.customer_id = c.customer_id
                GROUP BY c.customer_id
            ),
            activity AS (
                SELECT co.customer_id,
                       co.cohort_quarter,
                       strftime('%Y', l.disbursement_date) || '-Q' ||
                           ((strftime('%m', l.disbursement_date) + 2) / 3) AS loan_quarter,
                       COUNT(DISTINCT l.loan_id) AS loans_taken
                FROM cohorts co
                JOIN loans l ON l.customer_id = co.customer_id
                GROUP BY co.customer_id, co.cohort_quarter, loan_quarter
            )
            SELECT cohort_quarter,
                   loan_quarter,
                   COUNT(DISTINCT customer_id) AS active_customers,
                   SUM(loans_taken) AS total_loans,
                   ROUND(COUNT(DISTINCT customer_id) * 100.0 /
                         FIRST_VALUE(COUNT(DISTINCT customer_id)) OVER (
                             PARTITION BY cohort_quarter ORDER BY loan_quarter
                         ), 2) AS retention_rate
            FROM activity
            GROUP BY cohort_quarter, loan_quarter
            ORDER BY cohort_quarter, loan_quarter",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CohortRow {
                    cohort_quarter: row.get(0)?,
                    loan_quarter: row.get(1)?,
                    active_customers: row.get(2)?,
                    total_loans: row.get(3)?,
                    retention_rate: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recency/frequency/monetary segmentation of the customer base,
    /// quartile-scored as of `as_of`. Only SUCCESS money counts; a
    /// customer with no ledger activity gets the 365-day recency floor.
    pub fn rfm_segments(&self, as_of: &str) -> CoreResult<Vec<RfmRow>> {
        let mut stmt = self.conn.prepare(
            "WITH facts AS (
                SELECT c.customer_id,
                       COALESCE(julianday(?1) - julianday(MAX(t.transaction_date)),
                                365) AS recency,
                       COUNT(DISTINCT t.transaction_id) AS frequency,
                       COALESCE(SUM(t.amount), 0) AS monetary,
                       COALESCE(AVG(rf.combined_risk_score), 50) AS avg_risk_score
                FROM customers c
                LEFT JOIN loans l ON l.customer_id = c.customer_id
                LEFT JOIN transactions t ON t.loan_id = l.loan_id
                                        AND t.status = 'SUCCESS'
                LEFT JOIN risk_features rf ON rf.loan_id = l.loan_id
                GROUP BY c.customer_id
            ),
            scored AS (
                SELECT recency, frequency, monetary, avg_risk_score,
                       NTILE(4) OVER (ORDER BY recency DESC) AS r_score,
                       NTILE(4) OVER (ORDER BY frequency) AS f_score,
                       NTILE(4) OVER (ORDER BY monetary) AS m_score
                FROM facts
            )
            SELECT r_score || f_score || m_score AS rfm_cell,
                   CASE
                       WHEN r_score || f_score || m_score IN ('444', '443', '434')
                           THEN 'Champions'
                       WHEN r_score >= 3 AND f_score >= 3 AND m_score >= 2
                           THEN 'Loyal Customers'
                       WHEN r_score >= 3 AND f_score BETWEEN 2 AND 3
                           THEN 'Potential Loyalists'
                       WHEN r_score >= 3 AND f_score = 1 THEN 'New Customers'
                       WHEN r_score = 2 THEN 'At Risk'
                       WHEN r_score = 1 THEN 'Lost Customers'
                       ELSE 'Others'
                   END AS segment,
                   COUNT(*) AS customer_count,
                   ROUND(AVG(recency), 2),
                   ROUND(AVG(frequency), 2),
                   ROUND(AVG(monetary), 2),
                   ROUND(AVG(avg_risk_score), 2)
            FROM scored
            GROUP BY r_score, f_score, m_score
            ORDER BY r_score DESC, f_score DESC, m_score DESC",
        )?;
        let rows = stmt
            .query_map(params![as_of], |row| {
                Ok(RfmRow {
                    rfm_cell: row.get(0)?,
                    segment: row.get(1)?,
                    customer_count: row.get(2)?,
                    avg_recency: row.get(3)?,
                    avg_frequency: row.get(4)?,
                    avg_monetary: row.get(5)?,
                    avg_risk_score: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

use super::PortfolioStore;
use crate::{
    error::{CoreError, CoreResult},
    feature_engine::RiskFeature,
    types::RiskClass,
};
use rusqlite::{params, OptionalExtension};

/// The per-loan facts the feature engine derives from: the loan joined to
/// its owning customer, all read from one snapshot.
#[derive(Debug, Clone)]
pub struct LoanSnapshot {
    pub loan_id: String,
    pub loan_amount: f64,
    pub emi_amount: f64,
    pub bounce_rate: f64,
    pub dpd: i64,
    pub annual_income: f64,
}

impl PortfolioStore {
    /// Every loan with its customer facts, ordered for deterministic
    /// batch output.
    pub fn loans_for_derivation(&self) -> CoreResult<Vec<LoanSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.loan_id, l.loan_amount, l.emi_amount, l.bounce_rate,
                    l.dpd, c.annual_income
             FROM loans l
             JOIN customers c ON c.customer_id = l.customer_id
             ORDER BY l.loan_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LoanSnapshot {
                    loan_id: row.get(0)?,
                    loan_amount: row.get(1)?,
                    emi_amount: row.get(2)?,
                    bounce_rate: row.get(3)?,
                    dpd: row.get(4)?,
                    annual_income: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Overwrite semantics: exactly one risk_features row per loan.
    pub fn upsert_risk_feature(
        &self,
        feature: &RiskFeature,
        computed_at: &str,
    ) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO risk_features (
                    loan_id, utilization_risk, emi_to_income_ratio, income_risk,
                    combined_risk_score, risk_grade, computed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(loan_id) DO UPDATE SET
                    utilization_risk = excluded.utilization_risk,
                    emi_to_income_ratio = excluded.emi_to_income_ratio,
                    income_risk = excluded.income_risk,
                    combined_risk_score = excluded.combined_risk_score,
                    risk_grade = excluded.risk_grade,
                    computed_at = excluded.computed_at",
                params![
                    feature.loan_id,
                    feature.utilization_risk.as_str(),
                    feature.emi_to_income_ratio,
                    feature.income_risk.as_str(),
                    feature.combined_risk_score,
                    feature.risk_grade,
                    computed_at,
                ],
            )
            .map_err(CoreError::from_sqlite_write)?;
        Ok(())
    }

    pub fn get_risk_feature(&self, loan_id: &str) -> CoreResult<Option<RiskFeature>> {
        let row = self
            .conn
            .query_row(
                "SELECT loan_id, utilization_risk, emi_to_income_ratio,
                        income_risk, combined_risk_score, risk_grade
                 FROM risk_features WHERE loan_id = ?1",
                params![loan_id],
                |row| {
                    Ok(RiskFeature {
                        loan_id: row.get(0)?,
                        utilization_risk: RiskClass::parse(&row.get::<_, String>(1)?)
                            .unwrap_or(RiskClass::Unknown),
                        emi_to_income_ratio: row.get(2)?,
                        income_risk: RiskClass::parse(&row.get::<_, String>(3)?)
                            .unwrap_or(RiskClass::Unknown),
                        combined_risk_score: row.get(4)?,
                        risk_grade: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn risk_feature_count(&self) -> CoreResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM risk_features", [], |row| row.get(0))?;
        Ok(n)
    }
}

//! Local vs. central reconciliation of money-bearing tables

use std::sync::Arc;

use chrono::NaiveDate;

use crate::backend::Backend;
use crate::models::{FinancialIntegrityReport, IntegrityCheck, MoneyTable};
use crate::services::DatabaseService;
use crate::Result;

#[derive(Clone)]
pub struct IntegrityChecker {
    db: DatabaseService,
    backend: Arc<dyn Backend>,
    terminal_id: String,
    tolerance_minor: i64,
}

impl IntegrityChecker {
    pub fn new(
        db: DatabaseService,
        backend: Arc<dyn Backend>,
        terminal_id: impl Into<String>,
        tolerance_minor: i64,
    ) -> Self {
        Self {
            db,
            backend,
            terminal_id: terminal_id.into(),
            tolerance_minor: tolerance_minor.max(0),
        }
    }

    /// Compare every money-bearing table for `business_date`; read-only
    pub async fn check(&self, business_date: NaiveDate) -> Result<IntegrityCheck> {
        let mut reports = Vec::with_capacity(MoneyTable::ALL.len());
        for table in MoneyTable::ALL {
            let (local_count, local_total) = self.db.local_totals(table, business_date).await?;
            let remote = self
                .backend
                .remote_totals(&self.terminal_id, table, business_date)
                .await?;
            reports.push(FinancialIntegrityReport::new(
                table,
                local_count,
                local_total,
                remote.count,
                remote.total_minor,
            ));
        }

        let check = IntegrityCheck::new(business_date, reports, self.tolerance_minor);
        if check.valid {
            tracing::info!("Integrity check for {business_date} passed");
        } else {
            for report in check.discrepancies() {
                tracing::warn!("Integrity discrepancy on {business_date}: {report}");
            }
        }
        Ok(check)
    }
}

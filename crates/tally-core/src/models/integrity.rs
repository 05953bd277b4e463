//! Financial integrity report model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ledger::{format_minor, MoneyTable};

/// Local vs. remote reconciliation of one money-bearing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialIntegrityReport {
    pub table: MoneyTable,
    pub local_count: u64,
    pub remote_count: u64,
    /// `local_count - remote_count`
    pub count_diff: i64,
    /// Local total in minor units
    pub local_total: i64,
    /// Remote total in minor units
    pub remote_total: i64,
    /// `local_total - remote_total` in minor units
    pub total_diff: i64,
}

impl FinancialIntegrityReport {
    #[allow(clippy::cast_possible_wrap)]
    pub const fn new(
        table: MoneyTable,
        local_count: u64,
        local_total: i64,
        remote_count: u64,
        remote_total: i64,
    ) -> Self {
        Self {
            table,
            local_count,
            remote_count,
            count_diff: local_count as i64 - remote_count as i64,
            local_total,
            remote_total,
            total_diff: local_total - remote_total,
        }
    }

    /// Whether this row reconciles within `tolerance_minor`
    pub const fn is_consistent(&self, tolerance_minor: i64) -> bool {
        self.count_diff == 0 && self.total_diff.abs() <= tolerance_minor
    }
}

impl fmt::Display for FinancialIntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: count local {} / remote {} (diff {:+}), total local {} / remote {} (diff {})",
            self.table,
            self.local_count,
            self.remote_count,
            self.count_diff,
            format_minor(self.local_total),
            format_minor(self.remote_total),
            format_minor(self.total_diff),
        )
    }
}

/// Outcome of one integrity check over a business date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub business_date: NaiveDate,
    pub reports: Vec<FinancialIntegrityReport>,
    /// Allowed absolute total difference in minor units
    pub tolerance_minor: i64,
    pub valid: bool,
}

impl IntegrityCheck {
    pub fn new(
        business_date: NaiveDate,
        reports: Vec<FinancialIntegrityReport>,
        tolerance_minor: i64,
    ) -> Self {
        let valid = reports
            .iter()
            .all(|report| report.is_consistent(tolerance_minor));
        Self {
            business_date,
            reports,
            tolerance_minor,
            valid,
        }
    }

    /// Rows that do not reconcile
    pub fn discrepancies(&self) -> Vec<&FinancialIntegrityReport> {
        self.reports
            .iter()
            .filter(|report| !report.is_consistent(self.tolerance_minor))
            .collect()
    }
}

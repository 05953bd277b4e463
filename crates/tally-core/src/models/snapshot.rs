//! Day-close snapshot model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// Sales attributed to one staff member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffPerformance {
    pub order_count: u64,
    pub sales_minor: i64,
}

/// Aggregated figures for one terminal, or for several merged terminals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalTotals {
    pub order_count: u64,
    pub completed_orders: u64,
    pub cancelled_orders: u64,
    pub refunded_orders: u64,
    /// Totals of orders that were neither cancelled nor refunded
    pub gross_sales_minor: i64,
    pub refunds_minor: i64,
    /// Amount taken per payment method
    pub payments: BTreeMap<String, i64>,
    pub expenses_minor: i64,
    pub driver_earnings_minor: i64,
    /// Keyed by staff id
    pub staff: BTreeMap<String, StaffPerformance>,
}

impl TerminalTotals {
    /// Add another set of totals into this one
    pub fn absorb(&mut self, other: &Self) {
        self.order_count += other.order_count;
        self.completed_orders += other.completed_orders;
        self.cancelled_orders += other.cancelled_orders;
        self.refunded_orders += other.refunded_orders;
        self.gross_sales_minor += other.gross_sales_minor;
        self.refunds_minor += other.refunds_minor;
        self.expenses_minor += other.expenses_minor;
        self.driver_earnings_minor += other.driver_earnings_minor;
        for (method, amount) in &other.payments {
            *self.payments.entry(method.clone()).or_default() += amount;
        }
        for (staff_id, performance) in &other.staff {
            let entry = self.staff.entry(staff_id.clone()).or_default();
            entry.order_count += performance.order_count;
            entry.sales_minor += performance.sales_minor;
        }
    }

    /// Net takings after refunds and paid-out amounts
    pub const fn net_minor(&self) -> i64 {
        self.gross_sales_minor - self.refunds_minor - self.expenses_minor - self.driver_earnings_minor
    }
}

/// Immutable end-of-day report for one (terminal, business date)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCloseSnapshot {
    /// Terminal that generated (and, when coordinating, aggregated) the report
    pub terminal_id: String,
    pub business_date: NaiveDate,
    /// Generation timestamp (Unix ms)
    pub generated_at: i64,
    /// Sum over every terminal in `terminals`
    pub totals: TerminalTotals,
    /// Per-terminal breakdown, including the generating terminal
    pub terminals: BTreeMap<String, TerminalTotals>,
    /// Subordinate terminals whose snapshot could not be fetched
    #[serde(default)]
    pub missing_terminals: BTreeSet<String>,
}

impl DayCloseSnapshot {
    pub fn new(
        terminal_id: impl Into<String>,
        business_date: NaiveDate,
        own_totals: TerminalTotals,
    ) -> Self {
        let terminal_id = terminal_id.into();
        let mut terminals = BTreeMap::new();
        terminals.insert(terminal_id.clone(), own_totals.clone());
        Self {
            terminal_id,
            business_date,
            generated_at: chrono::Utc::now().timestamp_millis(),
            totals: own_totals,
            terminals,
            missing_terminals: BTreeSet::new(),
        }
    }

    /// Merge another terminal's snapshot for the same date into this one.
    ///
    /// Terminals already present are skipped, so the merge is associative,
    /// commutative and safe to repeat.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if other.business_date != self.business_date {
            return Err(Error::InvalidInput(format!(
                "cannot merge snapshot for {} into snapshot for {}",
                other.business_date, self.business_date
            )));
        }

        for (terminal_id, totals) in &other.terminals {
            if self.terminals.contains_key(terminal_id) {
                continue;
            }
            self.totals.absorb(totals);
            self.terminals.insert(terminal_id.clone(), totals.clone());
        }

        self.missing_terminals
            .extend(other.missing_terminals.iter().cloned());
        let terminals = &self.terminals;
        self.missing_terminals
            .retain(|terminal_id| !terminals.contains_key(terminal_id));
        Ok(())
    }

    /// Record a subordinate that could not contribute
    pub fn mark_missing(&mut self, terminal_id: impl Into<String>) {
        let terminal_id = terminal_id.into();
        if !self.terminals.contains_key(&terminal_id) {
            self.missing_terminals.insert(terminal_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn totals(orders: u64, sales: i64, method: &str, staff: &str) -> TerminalTotals {
        let mut totals = TerminalTotals {
            order_count: orders,
            completed_orders: orders,
            gross_sales_minor: sales,
            ..TerminalTotals::default()
        };
        totals.payments.insert(method.to_string(), sales);
        totals.staff.insert(
            staff.to_string(),
            StaffPerformance {
                order_count: orders,
                sales_minor: sales,
            },
        );
        totals
    }

    fn snapshot(terminal: &str, orders: u64, sales: i64, method: &str) -> DayCloseSnapshot {
        DayCloseSnapshot::new(terminal, date(), totals(orders, sales, method, "staff-1"))
    }

    #[test]
    fn merge_sums_totals_and_keeps_breakdown() {
        let mut main = snapshot("T1", 2, 2000, "cash");
        main.merge(&snapshot("T2", 3, 4500, "card")).unwrap();

        assert_eq!(main.totals.order_count, 5);
        assert_eq!(main.totals.gross_sales_minor, 6500);
        assert_eq!(main.totals.payments.get("cash"), Some(&2000));
        assert_eq!(main.totals.payments.get("card"), Some(&4500));
        assert_eq!(main.totals.staff["staff-1"].order_count, 5);
        assert_eq!(main.terminals.len(), 2);
        assert_eq!(main.terminals["T2"].gross_sales_minor, 4500);
    }

    #[test]
    fn merge_is_order_independent() {
        let children = [
            snapshot("T2", 1, 100, "cash"),
            snapshot("T3", 2, 250, "card"),
            snapshot("T4", 4, 999, "cash"),
        ];

        let mut forward = snapshot("T1", 1, 50, "voucher");
        for child in &children {
            forward.merge(child).unwrap();
        }

        let mut backward = snapshot("T1", 1, 50, "voucher");
        for child in children.iter().rev() {
            backward.merge(child).unwrap();
        }

        assert_eq!(forward.totals, backward.totals);
        assert_eq!(forward.terminals, backward.terminals);
    }

    #[test]
    fn merge_is_associative() {
        let (a, b, c) = (
            snapshot("T1", 1, 10, "cash"),
            snapshot("T2", 2, 20, "card"),
            snapshot("T3", 3, 30, "cash"),
        );

        let mut left = a.clone();
        left.merge(&b).unwrap();
        left.merge(&c).unwrap();

        let mut right_inner = b;
        right_inner.merge(&c).unwrap();
        let mut right = a;
        right.merge(&right_inner).unwrap();

        assert_eq!(left.totals, right.totals);
        assert_eq!(left.terminals, right.terminals);
    }

    #[test]
    fn merging_same_terminal_twice_counts_once() {
        let mut main = snapshot("T1", 1, 100, "cash");
        let child = snapshot("T2", 1, 100, "cash");
        main.merge(&child).unwrap();
        main.merge(&child).unwrap();
        assert_eq!(main.totals.order_count, 2);
    }

    #[test]
    fn merge_rejects_other_dates() {
        let mut main = snapshot("T1", 1, 100, "cash");
        let other = DayCloseSnapshot::new(
            "T2",
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            TerminalTotals::default(),
        );
        assert!(main.merge(&other).is_err());
    }

    #[test]
    fn missing_terminal_cleared_once_it_arrives() {
        let mut main = snapshot("T1", 1, 100, "cash");
        main.mark_missing("T2");
        assert!(main.missing_terminals.contains("T2"));
        main.merge(&snapshot("T2", 1, 100, "cash")).unwrap();
        assert!(main.missing_terminals.is_empty());
    }

    #[test]
    fn net_subtracts_refunds_and_payouts() {
        let totals = TerminalTotals {
            gross_sales_minor: 10_000,
            refunds_minor: 500,
            expenses_minor: 1_200,
            driver_earnings_minor: 800,
            ..TerminalTotals::default()
        };
        assert_eq!(totals.net_minor(), 7_500);
    }
}

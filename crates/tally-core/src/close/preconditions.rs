//! Operational preconditions of a day close

use chrono::NaiveDate;
use serde::Serialize;

use crate::db::PreconditionCounts;
use crate::util::{join_items, pluralize};

/// What still keeps a business date open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreconditionReport {
    pub business_date: NaiveDate,
    pub active_shifts: u64,
    pub transferred_driver_shifts: u64,
    pub open_drawers: u64,
    pub open_orders: u64,
    /// Itemized blockers in check order
    pub blockers: Vec<String>,
}

impl PreconditionReport {
    pub fn new(business_date: NaiveDate, counts: PreconditionCounts) -> Self {
        let checks = [
            (
                counts.active_shifts,
                "active shift remaining",
                "active shifts remaining",
            ),
            (
                counts.transferred_driver_shifts,
                "transferred driver shift still active",
                "transferred driver shifts still active",
            ),
            (counts.open_drawers, "open cash drawer", "open cash drawers"),
            (counts.open_orders, "open order", "open orders"),
        ];
        let blockers = checks
            .into_iter()
            .filter(|(count, _, _)| *count > 0)
            .map(|(count, singular, plural)| pluralize(count, singular, plural))
            .collect();

        Self {
            business_date,
            active_shifts: counts.active_shifts,
            transferred_driver_shifts: counts.transferred_driver_shifts,
            open_drawers: counts.open_drawers,
            open_orders: counts.open_orders,
            blockers,
        }
    }

    pub fn can_close(&self) -> bool {
        self.blockers.is_empty()
    }

    /// Blockers as one sentence fragment
    pub fn message(&self) -> String {
        join_items(&self.blockers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn clear_day_can_close() {
        let report = PreconditionReport::new(date(), PreconditionCounts::default());
        assert!(report.can_close());
        assert_eq!(report.message(), "");
    }

    #[test]
    fn blockers_follow_check_order_with_grammar() {
        let report = PreconditionReport::new(
            date(),
            PreconditionCounts {
                active_shifts: 3,
                transferred_driver_shifts: 1,
                open_drawers: 1,
                open_orders: 2,
            },
        );

        assert!(!report.can_close());
        assert_eq!(
            report.blockers,
            vec![
                "3 active shifts remaining".to_string(),
                "1 transferred driver shift still active".to_string(),
                "1 open cash drawer".to_string(),
                "2 open orders".to_string(),
            ]
        );
        assert_eq!(
            report.message(),
            "3 active shifts remaining, 1 transferred driver shift still active, \
             1 open cash drawer and 2 open orders"
        );
    }

    #[test]
    fn single_blocker_is_reported_alone() {
        let report = PreconditionReport::new(
            date(),
            PreconditionCounts {
                open_orders: 1,
                ..PreconditionCounts::default()
            },
        );
        assert_eq!(report.message(), "1 open order");
    }
}

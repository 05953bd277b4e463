//! Business-day ledger models: orders, money movements, shifts and drawers

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Tables whose rows carry money and must reconcile with the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoneyTable {
    Orders,
    Payments,
    DriverEarnings,
    Expenses,
}

impl MoneyTable {
    /// Every money-bearing table, in reporting order
    pub const ALL: [Self; 4] = [
        Self::Orders,
        Self::Payments,
        Self::DriverEarnings,
        Self::Expenses,
    ];

    /// Local (and queue) table name
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Payments => "order_payments",
            Self::DriverEarnings => "driver_earnings",
            Self::Expenses => "shift_expenses",
        }
    }

    /// Singular and plural nouns used in operator messages
    pub const fn nouns(self) -> (&'static str, &'static str) {
        match self {
            Self::Orders => ("order", "orders"),
            Self::Payments => ("payment", "payments"),
            Self::DriverEarnings => ("driver earning", "driver earnings"),
            Self::Expenses => ("expense", "expenses"),
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.table_name() == name)
    }
}

impl fmt::Display for MoneyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Tables cleared by a day close, children before parents
pub const CLEARED_TABLES: [&str; 6] = [
    "order_payments",
    "driver_earnings",
    "shift_expenses",
    "cash_drawer_sessions",
    "staff_shifts",
    "orders",
];

/// Order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Statuses after which an order no longer changes
    pub const TERMINAL: [Self; 4] = [
        Self::Delivered,
        Self::Completed,
        Self::Cancelled,
        Self::Refunded,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::Completed | Self::Cancelled | Self::Refunded
        )
    }

    /// `'delivered','completed',...` for SQL `IN` clauses
    pub fn terminal_sql_list() -> String {
        Self::TERMINAL
            .iter()
            .map(|status| format!("'{}'", status.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "preparing" => Ok(Self::Preparing),
            "ready" => Ok(Self::Ready),
            "out_for_delivery" => Ok(Self::OutForDelivery),
            "delivered" => Ok(Self::Delivered),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            other => Err(Error::InvalidInput(format!("unknown order status '{other}'"))),
        }
    }
}

/// Staff role on a shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftRole {
    Cashier,
    Driver,
    Server,
    Kitchen,
    Manager,
}

impl ShiftRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cashier => "cashier",
            Self::Driver => "driver",
            Self::Server => "server",
            Self::Kitchen => "kitchen",
            Self::Manager => "manager",
        }
    }
}

impl FromStr for ShiftRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cashier" => Ok(Self::Cashier),
            "driver" => Ok(Self::Driver),
            "server" => Ok(Self::Server),
            "kitchen" => Ok(Self::Kitchen),
            "manager" => Ok(Self::Manager),
            other => Err(Error::InvalidInput(format!("unknown shift role '{other}'"))),
        }
    }
}

fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// A customer order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub business_date: NaiveDate,
    pub status: OrderStatus,
    /// Order total in minor units
    pub amount_minor: i64,
    pub staff_id: String,
    /// Backend identifier, set once the order is synced
    pub remote_id: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Order {
    pub fn new(business_date: NaiveDate, amount_minor: i64, staff_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            business_date,
            status: OrderStatus::Pending,
            amount_minor,
            staff_id: staff_id.into(),
            remote_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A payment taken against an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub business_date: NaiveDate,
    /// Payment method (cash, card, voucher, ...)
    pub method: String,
    pub amount_minor: i64,
    pub remote_id: Option<String>,
    pub created_at: i64,
}

impl Payment {
    pub fn new(
        order: &Order,
        method: impl Into<String>,
        amount_minor: i64,
    ) -> Self {
        Self {
            id: new_record_id(),
            order_id: order.id.clone(),
            business_date: order.business_date,
            method: method.into(),
            amount_minor,
            remote_id: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Earnings owed to a driver for a delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverEarning {
    pub id: String,
    pub shift_id: String,
    pub order_id: Option<String>,
    pub business_date: NaiveDate,
    pub amount_minor: i64,
    pub remote_id: Option<String>,
    pub created_at: i64,
}

impl DriverEarning {
    pub fn new(shift: &StaffShift, order_id: Option<String>, amount_minor: i64) -> Self {
        Self {
            id: new_record_id(),
            shift_id: shift.id.clone(),
            order_id,
            business_date: shift.business_date,
            amount_minor,
            remote_id: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Cash paid out during a shift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub shift_id: String,
    pub business_date: NaiveDate,
    pub description: String,
    pub amount_minor: i64,
    pub remote_id: Option<String>,
    pub created_at: i64,
}

impl Expense {
    pub fn new(shift: &StaffShift, description: impl Into<String>, amount_minor: i64) -> Self {
        Self {
            id: new_record_id(),
            shift_id: shift.id.clone(),
            business_date: shift.business_date,
            description: description.into(),
            amount_minor,
            remote_id: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A staff member's working period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffShift {
    pub id: String,
    pub staff_id: String,
    pub staff_name: String,
    pub role: ShiftRole,
    pub business_date: NaiveDate,
    /// Still checked in
    pub active: bool,
    /// Driver shift handed over from another terminal
    pub transferred: bool,
    pub remote_id: Option<String>,
    /// Check-in timestamp (Unix ms)
    pub check_in_at: i64,
    /// Check-out timestamp (Unix ms)
    pub check_out_at: Option<i64>,
}

impl StaffShift {
    pub fn check_in(
        staff_id: impl Into<String>,
        staff_name: impl Into<String>,
        role: ShiftRole,
        business_date: NaiveDate,
    ) -> Self {
        Self {
            id: new_record_id(),
            staff_id: staff_id.into(),
            staff_name: staff_name.into(),
            role,
            business_date,
            active: true,
            transferred: false,
            remote_id: None,
            check_in_at: chrono::Utc::now().timestamp_millis(),
            check_out_at: None,
        }
    }
}

/// A cash drawer counted in and out by a cashier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawerSession {
    pub id: String,
    pub shift_id: String,
    pub business_date: NaiveDate,
    pub opening_minor: i64,
    pub closing_minor: Option<i64>,
    /// Set when the drawer is counted out (Unix ms)
    pub closed_at: Option<i64>,
    pub remote_id: Option<String>,
    pub created_at: i64,
}

impl DrawerSession {
    pub fn open(shift: &StaffShift, opening_minor: i64) -> Self {
        Self {
            id: new_record_id(),
            shift_id: shift.id.clone(),
            business_date: shift.business_date,
            opening_minor,
            closing_minor: None,
            closed_at: None,
            remote_id: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub const fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Any row of a syncable ledger table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRecord {
    Order(Order),
    Payment(Payment),
    DriverEarning(DriverEarning),
    Expense(Expense),
    Shift(StaffShift),
    Drawer(DrawerSession),
}

impl LedgerRecord {
    pub const fn table_name(&self) -> &'static str {
        match self {
            Self::Order(_) => "orders",
            Self::Payment(_) => "order_payments",
            Self::DriverEarning(_) => "driver_earnings",
            Self::Expense(_) => "shift_expenses",
            Self::Shift(_) => "staff_shifts",
            Self::Drawer(_) => "cash_drawer_sessions",
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            Self::Order(order) => &order.id,
            Self::Payment(payment) => &payment.id,
            Self::DriverEarning(earning) => &earning.id,
            Self::Expense(expense) => &expense.id,
            Self::Shift(shift) => &shift.id,
            Self::Drawer(drawer) => &drawer.id,
        }
    }

    pub const fn business_date(&self) -> NaiveDate {
        match self {
            Self::Order(order) => order.business_date,
            Self::Payment(payment) => payment.business_date,
            Self::DriverEarning(earning) => earning.business_date,
            Self::Expense(expense) => expense.business_date,
            Self::Shift(shift) => shift.business_date,
            Self::Drawer(drawer) => drawer.business_date,
        }
    }

    /// Creation time of the record (Unix ms)
    pub const fn created_at(&self) -> i64 {
        match self {
            Self::Order(order) => order.created_at,
            Self::Payment(payment) => payment.created_at,
            Self::DriverEarning(earning) => earning.created_at,
            Self::Expense(expense) => expense.created_at,
            Self::Shift(shift) => shift.check_in_at,
            Self::Drawer(drawer) => drawer.created_at,
        }
    }

    /// Queue payload for the record
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Order(order) => serde_json::to_value(order),
            Self::Payment(payment) => serde_json::to_value(payment),
            Self::DriverEarning(earning) => serde_json::to_value(earning),
            Self::Expense(expense) => serde_json::to_value(expense),
            Self::Shift(shift) => serde_json::to_value(shift),
            Self::Drawer(drawer) => serde_json::to_value(drawer),
        }
    }
}

/// Convert a decimal currency amount to minor units, rounding to two places.
///
/// `None` for NaN, infinities and amounts outside the `i64` range.
#[allow(clippy::cast_possible_truncation)]
pub fn minor_from_decimal(value: f64) -> Option<i64> {
    // 2^63, the first value past i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    let scaled = (value * 100.0).round();
    (scaled.is_finite() && (-LIMIT..LIMIT).contains(&scaled)).then(|| scaled as i64)
}

/// Render minor units as a two-decimal amount.
///
/// ```
/// use tally_core::models::format_minor;
///
/// assert_eq!(format_minor(1234), "12.34");
/// assert_eq!(format_minor(-50), "-0.50");
/// ```
pub fn format_minor(value: i64) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_terminal() {
        for status in OrderStatus::TERMINAL {
            assert!(status.is_terminal());
        }
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::OutForDelivery.is_terminal());
    }

    #[test]
    fn terminal_sql_list_quotes_every_status() {
        assert_eq!(
            OrderStatus::terminal_sql_list(),
            "'delivered','completed','cancelled','refunded'"
        );
    }

    #[test]
    fn order_status_accepts_american_cancelled() {
        assert_eq!(
            "canceled".parse::<OrderStatus>().unwrap(),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn minor_from_decimal_rounds_float_noise() {
        assert_eq!(minor_from_decimal(0.1 + 0.2), Some(30));
        assert_eq!(minor_from_decimal(19.999), Some(2000));
        assert_eq!(minor_from_decimal(-4.25), Some(-425));
    }

    #[test]
    fn minor_from_decimal_refuses_unrepresentable_amounts() {
        assert_eq!(minor_from_decimal(f64::NAN), None);
        assert_eq!(minor_from_decimal(f64::INFINITY), None);
        assert_eq!(minor_from_decimal(f64::NEG_INFINITY), None);
        assert_eq!(minor_from_decimal(1e300), None);
    }

    #[test]
    fn money_table_lookup_by_name() {
        assert_eq!(
            MoneyTable::from_table_name("order_payments"),
            Some(MoneyTable::Payments)
        );
        assert_eq!(MoneyTable::from_table_name("customers"), None);
    }

    #[test]
    fn drawer_is_open_until_counted_out() {
        let shift = StaffShift::check_in(
            "s-1",
            "Sam",
            ShiftRole::Cashier,
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        );
        let mut drawer = DrawerSession::open(&shift, 10_000);
        assert!(drawer.is_open());
        drawer.closed_at = Some(1);
        assert!(!drawer.is_open());
    }
}

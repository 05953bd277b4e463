//! Business-day ledger repository implementation

use std::collections::BTreeMap;

use chrono::NaiveDate;
use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{
    DrawerSession, LedgerRecord, MoneyTable, Order, OrderStatus, StaffPerformance, StaffShift,
    TerminalTotals, CLEARED_TABLES,
};

/// Records that keep a business date from being closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreconditionCounts {
    pub active_shifts: u64,
    pub transferred_driver_shifts: u64,
    pub open_drawers: u64,
    pub open_orders: u64,
}

/// Finalized financial records without a remote id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnsyncedCounts {
    pub finalized_orders: u64,
    pub payments: u64,
    pub driver_earnings: u64,
    pub expenses: u64,
}

/// Trait for ledger storage operations (async)
#[allow(async_fn_in_trait)]
pub trait LedgerRepository {
    /// Insert a record or overwrite the stored row with the same id
    async fn save(&self, record: &LedgerRecord) -> Result<()>;

    /// Get an order by id
    async fn get_order(&self, id: &str) -> Result<Option<Order>>;

    /// Get a shift by id
    async fn get_shift(&self, id: &str) -> Result<Option<StaffShift>>;

    /// Get a drawer session by id
    async fn get_drawer(&self, id: &str) -> Result<Option<DrawerSession>>;

    /// Stamp the backend identifier on a synced row
    async fn set_remote_id(&self, table_name: &str, record_id: &str, remote_id: &str)
        -> Result<bool>;

    /// Close-blocking records dated on or before `date`
    async fn precondition_counts(&self, date: NaiveDate) -> Result<PreconditionCounts>;

    /// Unsynced financial records dated on or before `date`
    async fn unsynced_counts(&self, date: NaiveDate) -> Result<UnsyncedCounts>;

    /// Row count and amount total of one table for exactly `date`
    async fn local_totals(&self, table: MoneyTable, date: NaiveDate) -> Result<(u64, i64)>;

    /// Aggregated day figures over records dated on or before `date`
    async fn terminal_totals(&self, date: NaiveDate) -> Result<TerminalTotals>;

    /// Rows of a ledger table dated on or before `date`
    async fn count_through(&self, table_name: &str, date: NaiveDate) -> Result<u64>;

    /// Delete every ledger row dated on or before `date`, children first
    async fn clear_through(&self, date: NaiveDate) -> Result<BTreeMap<String, u64>>;
}

/// libSQL implementation of `LedgerRepository`
pub struct LibSqlLedgerRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlLedgerRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_date(value: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|error| Error::Database(format!("bad business date '{value}': {error}")))
    }

    fn parse_order(row: &Row) -> Result<Order> {
        let business_date: String = row.get(1)?;
        let status: String = row.get(2)?;
        Ok(Order {
            id: row.get(0)?,
            business_date: Self::parse_date(&business_date)?,
            status: status.parse()?,
            amount_minor: row.get(3)?,
            staff_id: row.get(4)?,
            remote_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn parse_shift(row: &Row) -> Result<StaffShift> {
        let role: String = row.get(3)?;
        let business_date: String = row.get(4)?;
        Ok(StaffShift {
            id: row.get(0)?,
            staff_id: row.get(1)?,
            staff_name: row.get(2)?,
            role: role.parse()?,
            business_date: Self::parse_date(&business_date)?,
            active: row.get::<i64>(5)? != 0,
            transferred: row.get::<i64>(6)? != 0,
            remote_id: row.get(7)?,
            check_in_at: row.get(8)?,
            check_out_at: row.get(9)?,
        })
    }

    fn parse_drawer(row: &Row) -> Result<DrawerSession> {
        let business_date: String = row.get(2)?;
        Ok(DrawerSession {
            id: row.get(0)?,
            shift_id: row.get(1)?,
            business_date: Self::parse_date(&business_date)?,
            opening_minor: row.get(3)?,
            closing_minor: row.get(4)?,
            closed_at: row.get(5)?,
            remote_id: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    async fn scalar(&self, sql: &str, date: NaiveDate) -> Result<i64> {
        let mut rows = self.conn.query(sql, [date.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?.unwrap_or_default()),
            None => Ok(0),
        }
    }

    async fn count(&self, sql: &str, date: NaiveDate) -> Result<u64> {
        Ok(u64::try_from(self.scalar(sql, date).await?).unwrap_or_default())
    }
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl LedgerRepository for LibSqlLedgerRepository<'_> {
    async fn save(&self, record: &LedgerRecord) -> Result<()> {
        match record {
            LedgerRecord::Order(order) => {
                self.conn
                    .execute(
                        "INSERT INTO orders
                            (id, business_date, status, amount_minor, staff_id, remote_id,
                             created_at, updated_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            business_date = excluded.business_date,
                            status = excluded.status,
                            amount_minor = excluded.amount_minor,
                            staff_id = excluded.staff_id,
                            remote_id = COALESCE(excluded.remote_id, orders.remote_id),
                            updated_at = excluded.updated_at",
                        params![
                            order.id.as_str(),
                            order.business_date.to_string(),
                            order.status.as_str(),
                            order.amount_minor,
                            order.staff_id.as_str(),
                            order.remote_id.clone(),
                            order.created_at,
                            order.updated_at
                        ],
                    )
                    .await?;
            }
            LedgerRecord::Payment(payment) => {
                self.conn
                    .execute(
                        "INSERT INTO order_payments
                            (id, order_id, business_date, method, amount_minor, remote_id, created_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            method = excluded.method,
                            amount_minor = excluded.amount_minor,
                            remote_id = COALESCE(excluded.remote_id, order_payments.remote_id)",
                        params![
                            payment.id.as_str(),
                            payment.order_id.as_str(),
                            payment.business_date.to_string(),
                            payment.method.as_str(),
                            payment.amount_minor,
                            payment.remote_id.clone(),
                            payment.created_at
                        ],
                    )
                    .await?;
            }
            LedgerRecord::DriverEarning(earning) => {
                self.conn
                    .execute(
                        "INSERT INTO driver_earnings
                            (id, shift_id, order_id, business_date, amount_minor, remote_id, created_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            amount_minor = excluded.amount_minor,
                            remote_id = COALESCE(excluded.remote_id, driver_earnings.remote_id)",
                        params![
                            earning.id.as_str(),
                            earning.shift_id.as_str(),
                            earning.order_id.clone(),
                            earning.business_date.to_string(),
                            earning.amount_minor,
                            earning.remote_id.clone(),
                            earning.created_at
                        ],
                    )
                    .await?;
            }
            LedgerRecord::Expense(expense) => {
                self.conn
                    .execute(
                        "INSERT INTO shift_expenses
                            (id, shift_id, business_date, description, amount_minor, remote_id,
                             created_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            description = excluded.description,
                            amount_minor = excluded.amount_minor,
                            remote_id = COALESCE(excluded.remote_id, shift_expenses.remote_id)",
                        params![
                            expense.id.as_str(),
                            expense.shift_id.as_str(),
                            expense.business_date.to_string(),
                            expense.description.as_str(),
                            expense.amount_minor,
                            expense.remote_id.clone(),
                            expense.created_at
                        ],
                    )
                    .await?;
            }
            LedgerRecord::Shift(shift) => {
                self.conn
                    .execute(
                        "INSERT INTO staff_shifts
                            (id, staff_id, staff_name, role, business_date, active, transferred,
                             remote_id, check_in_at, check_out_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            active = excluded.active,
                            transferred = excluded.transferred,
                            remote_id = COALESCE(excluded.remote_id, staff_shifts.remote_id),
                            check_out_at = excluded.check_out_at",
                        params![
                            shift.id.as_str(),
                            shift.staff_id.as_str(),
                            shift.staff_name.as_str(),
                            shift.role.as_str(),
                            shift.business_date.to_string(),
                            i64::from(shift.active),
                            i64::from(shift.transferred),
                            shift.remote_id.clone(),
                            shift.check_in_at,
                            shift.check_out_at
                        ],
                    )
                    .await?;
            }
            LedgerRecord::Drawer(drawer) => {
                self.conn
                    .execute(
                        "INSERT INTO cash_drawer_sessions
                            (id, shift_id, business_date, opening_minor, closing_minor, closed_at,
                             remote_id, created_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            closing_minor = excluded.closing_minor,
                            closed_at = excluded.closed_at,
                            remote_id = COALESCE(excluded.remote_id, cash_drawer_sessions.remote_id)",
                        params![
                            drawer.id.as_str(),
                            drawer.shift_id.as_str(),
                            drawer.business_date.to_string(),
                            drawer.opening_minor,
                            drawer.closing_minor,
                            drawer.closed_at,
                            drawer.remote_id.clone(),
                            drawer.created_at
                        ],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, business_date, status, amount_minor, staff_id, remote_id, created_at,
                        updated_at
                 FROM orders WHERE id = ?",
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_order(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_shift(&self, id: &str) -> Result<Option<StaffShift>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, staff_id, staff_name, role, business_date, active, transferred,
                        remote_id, check_in_at, check_out_at
                 FROM staff_shifts WHERE id = ?",
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_shift(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_drawer(&self, id: &str) -> Result<Option<DrawerSession>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, shift_id, business_date, opening_minor, closing_minor, closed_at,
                        remote_id, created_at
                 FROM cash_drawer_sessions WHERE id = ?",
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_drawer(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_remote_id(
        &self,
        table_name: &str,
        record_id: &str,
        remote_id: &str,
    ) -> Result<bool> {
        // Table names are interpolated, so only ledger tables are accepted
        if !CLEARED_TABLES.contains(&table_name) {
            return Ok(false);
        }
        let sql = format!("UPDATE {table_name} SET remote_id = ? WHERE id = ?");
        let changed = self.conn.execute(&sql, [remote_id, record_id]).await?;
        Ok(changed > 0)
    }

    async fn precondition_counts(&self, date: NaiveDate) -> Result<PreconditionCounts> {
        let active_shifts = self
            .count(
                "SELECT COUNT(*) FROM staff_shifts
                 WHERE business_date <= ? AND active = 1
                   AND NOT (transferred = 1 AND role = 'driver')",
                date,
            )
            .await?;
        let transferred_driver_shifts = self
            .count(
                "SELECT COUNT(*) FROM staff_shifts
                 WHERE business_date <= ? AND active = 1 AND transferred = 1 AND role = 'driver'",
                date,
            )
            .await?;
        let open_drawers = self
            .count(
                "SELECT COUNT(*) FROM cash_drawer_sessions
                 WHERE business_date <= ? AND closed_at IS NULL",
                date,
            )
            .await?;
        let open_orders = self
            .count(
                &format!(
                    "SELECT COUNT(*) FROM orders
                     WHERE business_date <= ? AND status NOT IN ({})",
                    OrderStatus::terminal_sql_list()
                ),
                date,
            )
            .await?;

        Ok(PreconditionCounts {
            active_shifts,
            transferred_driver_shifts,
            open_drawers,
            open_orders,
        })
    }

    async fn unsynced_counts(&self, date: NaiveDate) -> Result<UnsyncedCounts> {
        let finalized_orders = self
            .count(
                &format!(
                    "SELECT COUNT(*) FROM orders
                     WHERE business_date <= ? AND status IN ({})
                       AND (remote_id IS NULL OR remote_id = '')",
                    OrderStatus::terminal_sql_list()
                ),
                date,
            )
            .await?;

        let mut others = [0_u64; 3];
        let tables = [
            MoneyTable::Payments,
            MoneyTable::DriverEarnings,
            MoneyTable::Expenses,
        ];
        for (slot, table) in others.iter_mut().zip(tables) {
            *slot = self
                .count(
                    &format!(
                        "SELECT COUNT(*) FROM {}
                         WHERE business_date <= ? AND (remote_id IS NULL OR remote_id = '')",
                        table.table_name()
                    ),
                    date,
                )
                .await?;
        }

        Ok(UnsyncedCounts {
            finalized_orders,
            payments: others[0],
            driver_earnings: others[1],
            expenses: others[2],
        })
    }

    async fn local_totals(&self, table: MoneyTable, date: NaiveDate) -> Result<(u64, i64)> {
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(amount_minor), 0) FROM {} WHERE business_date = ?",
            table.table_name()
        );
        let mut rows = self.conn.query(&sql, [date.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok((to_count(row.get(0)?), row.get(1)?)),
            None => Ok((0, 0)),
        }
    }

    async fn terminal_totals(&self, date: NaiveDate) -> Result<TerminalTotals> {
        let date_text = date.to_string();
        let mut totals = TerminalTotals::default();

        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status IN ('completed', 'delivered') THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'refunded' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status NOT IN ('cancelled', 'refunded')
                        THEN amount_minor ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'refunded' THEN amount_minor ELSE 0 END), 0)
                 FROM orders WHERE business_date <= ?",
                [date_text.as_str()],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            totals.order_count = to_count(row.get(0)?);
            totals.completed_orders = to_count(row.get(1)?);
            totals.cancelled_orders = to_count(row.get(2)?);
            totals.refunded_orders = to_count(row.get(3)?);
            totals.gross_sales_minor = row.get(4)?;
            totals.refunds_minor = row.get(5)?;
        }
        drop(rows);

        let mut rows = self
            .conn
            .query(
                "SELECT method, SUM(amount_minor) FROM order_payments
                 WHERE business_date <= ? GROUP BY method",
                [date_text.as_str()],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            totals.payments.insert(row.get(0)?, row.get(1)?);
        }
        drop(rows);

        let mut rows = self
            .conn
            .query(
                "SELECT staff_id, COUNT(*), SUM(amount_minor) FROM orders
                 WHERE business_date <= ? AND status NOT IN ('cancelled', 'refunded')
                 GROUP BY staff_id",
                [date_text.as_str()],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            totals.staff.insert(
                row.get(0)?,
                StaffPerformance {
                    order_count: to_count(row.get(1)?),
                    sales_minor: row.get(2)?,
                },
            );
        }
        drop(rows);

        totals.expenses_minor = self
            .scalar(
                "SELECT SUM(amount_minor) FROM shift_expenses WHERE business_date <= ?",
                date,
            )
            .await?;
        totals.driver_earnings_minor = self
            .scalar(
                "SELECT SUM(amount_minor) FROM driver_earnings WHERE business_date <= ?",
                date,
            )
            .await?;

        Ok(totals)
    }

    async fn count_through(&self, table_name: &str, date: NaiveDate) -> Result<u64> {
        if !CLEARED_TABLES.contains(&table_name) {
            return Err(Error::InvalidInput(format!(
                "'{table_name}' is not a ledger table"
            )));
        }
        self.count(
            &format!("SELECT COUNT(*) FROM {table_name} WHERE business_date <= ?"),
            date,
        )
        .await
    }

    async fn clear_through(&self, date: NaiveDate) -> Result<BTreeMap<String, u64>> {
        let date_text = date.to_string();
        let mut deletions = BTreeMap::new();
        for table in CLEARED_TABLES {
            let deleted = self
                .conn
                .execute(
                    &format!("DELETE FROM {table} WHERE business_date <= ?"),
                    [date_text.as_str()],
                )
                .await?;
            deletions.insert(table.to_string(), deleted);
        }
        Ok(deletions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{DriverEarning, Expense, Payment, ShiftRole};
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn order(date: NaiveDate, status: OrderStatus, amount: i64, remote: Option<&str>) -> Order {
        let mut order = Order::new(date, amount, "staff-1");
        order.status = status;
        order.remote_id = remote.map(str::to_string);
        order
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_get_order() {
        let db = setup().await;
        let repo = LibSqlLedgerRepository::new(db.connection());

        let mut saved = order(day(1), OrderStatus::Pending, 1250, None);
        repo.save(&LedgerRecord::Order(saved.clone())).await.unwrap();
        saved.status = OrderStatus::Completed;
        repo.save(&LedgerRecord::Order(saved.clone())).await.unwrap();

        let loaded = repo.get_order(&saved.id).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_keeps_remote_id_when_update_lacks_it() {
        let db = setup().await;
        let repo = LibSqlLedgerRepository::new(db.connection());

        let mut synced = order(day(1), OrderStatus::Completed, 1000, None);
        repo.save(&LedgerRecord::Order(synced.clone())).await.unwrap();
        assert!(repo.set_remote_id("orders", &synced.id, "r-1").await.unwrap());

        synced.amount_minor = 1100;
        repo.save(&LedgerRecord::Order(synced.clone())).await.unwrap();
        let loaded = repo.get_order(&synced.id).await.unwrap().unwrap();
        assert_eq!(loaded.remote_id.as_deref(), Some("r-1"));
        assert_eq!(loaded.amount_minor, 1100);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_remote_id_ignores_unknown_tables() {
        let db = setup().await;
        let repo = LibSqlLedgerRepository::new(db.connection());
        assert!(!repo
            .set_remote_id("settings; DROP TABLE orders", "x", "r")
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_precondition_counts_by_kind() {
        let db = setup().await;
        let repo = LibSqlLedgerRepository::new(db.connection());

        let cashier = StaffShift::check_in("s-1", "Sam", ShiftRole::Cashier, day(1));
        let mut driver = StaffShift::check_in("s-2", "Dee", ShiftRole::Driver, day(1));
        driver.transferred = true;
        let mut gone = StaffShift::check_in("s-3", "Lou", ShiftRole::Server, day(1));
        gone.active = false;
        let later = StaffShift::check_in("s-4", "Max", ShiftRole::Server, day(2));
        for shift in [&cashier, &driver, &gone, &later] {
            repo.save(&LedgerRecord::Shift(shift.clone())).await.unwrap();
        }
        repo.save(&LedgerRecord::Drawer(DrawerSession::open(&cashier, 5_000)))
            .await
            .unwrap();
        repo.save(&LedgerRecord::Order(order(day(1), OrderStatus::Ready, 900, None)))
            .await
            .unwrap();
        repo.save(&LedgerRecord::Order(order(day(1), OrderStatus::Completed, 900, None)))
            .await
            .unwrap();

        assert_eq!(
            repo.precondition_counts(day(1)).await.unwrap(),
            PreconditionCounts {
                active_shifts: 1,
                transferred_driver_shifts: 1,
                open_drawers: 1,
                open_orders: 1,
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unsynced_counts_only_finalized_orders() {
        let db = setup().await;
        let repo = LibSqlLedgerRepository::new(db.connection());

        let completed = order(day(1), OrderStatus::Completed, 1000, None);
        let refunded = order(day(1), OrderStatus::Refunded, 400, Some(""));
        let synced = order(day(1), OrderStatus::Completed, 500, Some("r-1"));
        let open = order(day(1), OrderStatus::Preparing, 700, None);
        for o in [&completed, &refunded, &synced, &open] {
            repo.save(&LedgerRecord::Order(o.clone())).await.unwrap();
        }
        repo.save(&LedgerRecord::Payment(Payment::new(&completed, "cash", 1000)))
            .await
            .unwrap();

        let counts = repo.unsynced_counts(day(1)).await.unwrap();
        assert_eq!(counts.finalized_orders, 2);
        assert_eq!(counts.payments, 1);
        assert_eq!(counts.expenses, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_totals_for_exact_date() {
        let db = setup().await;
        let repo = LibSqlLedgerRepository::new(db.connection());

        for (date, amount) in [(day(1), 1000), (day(1), 250), (day(2), 9999)] {
            repo.save(&LedgerRecord::Order(order(date, OrderStatus::Completed, amount, None)))
                .await
                .unwrap();
        }

        assert_eq!(
            repo.local_totals(MoneyTable::Orders, day(1)).await.unwrap(),
            (2, 1250)
        );
        assert_eq!(
            repo.local_totals(MoneyTable::Expenses, day(1)).await.unwrap(),
            (0, 0)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminal_totals_aggregate_day() {
        let db = setup().await;
        let repo = LibSqlLedgerRepository::new(db.connection());

        let a = order(day(1), OrderStatus::Completed, 2000, None);
        let b = order(day(1), OrderStatus::Cancelled, 800, None);
        let c = order(day(1), OrderStatus::Refunded, 300, None);
        for o in [&a, &b, &c] {
            repo.save(&LedgerRecord::Order(o.clone())).await.unwrap();
        }
        repo.save(&LedgerRecord::Payment(Payment::new(&a, "card", 2000)))
            .await
            .unwrap();
        let shift = StaffShift::check_in("d-1", "Dee", ShiftRole::Driver, day(1));
        repo.save(&LedgerRecord::DriverEarning(DriverEarning::new(
            &shift,
            Some(a.id.clone()),
            150,
        )))
        .await
        .unwrap();
        repo.save(&LedgerRecord::Expense(Expense::new(&shift, "fuel", 500)))
            .await
            .unwrap();

        let totals = repo.terminal_totals(day(1)).await.unwrap();
        assert_eq!(totals.order_count, 3);
        assert_eq!(totals.completed_orders, 1);
        assert_eq!(totals.cancelled_orders, 1);
        assert_eq!(totals.refunded_orders, 1);
        assert_eq!(totals.gross_sales_minor, 2000);
        assert_eq!(totals.refunds_minor, 300);
        assert_eq!(totals.payments.get("card"), Some(&2000));
        assert_eq!(totals.expenses_minor, 500);
        assert_eq!(totals.driver_earnings_minor, 150);
        assert_eq!(totals.staff["staff-1"].order_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_through_leaves_later_dates() {
        let db = setup().await;
        let repo = LibSqlLedgerRepository::new(db.connection());

        for date in [day(1), day(1), day(2), day(3)] {
            repo.save(&LedgerRecord::Order(order(date, OrderStatus::Completed, 100, None)))
                .await
                .unwrap();
        }

        let deletions = repo.clear_through(day(2)).await.unwrap();
        assert_eq!(deletions["orders"], 3);
        assert_eq!(deletions["order_payments"], 0);
        assert_eq!(repo.count_through("orders", day(2)).await.unwrap(), 0);
        assert_eq!(repo.count_through("orders", day(3)).await.unwrap(), 1);
    }
}

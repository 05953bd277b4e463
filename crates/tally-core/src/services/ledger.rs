//! Terminal-side writes to the business-day ledger.
//!
//! Every change is stored and queued for the backend in one transaction.

use chrono::NaiveDate;

use crate::close::ResyncGuard;
use crate::models::{
    DrawerSession, DriverEarning, Expense, LedgerRecord, Order, OrderStatus, Payment, QueueEntry,
    QueueOperation, ShiftRole, StaffShift, CUSTOMER_ENTITY,
};
use crate::services::DatabaseService;
use crate::sync::MutationQueue;
use crate::util::{normalize_text_option, unix_millis_now};
use crate::{Error, Result};

#[derive(Clone)]
pub struct LedgerService {
    db: DatabaseService,
    queue: MutationQueue,
    terminal_id: String,
}

fn require_text(value: impl Into<String>, field: &str) -> Result<String> {
    normalize_text_option(Some(value.into()))
        .ok_or_else(|| Error::InvalidInput(format!("{field} must not be empty")))
}

fn require_amount(amount_minor: i64, field: &str) -> Result<()> {
    if amount_minor < 0 {
        return Err(Error::InvalidInput(format!("{field} must not be negative")));
    }
    Ok(())
}

impl LedgerService {
    pub fn new(db: DatabaseService, queue: MutationQueue, terminal_id: impl Into<String>) -> Self {
        Self {
            db,
            queue,
            terminal_id: terminal_id.into(),
        }
    }

    async fn persist(&self, record: &LedgerRecord, operation: QueueOperation) -> Result<QueueEntry> {
        let entry = self
            .db
            .save_and_enqueue(record, operation, unix_millis_now())
            .await?;
        self.queue.emit_enqueued(&entry);
        Ok(entry)
    }

    async fn order(&self, id: &str) -> Result<Order> {
        self.db
            .get_order(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("order {id}")))
    }

    async fn shift(&self, id: &str) -> Result<StaffShift> {
        self.db
            .get_shift(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("shift {id}")))
    }

    /// Open a new order
    pub async fn record_order(
        &self,
        business_date: NaiveDate,
        amount_minor: i64,
        staff_id: &str,
    ) -> Result<Order> {
        require_amount(amount_minor, "order amount")?;
        let order = Order::new(business_date, amount_minor, require_text(staff_id, "staff id")?);
        self.persist(&LedgerRecord::Order(order.clone()), QueueOperation::Insert)
            .await?;
        Ok(order)
    }

    /// Move an order along its lifecycle; finished orders stay finished
    pub async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<Order> {
        let mut order = self.order(order_id).await?;
        if order.status == status {
            return Ok(order);
        }
        // A fulfilled order may still be refunded
        let refund = matches!(order.status, OrderStatus::Completed | OrderStatus::Delivered)
            && status == OrderStatus::Refunded;
        if order.status.is_terminal() && !refund {
            return Err(Error::InvalidInput(format!(
                "order {order_id} is already {}",
                order.status
            )));
        }

        order.status = status;
        order.updated_at = unix_millis_now();
        self.persist(&LedgerRecord::Order(order.clone()), QueueOperation::Update)
            .await?;
        Ok(order)
    }

    pub async fn record_payment(
        &self,
        order_id: &str,
        method: &str,
        amount_minor: i64,
    ) -> Result<Payment> {
        require_amount(amount_minor, "payment amount")?;
        let order = self.order(order_id).await?;
        let payment = Payment::new(&order, require_text(method, "payment method")?, amount_minor);
        self.persist(&LedgerRecord::Payment(payment.clone()), QueueOperation::Insert)
            .await?;
        Ok(payment)
    }

    pub async fn check_in(
        &self,
        staff_id: &str,
        staff_name: &str,
        role: ShiftRole,
        business_date: NaiveDate,
    ) -> Result<StaffShift> {
        let shift = StaffShift::check_in(
            require_text(staff_id, "staff id")?,
            require_text(staff_name, "staff name")?,
            role,
            business_date,
        );
        self.persist(&LedgerRecord::Shift(shift.clone()), QueueOperation::Insert)
            .await?;
        Ok(shift)
    }

    pub async fn check_out(&self, shift_id: &str) -> Result<StaffShift> {
        let mut shift = self.shift(shift_id).await?;
        if !shift.active {
            return Ok(shift);
        }
        shift.active = false;
        shift.check_out_at = Some(unix_millis_now());
        self.persist(&LedgerRecord::Shift(shift.clone()), QueueOperation::Update)
            .await?;
        Ok(shift)
    }

    /// Flag a driver shift as handed over from another terminal
    pub async fn mark_transferred(&self, shift_id: &str) -> Result<StaffShift> {
        let mut shift = self.shift(shift_id).await?;
        if shift.role != ShiftRole::Driver {
            return Err(Error::InvalidInput(format!(
                "only driver shifts can be transferred, {shift_id} is a {} shift",
                shift.role.as_str()
            )));
        }
        shift.transferred = true;
        self.persist(&LedgerRecord::Shift(shift.clone()), QueueOperation::Update)
            .await?;
        Ok(shift)
    }

    pub async fn open_drawer(&self, shift_id: &str, opening_minor: i64) -> Result<DrawerSession> {
        require_amount(opening_minor, "opening float")?;
        let shift = self.shift(shift_id).await?;
        let drawer = DrawerSession::open(&shift, opening_minor);
        self.persist(&LedgerRecord::Drawer(drawer.clone()), QueueOperation::Insert)
            .await?;
        Ok(drawer)
    }

    /// Count a drawer out
    pub async fn close_drawer(&self, drawer_id: &str, closing_minor: i64) -> Result<DrawerSession> {
        require_amount(closing_minor, "closing count")?;
        let mut drawer = self
            .db
            .get_drawer(drawer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("drawer {drawer_id}")))?;
        if !drawer.is_open() {
            return Err(Error::InvalidInput(format!(
                "drawer {drawer_id} is already closed"
            )));
        }
        drawer.closing_minor = Some(closing_minor);
        drawer.closed_at = Some(unix_millis_now());
        self.persist(&LedgerRecord::Drawer(drawer.clone()), QueueOperation::Update)
            .await?;
        Ok(drawer)
    }

    pub async fn record_expense(
        &self,
        shift_id: &str,
        description: &str,
        amount_minor: i64,
    ) -> Result<Expense> {
        require_amount(amount_minor, "expense amount")?;
        let shift = self.shift(shift_id).await?;
        let expense = Expense::new(
            &shift,
            require_text(description, "expense description")?,
            amount_minor,
        );
        self.persist(&LedgerRecord::Expense(expense.clone()), QueueOperation::Insert)
            .await?;
        Ok(expense)
    }

    pub async fn record_driver_earning(
        &self,
        shift_id: &str,
        order_id: Option<&str>,
        amount_minor: i64,
    ) -> Result<DriverEarning> {
        require_amount(amount_minor, "driver earning")?;
        let shift = self.shift(shift_id).await?;
        if shift.role != ShiftRole::Driver {
            return Err(Error::InvalidInput(format!(
                "shift {shift_id} is not a driver shift"
            )));
        }
        let earning = DriverEarning::new(&shift, order_id.map(str::to_string), amount_minor);
        self.persist(
            &LedgerRecord::DriverEarning(earning.clone()),
            QueueOperation::Insert,
        )
        .await?;
        Ok(earning)
    }

    /// Edit a shared customer record; the write is version-checked on sync
    pub async fn save_customer(&self, id: &str, payload: serde_json::Value) -> Result<QueueEntry> {
        let id = require_text(id, "customer id")?;
        let entry = self
            .db
            .stage_versioned_write(
                CUSTOMER_ENTITY,
                &id,
                payload,
                &self.terminal_id,
                unix_millis_now(),
            )
            .await?;
        self.queue.emit_enqueued(&entry);
        Ok(entry)
    }

    /// Store a record pulled from the backend unless its day was already closed
    ///
    /// Returns whether the record was stored.
    pub async fn import_remote(&self, record: &LedgerRecord) -> Result<bool> {
        let guard = ResyncGuard::load(&self.db).await?;
        if !guard.accepts_record(record.business_date(), record.created_at()) {
            tracing::debug!(
                "Skipping {} {} from closed business date {}",
                record.table_name(),
                record.record_id(),
                record.business_date()
            );
            return Ok(false);
        }
        self.db.save_ledger_record(record).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::db::{LAST_BUSINESS_DATE_KEY, LAST_CLOSE_AT_KEY};
    use crate::models::{MoneyTable, QueueEntryStatus};
    use crate::sync::{BackoffPolicy, ConflictResolver};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    async fn setup() -> (DatabaseService, LedgerService) {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let backend = Arc::new(InMemoryBackend::new("T1"));
        let resolver =
            ConflictResolver::new(db.clone(), backend.clone(), "T1", Duration::from_secs(30));
        let queue = MutationQueue::new(db.clone(), backend, resolver, BackoffPolicy::default(), 50);
        (db.clone(), LedgerService::new(db, queue, "T1"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn order_lifecycle_coalesces_into_one_insert() {
        let (db, ledger) = setup().await;
        let order = ledger.record_order(date(1), 1_500, "staff-1").await.unwrap();
        ledger
            .update_order_status(&order.id, OrderStatus::Preparing)
            .await
            .unwrap();
        ledger
            .update_order_status(&order.id, OrderStatus::Completed)
            .await
            .unwrap();

        let entries = db.queue_entries(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, QueueOperation::Insert);
        assert_eq!(entries[0].payload["status"], "completed");
        assert_eq!(entries[0].status, QueueEntryStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn finished_orders_only_move_to_refunded() {
        let (_db, ledger) = setup().await;
        let order = ledger.record_order(date(1), 800, "staff-1").await.unwrap();
        ledger
            .update_order_status(&order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert!(ledger
            .update_order_status(&order.id, OrderStatus::Completed)
            .await
            .is_err());

        let other = ledger.record_order(date(1), 800, "staff-1").await.unwrap();
        ledger
            .update_order_status(&other.id, OrderStatus::Completed)
            .await
            .unwrap();
        let refunded = ledger
            .update_order_status(&other.id, OrderStatus::Refunded)
            .await
            .unwrap();
        assert_eq!(refunded.status, OrderStatus::Refunded);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn money_rows_inherit_business_date() {
        let (db, ledger) = setup().await;
        let order = ledger.record_order(date(3), 2_000, "staff-1").await.unwrap();
        ledger.record_payment(&order.id, "card", 2_000).await.unwrap();
        let driver = ledger
            .check_in("d-1", "Dee", ShiftRole::Driver, date(3))
            .await
            .unwrap();
        ledger
            .record_driver_earning(&driver.id, Some(&order.id), 300)
            .await
            .unwrap();
        ledger.record_expense(&driver.id, "fuel", 450).await.unwrap();

        assert_eq!(db.local_totals(MoneyTable::Payments, date(3)).await.unwrap(), (1, 2_000));
        assert_eq!(
            db.local_totals(MoneyTable::DriverEarnings, date(3)).await.unwrap(),
            (1, 300)
        );
        assert_eq!(db.local_totals(MoneyTable::Expenses, date(3)).await.unwrap(), (1, 450));
        assert_eq!(db.queue_stats().await.unwrap().total(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_input_is_rejected_before_storage() {
        let (db, ledger) = setup().await;
        assert!(ledger.record_order(date(1), -1, "staff-1").await.is_err());
        assert!(ledger.record_order(date(1), 100, "  ").await.is_err());
        assert!(matches!(
            ledger.record_payment("missing", "cash", 100).await,
            Err(Error::NotFound(_))
        ));

        let cashier = ledger
            .check_in("s-1", "Sam", ShiftRole::Cashier, date(1))
            .await
            .unwrap();
        assert!(ledger.record_driver_earning(&cashier.id, None, 100).await.is_err());
        assert!(ledger.mark_transferred(&cashier.id).await.is_err());
        assert_eq!(db.queue_stats().await.unwrap().total(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drawers_close_once() {
        let (db, ledger) = setup().await;
        let shift = ledger
            .check_in("s-1", "Sam", ShiftRole::Cashier, date(1))
            .await
            .unwrap();
        let drawer = ledger.open_drawer(&shift.id, 10_000).await.unwrap();
        assert_eq!(db.precondition_counts(date(1)).await.unwrap().open_drawers, 1);

        let closed = ledger.close_drawer(&drawer.id, 12_500).await.unwrap();
        assert_eq!(closed.closing_minor, Some(12_500));
        assert!(ledger.close_drawer(&drawer.id, 12_500).await.is_err());
        assert_eq!(db.precondition_counts(date(1)).await.unwrap().open_drawers, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn import_skips_records_of_closed_days() {
        let (db, ledger) = setup().await;
        db.set_setting(LAST_BUSINESS_DATE_KEY, "2025-06-01").await.unwrap();
        db.set_setting(LAST_CLOSE_AT_KEY, "1000").await.unwrap();

        let mut stale = Order::new(date(1), 100, "staff-1");
        stale.remote_id = Some("r-1".to_string());
        let fresh = Order::new(date(2), 100, "staff-1");

        assert!(!ledger.import_remote(&LedgerRecord::Order(stale.clone())).await.unwrap());
        assert!(ledger.import_remote(&LedgerRecord::Order(fresh.clone())).await.unwrap());
        assert!(db.get_order(&stale.id).await.unwrap().is_none());
        assert!(db.get_order(&fresh.id).await.unwrap().is_some());
        assert!(db.queue_is_empty().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn import_keeps_open_day_records_created_before_the_close() {
        let (db, ledger) = setup().await;
        db.set_setting(LAST_BUSINESS_DATE_KEY, "2025-06-01").await.unwrap();
        db.set_setting(LAST_CLOSE_AT_KEY, "1000").await.unwrap();

        let mut early = Order::new(date(2), 100, "staff-1");
        early.created_at = 500;
        early.updated_at = 500;

        assert!(ledger.import_remote(&LedgerRecord::Order(early.clone())).await.unwrap());
        assert!(db.get_order(&early.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn customer_edits_are_versioned_queue_entries() {
        let (db, ledger) = setup().await;
        ledger.save_customer("c-1", json!({"name": "Ada"})).await.unwrap();
        let entry = ledger
            .save_customer("c-1", json!({"name": "Ada L."}))
            .await
            .unwrap();

        assert!(entry.is_versioned());
        assert_eq!(entry.payload, json!({"name": "Ada L."}));
        assert_eq!(db.queue_stats().await.unwrap().total(), 1);
    }
}

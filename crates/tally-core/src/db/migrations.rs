//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &V1_LEDGER_AND_QUEUE).await?;
    }
    if version < 2 {
        apply(conn, 2, &V2_VERSIONED_ENTITIES).await?;
    }
    if version < 3 {
        apply(conn, 3, &V3_DAY_CLOSE_COMMITS).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Version 1: settings, ledger tables and the mutation queue
const V1_LEDGER_AND_QUEUE: [&str; 20] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        id TEXT PRIMARY KEY,
        business_date TEXT NOT NULL,
        status TEXT NOT NULL,
        amount_minor INTEGER NOT NULL,
        staff_id TEXT NOT NULL,
        remote_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_orders_business_date ON orders(business_date)",
    "CREATE TABLE IF NOT EXISTS order_payments (
        id TEXT PRIMARY KEY,
        order_id TEXT NOT NULL,
        business_date TEXT NOT NULL,
        method TEXT NOT NULL,
        amount_minor INTEGER NOT NULL,
        remote_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_order_payments_business_date ON order_payments(business_date)",
    "CREATE TABLE IF NOT EXISTS staff_shifts (
        id TEXT PRIMARY KEY,
        staff_id TEXT NOT NULL,
        staff_name TEXT NOT NULL,
        role TEXT NOT NULL,
        business_date TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        transferred INTEGER NOT NULL DEFAULT 0,
        remote_id TEXT,
        check_in_at INTEGER NOT NULL,
        check_out_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_staff_shifts_business_date ON staff_shifts(business_date)",
    "CREATE TABLE IF NOT EXISTS driver_earnings (
        id TEXT PRIMARY KEY,
        shift_id TEXT NOT NULL,
        order_id TEXT,
        business_date TEXT NOT NULL,
        amount_minor INTEGER NOT NULL,
        remote_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_driver_earnings_business_date ON driver_earnings(business_date)",
    "CREATE TABLE IF NOT EXISTS shift_expenses (
        id TEXT PRIMARY KEY,
        shift_id TEXT NOT NULL,
        business_date TEXT NOT NULL,
        description TEXT NOT NULL,
        amount_minor INTEGER NOT NULL,
        remote_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_shift_expenses_business_date ON shift_expenses(business_date)",
    "CREATE TABLE IF NOT EXISTS cash_drawer_sessions (
        id TEXT PRIMARY KEY,
        shift_id TEXT NOT NULL,
        business_date TEXT NOT NULL,
        opening_minor INTEGER NOT NULL,
        closing_minor INTEGER,
        closed_at INTEGER,
        remote_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_cash_drawer_sessions_business_date ON cash_drawer_sessions(business_date)",
    "CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_name TEXT NOT NULL,
        record_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        payload TEXT NOT NULL,
        base_version INTEGER,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        next_retry_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    // One waiting entry and one in-flight entry per record at most
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_queue_waiting
        ON sync_queue(table_name, record_id) WHERE status != 'in_flight'",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_queue_in_flight
        ON sync_queue(table_name, record_id) WHERE status = 'in_flight'",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_eligible ON sync_queue(status, next_retry_at)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_created ON sync_queue(created_at)",
    "INSERT INTO schema_version (version) VALUES (1)",
];

/// Version 2: version-checked shared entities and the conflict log
const V2_VERSIONED_ENTITIES: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS versioned_entities (
        entity_type TEXT NOT NULL,
        id TEXT NOT NULL,
        version INTEGER NOT NULL,
        payload TEXT NOT NULL,
        updated_by TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        last_synced_at INTEGER,
        PRIMARY KEY (entity_type, id)
    )",
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        local_version INTEGER NOT NULL,
        remote_version INTEGER NOT NULL,
        local_data TEXT NOT NULL,
        remote_data TEXT NOT NULL,
        conflict_type TEXT NOT NULL,
        resolution_strategy TEXT,
        resolved INTEGER NOT NULL DEFAULT 0,
        resolved_at INTEGER,
        resolved_by TEXT,
        terminal_id TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts(entity_type, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved ON sync_conflicts(resolved, created_at DESC)",
    "INSERT INTO schema_version (version) VALUES (2)",
];

/// Version 3: day-close commit markers
const V3_DAY_CLOSE_COMMITS: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS day_close_commits (
        business_date TEXT PRIMARY KEY,
        close_id TEXT NOT NULL,
        snapshot TEXT,
        printed INTEGER NOT NULL DEFAULT 0,
        committed_at INTEGER NOT NULL,
        cleaned_at INTEGER,
        deletions TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_day_close_commits_pending ON day_close_commits(cleaned_at)",
    "INSERT INTO schema_version (version) VALUES (3)",
];

/// Apply one migration's statements atomically
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if version == CURRENT_VERSION {
        tracing::info!("Migrated database to version {CURRENT_VERSION}");
    } else {
        tracing::debug!("Applied migration {version}");
    }
    Ok(())
}

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, SchemaError>;

/// Database schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    // Quotes: one row per emitted quote, layers as JSON arrays
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quotes (
            quote_id TEXT PRIMARY KEY,
            ts REAL NOT NULL,
            symbol_src TEXT NOT NULL,
            symbol_dst TEXT NOT NULL,
            src_bid_px TEXT NOT NULL,
            src_bid_qty TEXT NOT NULL,
            src_ask_px TEXT NOT NULL,
            src_ask_qty TEXT NOT NULL,
            bid_layers TEXT NOT NULL,
            ask_layers TEXT NOT NULL,
            status TEXT NOT NULL,
            spread_bps TEXT NOT NULL,
            expires_at REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_quotes_status ON quotes(symbol_dst, status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_quotes_expires ON quotes(expires_at)")
        .execute(pool)
        .await?;

    // Orders
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_id TEXT PRIMARY KEY,
            quote_id TEXT,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            order_type TEXT NOT NULL,
            price TEXT,
            quantity TEXT NOT NULL,
            filled_qty TEXT NOT NULL DEFAULT '0',
            avg_fill_px TEXT NOT NULL DEFAULT '0',
            state TEXT NOT NULL,
            external_order_id TEXT,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            created_at REAL NOT NULL,
            updated_at REAL NOT NULL,
            FOREIGN KEY (quote_id) REFERENCES quotes(quote_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_state ON orders(state)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_symbol_state ON orders(symbol, state)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_orders_external ON orders(external_order_id) ",
    )
    .execute(pool)
    .await?;

    // Fills: fill_id uniqueness is the dedup guarantee
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fills (
            fill_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            price TEXT NOT NULL,
            quantity TEXT NOT NULL,
            executed_at REAL NOT NULL,
            trade_id TEXT,
            commission TEXT NOT NULL DEFAULT '0',
            commission_asset TEXT,
            is_maker INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (order_id) REFERENCES orders(order_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fills_order ON fills(order_id)")
        .execute(pool)
        .await?;

    // Positions: one row per symbol
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            symbol TEXT PRIMARY KEY,
            quantity TEXT NOT NULL,
            avg_entry_price TEXT NOT NULL,
            realized_pnl TEXT NOT NULL,
            unrealized_pnl TEXT NOT NULL,
            last_update REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Account balances: one row per asset
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS account_balances (
            asset TEXT PRIMARY KEY,
            available TEXT NOT NULL,
            locked TEXT NOT NULL,
            total TEXT NOT NULL,
            updated_at REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Outbox: the only path by which orders reach the venue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            next_retry_at REAL NOT NULL,
            last_error TEXT,
            created_at REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_outbox_status_retry ON outbox(status, next_retry_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_aggregate ON outbox(aggregate_id)")
        .execute(pool)
        .await?;

    // Schema version bookkeeping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get current schema version
pub async fn get_schema_version(pool: &SqlitePool) -> Result<Option<i32>> {
    let row = sqlx::query_as::<_, (i32,)>(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(version,)| version))
}

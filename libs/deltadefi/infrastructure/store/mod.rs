//! Durable state: quotes, orders, fills, positions, balances and the
//! transactional outbox, on SQLite in WAL mode.
//!
//! Writers serialize through SQLite's single-writer transaction model;
//! readers run concurrently. The one invariant this module owns outright:
//! an order insert and its submit event, or a cancel flag and its cancel
//! event, always land in the same transaction.

pub mod schema;

use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{
    Balance, Fill, Order, OrderState, OrderType, OutboxEvent, OutboxEventType, OutboxStatus,
    Position, Quote, QuoteLayer, QuoteStatus, Side,
};

pub use schema::{get_schema_version, initialize_schema, SchemaError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn parse_dec(s: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| StoreError::Corrupt(format!("{}={}: {}", field, s, e)))
}

// =============================================================================
// Row models
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct DbQuote {
    quote_id: String,
    ts: f64,
    symbol_src: String,
    symbol_dst: String,
    src_bid_px: String,
    src_bid_qty: String,
    src_ask_px: String,
    src_ask_qty: String,
    bid_layers: String,
    ask_layers: String,
    status: String,
    spread_bps: String,
    expires_at: f64,
}

impl TryFrom<DbQuote> for Quote {
    type Error = StoreError;

    fn try_from(row: DbQuote) -> Result<Quote> {
        let bid_layers: Vec<QuoteLayer> = serde_json::from_str(&row.bid_layers)?;
        let ask_layers: Vec<QuoteLayer> = serde_json::from_str(&row.ask_layers)?;
        Ok(Quote {
            status: QuoteStatus::parse(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("quote status {}", row.status)))?,
            quote_id: row.quote_id,
            ts: row.ts,
            symbol_src: row.symbol_src,
            symbol_dst: row.symbol_dst,
            src_bid_px: parse_dec(&row.src_bid_px, "src_bid_px")?,
            src_bid_qty: parse_dec(&row.src_bid_qty, "src_bid_qty")?,
            src_ask_px: parse_dec(&row.src_ask_px, "src_ask_px")?,
            src_ask_qty: parse_dec(&row.src_ask_qty, "src_ask_qty")?,
            bid_layers,
            ask_layers,
            spread_bps: parse_dec(&row.spread_bps, "spread_bps")?,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DbOrder {
    order_id: String,
    quote_id: Option<String>,
    symbol: String,
    side: String,
    order_type: String,
    price: Option<String>,
    quantity: String,
    filled_qty: String,
    avg_fill_px: String,
    state: String,
    external_order_id: Option<String>,
    cancel_requested: bool,
    created_at: f64,
    updated_at: f64,
}

impl TryFrom<DbOrder> for Order {
    type Error = StoreError;

    fn try_from(row: DbOrder) -> Result<Order> {
        Ok(Order {
            side: Side::parse(&row.side)
                .ok_or_else(|| StoreError::Corrupt(format!("side {}", row.side)))?,
            order_type: OrderType::parse(&row.order_type)
                .ok_or_else(|| StoreError::Corrupt(format!("order_type {}", row.order_type)))?,
            state: OrderState::parse(&row.state)
                .ok_or_else(|| StoreError::Corrupt(format!("state {}", row.state)))?,
            price: match row.price {
                Some(p) => Some(parse_dec(&p, "price")?),
                None => None,
            },
            quantity: parse_dec(&row.quantity, "quantity")?,
            filled_qty: parse_dec(&row.filled_qty, "filled_qty")?,
            avg_fill_px: parse_dec(&row.avg_fill_px, "avg_fill_px")?,
            order_id: row.order_id,
            quote_id: row.quote_id,
            symbol: row.symbol,
            external_order_id: row.external_order_id,
            cancel_requested: row.cancel_requested,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DbFill {
    fill_id: String,
    order_id: String,
    symbol: String,
    side: String,
    price: String,
    quantity: String,
    executed_at: f64,
    trade_id: Option<String>,
    commission: String,
    commission_asset: Option<String>,
    is_maker: bool,
}

impl TryFrom<DbFill> for Fill {
    type Error = StoreError;

    fn try_from(row: DbFill) -> Result<Fill> {
        Ok(Fill {
            side: Side::parse(&row.side)
                .ok_or_else(|| StoreError::Corrupt(format!("side {}", row.side)))?,
            price: parse_dec(&row.price, "price")?,
            quantity: parse_dec(&row.quantity, "quantity")?,
            commission: parse_dec(&row.commission, "commission")?,
            fill_id: row.fill_id,
            order_id: row.order_id,
            symbol: row.symbol,
            executed_at: row.executed_at,
            trade_id: row.trade_id,
            commission_asset: row.commission_asset,
            is_maker: row.is_maker,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DbOutboxEvent {
    event_id: String,
    event_type: String,
    aggregate_id: String,
    payload: String,
    status: String,
    retry_count: i64,
    next_retry_at: f64,
    last_error: Option<String>,
    created_at: f64,
}

impl TryFrom<DbOutboxEvent> for OutboxEvent {
    type Error = StoreError;

    fn try_from(row: DbOutboxEvent) -> Result<OutboxEvent> {
        Ok(OutboxEvent {
            event_type: OutboxEventType::parse(&row.event_type)
                .ok_or_else(|| StoreError::Corrupt(format!("event_type {}", row.event_type)))?,
            status: OutboxStatus::parse(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("outbox status {}", row.status)))?,
            event_id: row.event_id,
            aggregate_id: row.aggregate_id,
            payload: row.payload,
            retry_count: row.retry_count,
            next_retry_at: row.next_retry_at,
            last_error: row.last_error,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Handle to the engine database
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database and initialize the schema.
    ///
    /// `":memory:"` opens a private in-memory database for tests.
    pub async fn open(path: &str) -> Result<Self> {
        info!("Opening database: {}", path);

        let in_memory = path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        }
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

        // An in-memory database lives and dies with its connection
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        schema::initialize_schema(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    /// Checkpoint the WAL into the main database file
    pub async fn wal_checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    // ==================== QUOTE OPERATIONS ====================

    /// Insert or replace a quote
    pub async fn put_quote(&self, quote: &Quote) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO quotes (
                quote_id, ts, symbol_src, symbol_dst,
                src_bid_px, src_bid_qty, src_ask_px, src_ask_qty,
                bid_layers, ask_layers, status, spread_bps, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&quote.quote_id)
        .bind(quote.ts)
        .bind(&quote.symbol_src)
        .bind(&quote.symbol_dst)
        .bind(quote.src_bid_px.to_string())
        .bind(quote.src_bid_qty.to_string())
        .bind(quote.src_ask_px.to_string())
        .bind(quote.src_ask_qty.to_string())
        .bind(serde_json::to_string(&quote.bid_layers)?)
        .bind(serde_json::to_string(&quote.ask_layers)?)
        .bind(quote.status.as_str())
        .bind(quote.spread_bps.to_string())
        .bind(quote.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_quote(&self, quote_id: &str) -> Result<Option<Quote>> {
        let row = sqlx::query_as::<_, DbQuote>("SELECT * FROM quotes WHERE quote_id = ?")
            .bind(quote_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Quote::try_from).transpose()
    }

    /// Quotes that still have (or may spawn) live orders on the venue
    pub async fn list_active_quotes(&self, symbol_dst: &str) -> Result<Vec<Quote>> {
        let rows = sqlx::query_as::<_, DbQuote>(
            r#"
            SELECT * FROM quotes
            WHERE symbol_dst = ?
              AND status IN ('persisted', 'orders_created', 'orders_submitted')
            ORDER BY ts DESC
            "#,
        )
        .bind(symbol_dst)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Quote::try_from).collect()
    }

    pub async fn update_quote_status(&self, quote_id: &str, status: QuoteStatus) -> Result<()> {
        sqlx::query("UPDATE quotes SET status = ? WHERE quote_id = ?")
            .bind(status.as_str())
            .bind(quote_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cancel every still-active quote for a symbol (shutdown sweep)
    pub async fn cancel_active_quotes(&self, symbol_dst: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE quotes SET status = 'cancelled'
            WHERE symbol_dst = ?
              AND status IN ('persisted', 'orders_created', 'orders_submitted')
            "#,
        )
        .bind(symbol_dst)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Flip active quotes past their TTL to expired; returns how many
    pub async fn expire_stale_quotes(&self, now: f64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE quotes SET status = 'expired'
            WHERE status IN ('persisted', 'orders_created', 'orders_submitted')
              AND expires_at <= ?
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ==================== ORDER OPERATIONS ====================

    /// Insert or replace the full order row
    pub async fn upsert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO orders (
                order_id, quote_id, symbol, side, order_type, price,
                quantity, filled_qty, avg_fill_px, state,
                external_order_id, cancel_requested, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.quote_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.price.map(|p| p.to_string()))
        .bind(order.quantity.to_string())
        .bind(order.filled_qty.to_string())
        .bind(order.avg_fill_px.to_string())
        .bind(order.state.as_str())
        .bind(&order.external_order_id)
        .bind(order.cancel_requested)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, DbOrder>("SELECT * FROM orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Order::try_from).transpose()
    }

    pub async fn get_order_by_external(&self, external_id: &str) -> Result<Option<Order>> {
        let row =
            sqlx::query_as::<_, DbOrder>("SELECT * FROM orders WHERE external_order_id = ?")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Order::try_from).transpose()
    }

    pub async fn set_external_order_id(&self, order_id: &str, external_id: &str) -> Result<()> {
        sqlx::query("UPDATE orders SET external_order_id = ? WHERE order_id = ?")
            .bind(external_id)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Compare-and-set state transition. Returns false when the order was
    /// not in `from` anymore (lost race, late message).
    pub async fn update_order_state(
        &self,
        order_id: &str,
        from: OrderState,
        to: OrderState,
        now: f64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET state = ?, updated_at = ? WHERE order_id = ? AND state = ?",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(order_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list_orders_by_state(
        &self,
        symbol: &str,
        state: OrderState,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, DbOrder>(
            "SELECT * FROM orders WHERE symbol = ? AND state = ? ORDER BY created_at",
        )
        .bind(symbol)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    /// Orders resting (or about to rest) on the venue
    pub async fn list_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, DbOrder>(
            r#"
            SELECT * FROM orders
            WHERE symbol = ? AND state IN ('pending', 'working')
            ORDER BY created_at
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    pub async fn count_open_orders(&self) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM orders WHERE state IN ('idle', 'pending', 'working')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // ==================== TRANSACTIONAL WRITES ====================

    /// Persist a new order together with its submit event, atomically.
    /// This is the only way an order enters the store.
    pub async fn create_order_with_event(
        &self,
        order: &Order,
        event: &OutboxEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, quote_id, symbol, side, order_type, price,
                quantity, filled_qty, avg_fill_px, state,
                external_order_id, cancel_requested, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.quote_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.price.map(|p| p.to_string()))
        .bind(order.quantity.to_string())
        .bind(order.filled_qty.to_string())
        .bind(order.avg_fill_px.to_string())
        .bind(order.state.as_str())
        .bind(&order.external_order_id)
        .bind(order.cancel_requested)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_outbox_event(&mut tx, event).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Flag a working order as cancel-requested and enqueue the cancel
    /// event in the same transaction.
    pub async fn request_cancel_with_event(
        &self,
        order_id: &str,
        event: &OutboxEvent,
        now: f64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE orders SET cancel_requested = 1, updated_at = ? WHERE order_id = ?")
            .bind(now)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        insert_outbox_event(&mut tx, event).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Apply a fill and its bookkeeping consequences atomically:
    /// fill row (idempotent), order row, position row.
    ///
    /// Returns false (writing nothing else) when the fill was a duplicate.
    pub async fn apply_fill_txn(
        &self,
        fill: &Fill,
        order: &Order,
        position: &Position,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO fills (
                fill_id, order_id, symbol, side, price, quantity,
                executed_at, trade_id, commission, commission_asset, is_maker
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fill.fill_id)
        .bind(&fill.order_id)
        .bind(&fill.symbol)
        .bind(fill.side.as_str())
        .bind(fill.price.to_string())
        .bind(fill.quantity.to_string())
        .bind(fill.executed_at)
        .bind(&fill.trade_id)
        .bind(fill.commission.to_string())
        .bind(&fill.commission_asset)
        .bind(fill.is_maker)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Duplicate fill_id: the whole application is a no-op
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE orders SET
                filled_qty = ?, avg_fill_px = ?, state = ?, updated_at = ?
            WHERE order_id = ?
            "#,
        )
        .bind(order.filled_qty.to_string())
        .bind(order.avg_fill_px.to_string())
        .bind(order.state.as_str())
        .bind(order.updated_at)
        .bind(&order.order_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO positions (
                symbol, quantity, avg_entry_price, realized_pnl, unrealized_pnl, last_update
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.symbol)
        .bind(position.quantity.to_string())
        .bind(position.avg_entry_price.to_string())
        .bind(position.realized_pnl.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(position.last_update)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // ==================== FILL QUERIES ====================

    pub async fn list_fills_for_order(&self, order_id: &str) -> Result<Vec<Fill>> {
        let rows = sqlx::query_as::<_, DbFill>(
            "SELECT * FROM fills WHERE order_id = ? ORDER BY executed_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Fill::try_from).collect()
    }

    // ==================== POSITION / BALANCE OPERATIONS ====================

    pub async fn upsert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO positions (
                symbol, quantity, avg_entry_price, realized_pnl, unrealized_pnl, last_update
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.symbol)
        .bind(position.quantity.to_string())
        .bind(position.avg_entry_price.to_string())
        .bind(position.realized_pnl.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(position.last_update)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query_as::<_, (String, String, String, String, String, f64)>(
            r#"
            SELECT symbol, quantity, avg_entry_price, realized_pnl, unrealized_pnl, last_update
            FROM positions WHERE symbol = ?
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(symbol, quantity, avg, realized, unrealized, last_update)| {
            Ok(Position {
                symbol,
                quantity: parse_dec(&quantity, "quantity")?,
                avg_entry_price: parse_dec(&avg, "avg_entry_price")?,
                realized_pnl: parse_dec(&realized, "realized_pnl")?,
                unrealized_pnl: parse_dec(&unrealized, "unrealized_pnl")?,
                last_update,
            })
        })
        .transpose()
    }

    pub async fn upsert_balance(&self, balance: &Balance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO account_balances (
                asset, available, locked, total, updated_at
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&balance.asset)
        .bind(balance.available.to_string())
        .bind(balance.locked.to_string())
        .bind(balance.total().to_string())
        .bind(balance.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_balance(&self, asset: &str) -> Result<Option<Balance>> {
        let row = sqlx::query_as::<_, (String, String, String, f64)>(
            "SELECT asset, available, locked, updated_at FROM account_balances WHERE asset = ?",
        )
        .bind(asset)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(asset, available, locked, updated_at)| {
            Ok(Balance {
                asset,
                available: parse_dec(&available, "available")?,
                locked: parse_dec(&locked, "locked")?,
                updated_at,
            })
        })
        .transpose()
    }

    // ==================== OUTBOX OPERATIONS ====================

    /// Enqueue a standalone outbox event (e.g. the unregistered-order sweep)
    pub async fn enqueue_outbox(&self, event: &OutboxEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_outbox_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Claim up to `limit` dispatchable events, oldest first.
    ///
    /// An event is dispatchable when it is pending, due, the oldest pending
    /// event of its aggregate, and its aggregate has nothing in flight.
    /// Claimed events transition pending -> in_flight.
    pub async fn claim_pending_events(&self, now: f64, limit: i64) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query_as::<_, DbOutboxEvent>(
            r#"
            SELECT event_id, event_type, aggregate_id, payload, status,
                   retry_count, next_retry_at, last_error, created_at
            FROM outbox o
            WHERE o.status = 'pending'
              AND o.next_retry_at <= ?
              AND NOT EXISTS (
                    SELECT 1 FROM outbox f
                    WHERE f.aggregate_id = o.aggregate_id AND f.status = 'in_flight'
              )
              AND NOT EXISTS (
                    SELECT 1 FROM outbox p
                    WHERE p.aggregate_id = o.aggregate_id
                      AND p.status = 'pending'
                      AND p.rowid < o.rowid
              )
            ORDER BY o.rowid
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let result = sqlx::query(
                "UPDATE outbox SET status = 'in_flight' WHERE event_id = ? AND status = 'pending'",
            )
            .bind(&row.event_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                let mut event = OutboxEvent::try_from(row)?;
                event.status = OutboxStatus::InFlight;
                claimed.push(event);
            }
        }

        Ok(claimed)
    }

    pub async fn mark_event_completed(&self, event_id: &str) -> Result<()> {
        sqlx::query("UPDATE outbox SET status = 'completed', last_error = NULL WHERE event_id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Put a transiently-failed event back in the queue with its retry schedule
    pub async fn reschedule_event(
        &self,
        event_id: &str,
        retry_count: i64,
        next_retry_at: f64,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox SET status = 'pending', retry_count = ?, next_retry_at = ?, last_error = ?
            WHERE event_id = ?
            "#,
        )
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(error)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal venue rejection: the event will never be retried
    pub async fn mark_event_failed(&self, event_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE outbox SET status = 'failed', last_error = ? WHERE event_id = ?")
            .bind(error)
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Retries exhausted
    pub async fn mark_event_dead_letter(&self, event_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE outbox SET status = 'dead_letter', last_error = ? WHERE event_id = ?")
            .bind(error)
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// (pending, in_flight) counts for the status report
    pub async fn outbox_depth(&self) -> Result<(i64, i64)> {
        let (pending,) =
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM outbox WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        let (in_flight,) =
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM outbox WHERE status = 'in_flight'")
                .fetch_one(&self.pool)
                .await?;
        Ok((pending, in_flight))
    }
}

async fn insert_outbox_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    event: &OutboxEvent,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox (
            event_id, event_type, aggregate_id, payload, status,
            retry_count, next_retry_at, last_error, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.event_id)
    .bind(event.event_type.as_str())
    .bind(&event.aggregate_id)
    .bind(&event.payload)
    .bind(event.status.as_str())
    .bind(event.retry_count)
    .bind(event.next_retry_at)
    .bind(&event.last_error)
    .bind(event.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn memory_store() -> Store {
        Store::open(":memory:").await.unwrap()
    }

    fn make_order(order_id: &str, state: OrderState) -> Order {
        Order {
            order_id: order_id.to_string(),
            quote_id: None,
            symbol: "ADAUSDM".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(0.4998)),
            quantity: dec!(100),
            filled_qty: Decimal::ZERO,
            avg_fill_px: Decimal::ZERO,
            state,
            external_order_id: None,
            cancel_requested: false,
            created_at: 1000.0,
            updated_at: 1000.0,
        }
    }

    fn make_event(aggregate: &str, created_at: f64) -> OutboxEvent {
        OutboxEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: OutboxEventType::SubmitOrder,
            aggregate_id: aggregate.to_string(),
            payload: "{}".to_string(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: 0.0,
            last_error: None,
            created_at,
        }
    }

    fn make_fill(fill_id: &str, order_id: &str, qty: Decimal) -> Fill {
        Fill {
            fill_id: fill_id.to_string(),
            order_id: order_id.to_string(),
            symbol: "ADAUSDM".to_string(),
            side: Side::Buy,
            price: dec!(0.4998),
            quantity: qty,
            executed_at: 1001.0,
            trade_id: None,
            commission: Decimal::ZERO,
            commission_asset: None,
            is_maker: true,
        }
    }

    #[tokio::test]
    async fn test_order_roundtrip() {
        let store = memory_store().await;
        let order = make_order("o-1", OrderState::Pending);
        store.upsert_order(&order).await.unwrap();

        let loaded = store.get_order("o-1").await.unwrap().unwrap();
        assert_eq!(loaded.order_id, "o-1");
        assert_eq!(loaded.state, OrderState::Pending);
        assert_eq!(loaded.price, Some(dec!(0.4998)));
        assert_eq!(loaded.quantity, dec!(100));
    }

    #[tokio::test]
    async fn test_order_state_cas() {
        let store = memory_store().await;
        store
            .upsert_order(&make_order("o-1", OrderState::Pending))
            .await
            .unwrap();

        // Correct prior state wins
        assert!(store
            .update_order_state("o-1", OrderState::Pending, OrderState::Working, 1001.0)
            .await
            .unwrap());

        // Wrong prior state loses
        assert!(!store
            .update_order_state("o-1", OrderState::Pending, OrderState::Working, 1002.0)
            .await
            .unwrap());

        let loaded = store.get_order("o-1").await.unwrap().unwrap();
        assert_eq!(loaded.state, OrderState::Working);
    }

    #[tokio::test]
    async fn test_create_order_with_event_is_atomic() {
        let store = memory_store().await;
        let order = make_order("o-1", OrderState::Pending);
        let event = make_event("o-1", 1000.0);
        store.create_order_with_event(&order, &event).await.unwrap();

        assert!(store.get_order("o-1").await.unwrap().is_some());
        let claimed = store.claim_pending_events(1000.0, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].aggregate_id, "o-1");

        // Re-inserting the same order must fail and leave no second event
        let dup_event = make_event("o-1", 1001.0);
        assert!(store.create_order_with_event(&order, &dup_event).await.is_err());
        let claimed = store.claim_pending_events(1001.0, 10).await.unwrap();
        assert!(claimed.is_empty(), "duplicate insert leaked an event");
    }

    #[tokio::test]
    async fn test_fill_dedup() {
        let store = memory_store().await;
        let mut order = make_order("o-1", OrderState::Working);
        store.upsert_order(&order).await.unwrap();

        let fill = make_fill("f-1", "o-1", dec!(40));
        order.filled_qty = dec!(40);
        order.avg_fill_px = dec!(0.4998);
        let mut position = Position::flat("ADAUSDM");
        position.quantity = dec!(40);

        assert!(store.apply_fill_txn(&fill, &order, &position).await.unwrap());
        // Same fill_id again is a no-op
        assert!(!store.apply_fill_txn(&fill, &order, &position).await.unwrap());

        let fills = store.list_fills_for_order("o-1").await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, dec!(40));
    }

    #[tokio::test]
    async fn test_outbox_fifo_per_aggregate() {
        let store = memory_store().await;
        store.upsert_order(&make_order("a", OrderState::Pending)).await.unwrap();
        store.upsert_order(&make_order("b", OrderState::Pending)).await.unwrap();

        let a1 = make_event("a", 1.0);
        let a2 = make_event("a", 2.0);
        let b1 = make_event("b", 3.0);
        store.enqueue_outbox(&a1).await.unwrap();
        store.enqueue_outbox(&a2).await.unwrap();
        store.enqueue_outbox(&b1).await.unwrap();

        // First claim: oldest per aggregate only; a2 is held back behind a1
        let claimed = store.claim_pending_events(10.0, 10).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|e| e.event_id.clone()).collect();
        assert_eq!(claimed.len(), 2);
        assert!(ids.contains(&a1.event_id));
        assert!(ids.contains(&b1.event_id));

        // a2 stays blocked while a1 is in flight
        let claimed = store.claim_pending_events(10.0, 10).await.unwrap();
        assert!(claimed.is_empty());

        // Completing a1 releases a2
        store.mark_event_completed(&a1.event_id).await.unwrap();
        let claimed = store.claim_pending_events(10.0, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].event_id, a2.event_id);
    }

    #[tokio::test]
    async fn test_outbox_retry_schedule_respected() {
        let store = memory_store().await;
        store.upsert_order(&make_order("a", OrderState::Pending)).await.unwrap();

        let event = make_event("a", 1.0);
        store.enqueue_outbox(&event).await.unwrap();

        let claimed = store.claim_pending_events(10.0, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Transient failure: back to pending, due at t=20
        store
            .reschedule_event(&event.event_id, 1, 20.0, "timeout")
            .await
            .unwrap();

        // Not due yet
        assert!(store.claim_pending_events(15.0, 10).await.unwrap().is_empty());

        // Due now, retry_count carried forward
        let claimed = store.claim_pending_events(20.0, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].retry_count, 1);
        assert_eq!(claimed[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_position_and_balance_roundtrip() {
        let store = memory_store().await;

        let mut position = Position::flat("ADAUSDM");
        position.quantity = dec!(-25.5);
        position.avg_entry_price = dec!(0.5123);
        position.realized_pnl = dec!(-1.25);
        position.last_update = 123.0;
        store.upsert_position(&position).await.unwrap();

        let loaded = store.get_position("ADAUSDM").await.unwrap().unwrap();
        assert_eq!(loaded.quantity, dec!(-25.5));
        assert_eq!(loaded.avg_entry_price, dec!(0.5123));
        assert_eq!(loaded.realized_pnl, dec!(-1.25));

        let balance = Balance {
            asset: "USDM".to_string(),
            available: dec!(900),
            locked: dec!(100),
            updated_at: 124.0,
        };
        store.upsert_balance(&balance).await.unwrap();

        let loaded = store.get_balance("USDM").await.unwrap().unwrap();
        assert_eq!(loaded.available, dec!(900));
        assert_eq!(loaded.locked, dec!(100));
        assert_eq!(loaded.total(), dec!(1000));

        // Balance updates are last-write-wins
        let newer = Balance {
            available: dec!(950),
            locked: dec!(50),
            updated_at: 125.0,
            ..balance
        };
        store.upsert_balance(&newer).await.unwrap();
        let loaded = store.get_balance("USDM").await.unwrap().unwrap();
        assert_eq!(loaded.available, dec!(950));
    }

    #[tokio::test]
    async fn test_quote_roundtrip_and_expiry() {
        let store = memory_store().await;

        let quote = Quote {
            quote_id: "q-1".to_string(),
            ts: 100.0,
            symbol_src: "ADAUSDT".to_string(),
            symbol_dst: "ADAUSDM".to_string(),
            src_bid_px: dec!(0.4999),
            src_bid_qty: dec!(10),
            src_ask_px: dec!(0.5001),
            src_ask_qty: dec!(12),
            bid_layers: vec![QuoteLayer { price: dec!(0.4998), size: dec!(1000) }],
            ask_layers: vec![QuoteLayer { price: dec!(0.5002), size: dec!(999) }],
            status: QuoteStatus::Persisted,
            spread_bps: dec!(6),
            expires_at: 102.0,
        };
        store.put_quote(&quote).await.unwrap();

        let loaded = store.get_quote("q-1").await.unwrap().unwrap();
        assert_eq!(loaded.bid_layers.len(), 1);
        assert_eq!(loaded.bid_layers[0].price, dec!(0.4998));
        assert_eq!(loaded.status, QuoteStatus::Persisted);

        let active = store.list_active_quotes("ADAUSDM").await.unwrap();
        assert_eq!(active.len(), 1);

        // TTL passes
        let expired = store.expire_stale_quotes(102.0).await.unwrap();
        assert_eq!(expired, 1);
        assert!(store.list_active_quotes("ADAUSDM").await.unwrap().is_empty());

        let loaded = store.get_quote("q-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, QuoteStatus::Expired);
    }

    #[tokio::test]
    async fn test_open_order_listing() {
        let store = memory_store().await;
        store.upsert_order(&make_order("o-1", OrderState::Pending)).await.unwrap();
        store.upsert_order(&make_order("o-2", OrderState::Working)).await.unwrap();
        store.upsert_order(&make_order("o-3", OrderState::Filled)).await.unwrap();
        store.upsert_order(&make_order("o-4", OrderState::Cancelled)).await.unwrap();

        let open = store.list_open_orders("ADAUSDM").await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(store.count_open_orders().await.unwrap(), 2);

        let working = store
            .list_orders_by_state("ADAUSDM", OrderState::Working)
            .await
            .unwrap();
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].order_id, "o-2");
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mm_bot.db");
        let path = path.to_str().unwrap();

        {
            let store = Store::open(path).await.unwrap();
            store
                .upsert_order(&make_order("o-1", OrderState::Working))
                .await
                .unwrap();
            store.wal_checkpoint().await.unwrap();
            store.close().await;
        }

        let store = Store::open(path).await.unwrap();
        let order = store.get_order("o-1").await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Working);
        assert_eq!(order.quantity, dec!(100));
    }

    #[tokio::test]
    async fn test_get_order_by_external() {
        let store = memory_store().await;
        let mut order = make_order("o-1", OrderState::Working);
        order.external_order_id = Some("ext-42".to_string());
        store.upsert_order(&order).await.unwrap();

        let loaded = store.get_order_by_external("ext-42").await.unwrap().unwrap();
        assert_eq!(loaded.order_id, "o-1");
        assert!(store.get_order_by_external("ext-99").await.unwrap().is_none());
    }
}

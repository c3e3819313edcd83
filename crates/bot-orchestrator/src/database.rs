use crate::run_state::{RunState, RunStateStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tradedesk_core::{
    Account, AccountId, AccountStore, PaperAccountSeed, TradeEvent, TradeEventSink,
};

/// `SQLite` store for accounts, the run-state row, and the trade audit trail.
#[derive(Clone)]
pub struct RunDatabase {
    pool: SqlitePool,
}

impl RunDatabase {
    /// Creates a connection pool and runs the embedded migrations.
    ///
    /// # Arguments
    ///
    /// * `database_url` - `SQLite` URL (e.g., `sqlite://tradedesk.db?mode=rwc`)
    /// * `max_connections` - Pool size
    ///
    /// # Errors
    ///
    /// Returns error if connection fails or migrations fail.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open database {database_url}"))?;

        Self::migrate(pool).await
    }

    /// Creates an in-memory database.
    ///
    /// Every `SQLite` memory connection is its own database, so the pool holds
    /// exactly one connection and never recycles it.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// Inserts or updates an account record, keeping its connection markers.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails.
    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r"
            INSERT INTO accounts (
                id, name, broker, server, login, is_active, is_default, is_demo,
                currency, initial_balance, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                broker = excluded.broker,
                server = excluded.server,
                login = excluded.login,
                is_active = excluded.is_active,
                is_default = excluded.is_default,
                is_demo = excluded.is_demo,
                currency = excluded.currency,
                initial_balance = excluded.initial_balance,
                updated_at = excluded.updated_at
            ",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.broker)
        .bind(&account.server)
        .bind(&account.login)
        .bind(account.is_active)
        .bind(account.is_default)
        .bind(account.is_demo)
        .bind(&account.currency)
        .bind(account.initial_balance.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts paper accounts from configuration that do not exist yet.
    ///
    /// Existing rows are left alone so admin edits survive restarts.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails.
    pub async fn seed_paper_accounts(
        &self,
        seeds: &[PaperAccountSeed],
        balance: Decimal,
    ) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let mut inserted = 0;

        for seed in seeds {
            let result = sqlx::query(
                r"
                INSERT INTO accounts (
                    id, name, broker, server, login, is_active, is_default, is_demo,
                    currency, initial_balance, created_at, updated_at
                )
                VALUES (?1, ?2, 'paper', 'paper', ?3, 1, ?4, 1, 'USD', ?5, ?6, ?6)
                ON CONFLICT(id) DO NOTHING
                ",
            )
            .bind(seed.id)
            .bind(&seed.name)
            .bind(&seed.login)
            .bind(seed.is_default)
            .bind(balance.to_string())
            .bind(now)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to seed account {}", seed.id))?;
            inserted += usize::from(result.rows_affected() > 0);
        }

        if inserted > 0 {
            tracing::info!("Seeded {} paper accounts", inserted);
        }
        Ok(inserted)
    }

    /// Most recent audit entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query or deserialization fails.
    pub async fn recent_audit(&self, limit: u32) -> Result<Vec<TradeEvent>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT payload_json FROM trade_audit ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).context("Corrupt audit payload"))
            .collect()
    }

    async fn stamp(&self, column: &str, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        // column is one of two fixed names, never user input
        let sql = format!("UPDATE accounts SET {column} = ?1, updated_at = ?2 WHERE id = ?3");
        sqlx::query(&sql)
            .bind(at.timestamp_millis())
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    let balance: String = row.try_get("initial_balance")?;
    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        broker: row.try_get("broker")?,
        server: row.try_get("server")?,
        login: row.try_get("login")?,
        is_active: row.try_get("is_active")?,
        is_default: row.try_get("is_default")?,
        is_demo: row.try_get("is_demo")?,
        currency: row.try_get("currency")?,
        initial_balance: Decimal::from_str(&balance)
            .with_context(|| format!("Invalid initial balance '{balance}'"))?,
        last_connected_at: from_millis(row.try_get("last_connected_at")?),
        last_disconnected_at: from_millis(row.try_get("last_disconnected_at")?),
    })
}

fn from_millis(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::from_timestamp_millis)
}

const ACCOUNT_COLUMNS: &str = "id, name, broker, server, login, is_active, is_default, is_demo, \
     currency, initial_balance, last_connected_at, last_disconnected_at";

#[async_trait]
impl AccountStore for RunDatabase {
    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn record_connected(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        self.stamp("last_connected_at", id, at).await
    }

    async fn record_disconnected(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        self.stamp("last_disconnected_at", id, at).await
    }
}

#[async_trait]
impl RunStateStore for RunDatabase {
    async fn load(&self) -> Result<Option<RunState>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT state_json FROM run_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(json,)| serde_json::from_str(&json).context("Corrupt run state row"))
            .transpose()
    }

    async fn save(&self, state: &RunState) -> Result<()> {
        let state_json = serde_json::to_string(state)?;

        sqlx::query(
            r"
            INSERT INTO run_state (id, status, state_json, last_heartbeat, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                state_json = excluded.state_json,
                last_heartbeat = excluded.last_heartbeat,
                updated_at = excluded.updated_at
            ",
        )
        .bind(state.status.to_string())
        .bind(state_json)
        .bind(state.heartbeat_at.map(|t| t.timestamp_millis()))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Append-only audit of trade lifecycle events.
#[async_trait]
impl TradeEventSink for RunDatabase {
    async fn publish(&self, event: &TradeEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let ticket = i64::try_from(event.ticket()).context("Ticket exceeds audit column range")?;

        sqlx::query(
            r"
            INSERT INTO trade_audit (event_type, account_id, ticket, symbol, payload_json, occurred_at, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(event.event_type())
        .bind(event.account_id())
        .bind(ticket)
        .bind(event.symbol())
        .bind(payload)
        .bind(event.timestamp().timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

//! PostgreSQL schema for the market tables
//!
//! Money columns are `NUMERIC(20, 4)`; status columns are `SMALLINT` holding
//! the ids of the enums in `models`.

use sqlx::PgPool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS wallets_tb (
        user_id           BIGINT PRIMARY KEY,
        available_balance NUMERIC(20, 4) NOT NULL DEFAULT 0 CHECK (available_balance >= 0),
        frozen_balance    NUMERIC(20, 4) NOT NULL DEFAULT 0 CHECK (frozen_balance >= 0),
        updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries_tb (
        id             BIGSERIAL PRIMARY KEY,
        user_id        BIGINT NOT NULL REFERENCES wallets_tb (user_id),
        change_amount  NUMERIC(20, 4) NOT NULL,
        balance_before NUMERIC(20, 4) NOT NULL,
        balance_after  NUMERIC(20, 4) NOT NULL,
        reason         SMALLINT NOT NULL,
        note           TEXT NOT NULL DEFAULT '',
        created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (balance_after = balance_before + change_amount)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_user ON ledger_entries_tb (user_id, id)",
    r#"
    CREATE TABLE IF NOT EXISTS game_accounts_tb (
        id         BIGSERIAL PRIMARY KEY,
        user_id    BIGINT NOT NULL,
        game_type  VARCHAR(32) NOT NULL,
        login_name VARCHAR(128) NOT NULL,
        password   VARCHAR(128) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sale_listings_tb (
        id                BIGSERIAL PRIMARY KEY,
        seller_id         BIGINT NOT NULL,
        linked_account_id BIGINT NOT NULL REFERENCES game_accounts_tb (id),
        diamond_amount    BIGINT NOT NULL CHECK (diamond_amount > 0),
        unit_price        NUMERIC(20, 4) NOT NULL CHECK (unit_price > 0),
        total_price       NUMERIC(20, 4) NOT NULL,
        status            SMALLINT NOT NULL DEFAULT 1,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sale_listings_status_price ON sale_listings_tb (status, unit_price, id)",
    "CREATE INDEX IF NOT EXISTS idx_sale_listings_seller ON sale_listings_tb (seller_id)",
    r#"
    CREATE TABLE IF NOT EXISTS orders_tb (
        id                      BIGSERIAL PRIMARY KEY,
        order_number            VARCHAR(64) NOT NULL UNIQUE,
        buyer_id                BIGINT NOT NULL,
        seller_id               BIGINT NOT NULL,
        listing_id              BIGINT NOT NULL UNIQUE REFERENCES sale_listings_tb (id),
        buyer_account_id        BIGINT NOT NULL REFERENCES game_accounts_tb (id),
        seller_account_id       BIGINT NOT NULL REFERENCES game_accounts_tb (id),
        diamond_amount          BIGINT NOT NULL,
        unit_price              NUMERIC(20, 4) NOT NULL,
        total_price             NUMERIC(20, 4) NOT NULL,
        external_settlement_ref VARCHAR(64),
        status                  SMALLINT NOT NULL DEFAULT 0,
        created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_orders_buyer ON orders_tb (buyer_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_seller ON orders_tb (seller_id)",
    r#"
    CREATE TABLE IF NOT EXISTS recycling_tasks_tb (
        id                       BIGSERIAL PRIMARY KEY,
        buyer_id                 BIGINT NOT NULL,
        linked_account_id        BIGINT NOT NULL REFERENCES game_accounts_tb (id),
        requested_diamond_amount BIGINT NOT NULL CHECK (requested_diamond_amount > 0),
        fulfilled_diamond_amount BIGINT NOT NULL DEFAULT 0,
        min_unit_price           NUMERIC(20, 4) NOT NULL,
        max_unit_price           NUMERIC(20, 4) NOT NULL,
        status                   SMALLINT NOT NULL DEFAULT 0,
        created_at               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (fulfilled_diamond_amount <= requested_diamond_amount),
        CHECK (min_unit_price <= max_unit_price)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_recycling_tasks_status ON recycling_tasks_tb (status, id)",
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals_tb (
        id           BIGSERIAL PRIMARY KEY,
        order_number VARCHAR(64) NOT NULL UNIQUE,
        user_id      BIGINT NOT NULL REFERENCES wallets_tb (user_id),
        amount       NUMERIC(20, 4) NOT NULL CHECK (amount > 0),
        pay_channel  VARCHAR(32) NOT NULL,
        payee_name   VARCHAR(128) NOT NULL,
        pay_info     VARCHAR(256) NOT NULL,
        remark       TEXT NOT NULL DEFAULT '',
        status       SMALLINT NOT NULL DEFAULT 0,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recharges_tb (
        id           BIGSERIAL PRIMARY KEY,
        order_number VARCHAR(64) NOT NULL UNIQUE,
        user_id      BIGINT NOT NULL REFERENCES wallets_tb (user_id),
        amount       NUMERIC(20, 4) NOT NULL CHECK (amount > 0),
        pay_amount   NUMERIC(20, 5) NOT NULL,
        channel      VARCHAR(16) NOT NULL,
        status       SMALLINT NOT NULL DEFAULT 0,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Create all market tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Market schema ready ({} statements)", SCHEMA.len());
    Ok(())
}

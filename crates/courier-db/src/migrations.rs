use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            phone       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tokens (
            user_id     INTEGER NOT NULL UNIQUE REFERENCES users(id),
            token       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS public_keys (
            user_id     INTEGER NOT NULL UNIQUE REFERENCES users(id),
            public_key  TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS address (
            user_address  TEXT NOT NULL UNIQUE,
            last_used     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_address (
            user_id       INTEGER NOT NULL REFERENCES users(id),
            user_address  TEXT NOT NULL REFERENCES address(user_address),
            PRIMARY KEY (user_id, user_address)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id       INTEGER NOT NULL,
            receiver_id     INTEGER NOT NULL,
            sender_username TEXT NOT NULL,
            body            TEXT NOT NULL,
            received_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

use crate::Database;
use crate::models::{MessageRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    /// Inserts a user and returns the new row id. Uniqueness violations on
    /// username/phone surface as errors; callers pre-check for a friendly
    /// conflict response.
    pub fn create_user(&self, username: &str, phone: &str, password_hash: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, phone, password) VALUES (?1, ?2, ?3)",
                (username, phone, password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", &[&username]))
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", &[&id]))
    }

    pub fn username_by_id(&self, id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    pub fn user_id_by_name(&self, username: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn phone_exists(&self, phone: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let row: Option<i64> = conn
                .query_row("SELECT 1 FROM users WHERE phone = ?1", [phone], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(row.is_some())
        })
    }

    pub fn delete_user(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Tokens --

    pub fn token(&self, user_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT token FROM tokens WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// One canonical token per user; a new token supersedes any prior one.
    pub fn upsert_token(&self, user_id: i64, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tokens (user_id, token) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET token = excluded.token",
                (user_id, token),
            )?;
            Ok(())
        })
    }

    pub fn delete_token(&self, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM tokens WHERE user_id = ?1", [user_id])?;
            Ok(())
        })
    }

    // -- Public keys --

    pub fn public_key(&self, user_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT public_key FROM public_keys WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Write-once: the key registered at first login wins.
    pub fn insert_public_key(&self, user_id: i64, public_key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO public_keys (user_id, public_key) VALUES (?1, ?2)",
                (user_id, public_key),
            )?;
            Ok(())
        })
    }

    pub fn delete_public_key(&self, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM public_keys WHERE user_id = ?1", [user_id])?;
            Ok(())
        })
    }

    // -- Addresses --

    pub fn addresses(&self, user_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_address FROM user_address WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// Upserts into both the address table and the (user_id, user_address)
    /// junction; the composite primary key dedupes repeat logins.
    pub fn insert_user_address(&self, user_id: i64, address: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO address (user_address) VALUES (?1)",
                [address],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO user_address (user_id, user_address) VALUES (?1, ?2)",
                (user_id, address),
            )?;
            Ok(())
        })
    }

    pub fn delete_user_addresses(&self, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM user_address WHERE user_id = ?1", [user_id])?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        sender_username: &str,
        body: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, sender_username, body)
                 VALUES (?1, ?2, ?3, ?4)",
                (sender_id, receiver_id, sender_username, body),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Pending messages for a receiver, in store order (rowid).
    pub fn messages_for(&self, receiver_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, sender_username, body, received_at
                 FROM messages WHERE receiver_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([receiver_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                        sender_username: row.get(3)?,
                        body: row.get(4)?,
                        received_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_messages(&self, message_ids: &[i64]) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "DELETE FROM messages WHERE id IN ({})",
                placeholders.join(", ")
            );

            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            conn.execute(&sql, params.as_slice())?;
            Ok(())
        })
    }

    pub fn delete_user_messages(&self, receiver_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE receiver_id = ?1", [receiver_id])?;
            Ok(())
        })
    }
}

fn query_user(
    conn: &Connection,
    filter: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, phone, password FROM users WHERE {}",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row(params, |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                phone: row.get(2)?,
                password: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

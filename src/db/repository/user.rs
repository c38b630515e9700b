//! Owner records. Authentication lives outside this core; the ledger only
//! needs a stable owner id for medications to reference.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

/// Insert a user, or return the existing record when the username is taken.
pub fn add_user(conn: &Connection, username: &str) -> Result<User, DatabaseError> {
    if username.trim().is_empty() {
        return Err(DatabaseError::ConstraintViolation(
            "username must not be empty".into(),
        ));
    }

    if let Some(existing) = get_user_by_username(conn, username)? {
        return Ok(existing);
    }

    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO users (id, username) VALUES (?1, ?2)",
        params![id.to_string(), username],
    )?;
    Ok(User {
        id,
        username: username.to_string(),
    })
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, username FROM users WHERE id = ?1",
        params![id.to_string()],
        map_user_row,
    );
    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

pub fn get_user_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<User>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, username FROM users WHERE username = ?1",
        params![username],
        map_user_row,
    );
    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row
            .get::<_, String>(0)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        username: row.get(1)?,
    })
}

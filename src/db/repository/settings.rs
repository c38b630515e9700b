//! Process-wide key-value settings. The alarm engine persists its mute
//! state and sound config here as JSON records.

use rusqlite::{params, Connection};

use crate::db::DatabaseError;

/// Get a setting by key. Returns None if not set.
pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
    match stmt.query_row([key], |row| row.get::<_, String>(0)) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// Set a setting (upsert).
pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

/// Delete a setting.
pub fn delete_setting(conn: &Connection, key: &str) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn missing_key_is_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_setting(&conn, "sound_config").unwrap().is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let conn = open_memory_database().unwrap();
        set_setting(&conn, "sound_config", "{\"repetitions\":3}").unwrap();
        assert_eq!(
            get_setting(&conn, "sound_config").unwrap().as_deref(),
            Some("{\"repetitions\":3}")
        );
    }

    #[test]
    fn set_overwrites_existing() {
        let conn = open_memory_database().unwrap();
        set_setting(&conn, "mute_state", "a").unwrap();
        set_setting(&conn, "mute_state", "b").unwrap();
        assert_eq!(
            get_setting(&conn, "mute_state").unwrap().as_deref(),
            Some("b")
        );
    }

    #[test]
    fn delete_removes_key() {
        let conn = open_memory_database().unwrap();
        set_setting(&conn, "mute_state", "a").unwrap();
        delete_setting(&conn, "mute_state").unwrap();
        assert!(get_setting(&conn, "mute_state").unwrap().is_none());
    }
}

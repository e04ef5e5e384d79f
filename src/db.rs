use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// Opens a SQLite connection with the pragmas the persistence layer relies
/// on: WAL for concurrent readers during a writer's transaction, and
/// `synchronous=NORMAL` (safe under WAL, much cheaper than FULL).
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)
        .context("failed to enable foreign_keys")?;
    Ok(conn)
}

pub fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| {
        format!(
            "failed to open sqlite database read-only at {}",
            path.display()
        )
    })?;
    Ok(conn)
}

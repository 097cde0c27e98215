//! Schema versioning through SQLite's `user_version` header field.
//!
//! Each migration runs in its own transaction together with the version bump,
//! so a crash mid-upgrade leaves the previous version intact.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use crate::db::schema;

type Migration = fn(&Connection) -> Result<()>;

/// Entry `n` upgrades the schema from version `n` to `n + 1`.
const MIGRATIONS: &[Migration] = &[schema::create_schema];

pub fn migrate(conn: &mut Connection) -> Result<()> {
    apply(conn, MIGRATIONS)
}

fn apply(conn: &mut Connection, steps: &[Migration]) -> Result<()> {
    let current = schema_version(conn)?;
    let latest = steps.len() as u32;
    if current > latest {
        bail!("database schema version {current} is newer than supported version {latest}");
    }

    for (index, step) in steps.iter().enumerate().skip(current as usize) {
        let target = index as u32 + 1;
        let tx = conn
            .transaction()
            .with_context(|| format!("begin schema migration v{target}"))?;
        step(&tx).with_context(|| format!("apply schema migration v{target}"))?;
        tx.pragma_update(None, "user_version", target)
            .with_context(|| format!("record schema version {target}"))?;
        tx.commit()
            .with_context(|| format!("commit schema migration v{target}"))?;
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))
        .context("read schema version")
}

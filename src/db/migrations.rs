use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use crate::log_info;

const ENABLE_LOGS: bool = true;

/// Schema steps in order; step `n` upgrades `user_version` from `n` to `n + 1`.
const STEPS: &[(&str, &str)] = &[
    ("schema_v1.sql", include_str!("schemas/schema_v1.sql")),
    ("schema_v2.sql", include_str!("schemas/schema_v2.sql")),
];

fn latest_version() -> i32 {
    STEPS.len() as i32
}

fn user_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")
}

/// Brings the focus ledger schema up to date. Each pending step runs in its
/// own transaction together with its `user_version` bump.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found = user_version(conn)?;
    let latest = latest_version();
    if found > latest {
        bail!("focus ledger schema v{found} is newer than this build understands (v{latest})");
    }

    for (index, (name, sql)) in STEPS.iter().enumerate().skip(found.max(0) as usize) {
        let target = index as i32 + 1;
        let tx = conn
            .transaction()
            .with_context(|| format!("failed to begin {name}"))?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply {name}"))?;
        tx.pragma_update(None, "user_version", target)
            .with_context(|| format!("failed to record schema v{target}"))?;
        tx.commit()
            .with_context(|| format!("failed to commit {name}"))?;
        log_info!("Focus ledger schema now at v{}", target);
    }
    Ok(())
}

use rusqlite::Connection;

struct Migration {
    version: u32,
    up_sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up_sql: r#"
            CREATE TABLE IF NOT EXISTS accounting_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                cycle_id TEXT NOT NULL,
                baseline_raw INTEGER NOT NULL,
                last_raw INTEGER NOT NULL,
                carried_bytes INTEGER NOT NULL DEFAULT 0,
                accumulated_bytes INTEGER NOT NULL DEFAULT 0,
                shutdown_requested TEXT,
                last_sample_time TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS notified_thresholds (
                cycle_id TEXT NOT NULL,
                threshold INTEGER NOT NULL,
                PRIMARY KEY (cycle_id, threshold)
            );
            CREATE TABLE IF NOT EXISTS cycle_history (
                cycle_id TEXT PRIMARY KEY,
                used_bytes INTEGER NOT NULL,
                closed_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS delivery_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_id TEXT NOT NULL,
                threshold INTEGER NOT NULL,
                channel TEXT NOT NULL,
                delivered INTEGER NOT NULL,
                attempts INTEGER NOT NULL,
                error TEXT,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_delivery_cycle ON delivery_log(cycle_id);
        "#,
}];

pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);")?;

    let current_version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!("Running migration v{}", migration.version);
            conn.execute_batch(migration.up_sql)?;
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

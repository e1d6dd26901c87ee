use anyhow::Result;
use rusqlite::Connection;

/// Idempotent schema setup. Collections are JSON columns: the record is the
/// unit of concurrency control, so there is nothing to join on.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS incidents (
            incident_id TEXT PRIMARY KEY,
            user_demand TEXT NOT NULL,
            status TEXT NOT NULL,
            kb_reference TEXT,
            collected_information TEXT NOT NULL DEFAULT '[]',
            admin_messages TEXT NOT NULL DEFAULT '[]',
            created_on TEXT NOT NULL,
            updated_on TEXT NOT NULL,
            revision INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status);
        CREATE INDEX IF NOT EXISTS idx_incidents_updated_on ON incidents(updated_on);
        "#,
    )?;
    Ok(())
}

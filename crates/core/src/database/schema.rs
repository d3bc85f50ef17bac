use rusqlite::Connection;

/// 创建所有表（幂等）
pub fn create_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            api_key TEXT NOT NULL UNIQUE,
            tier INTEGER NOT NULL DEFAULT 0,
            balance INTEGER NOT NULL DEFAULT 0,
            banned INTEGER NOT NULL DEFAULT 0,
            bound_ip TEXT,
            last_refill INTEGER NOT NULL DEFAULT 0,
            premium_expiry INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS provider_credentials (
            name TEXT PRIMARY KEY,
            provider_name TEXT NOT NULL,
            api_key TEXT NOT NULL,
            base_url TEXT NOT NULL,
            premium_only INTEGER NOT NULL DEFAULT 0,
            disabled INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS credential_models (
            credential_name TEXT NOT NULL
                REFERENCES provider_credentials(name) ON DELETE CASCADE,
            canonical_model_id TEXT NOT NULL,
            api_name TEXT NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            last_failure_ts REAL NOT NULL DEFAULT 0,
            avg_latency REAL NOT NULL DEFAULT 0,
            supports_vision INTEGER NOT NULL DEFAULT 0,
            supports_tools INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (credential_name, canonical_model_id)
        );

        CREATE INDEX IF NOT EXISTS idx_credential_models_model
            ON credential_models(canonical_model_id);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }
}

//! 数据库模块
//!
//! SQLite 连接、建表与 DAO。

pub mod dao;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type DbConnection = Arc<Mutex<Connection>>;

/// 打开数据库并建表，`:memory:` 打开内存数据库
pub fn init_database(path: &str) -> Result<DbConnection, String> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory().map_err(|e| e.to_string())?
    } else {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("创建数据库目录失败: {e}"))?;
        }
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;
        conn
    };

    conn.busy_timeout(Duration::from_secs(5))
        .map_err(|e| e.to_string())?;
    schema::create_tables(&conn).map_err(|e| e.to_string())?;
    tracing::info!("[DB] 数据库已就绪: {}", path);
    Ok(Arc::new(Mutex::new(conn)))
}

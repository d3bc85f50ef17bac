//! 上游凭证 DAO
//!
//! 提供凭证及其按模型统计的数据库操作。计数器只做原子自增。

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::credential::{CredentialModel, CredentialUpdate, ProviderCredential};

fn row_to_credential(row: &Row<'_>) -> rusqlite::Result<ProviderCredential> {
    Ok(ProviderCredential {
        name: row.get(0)?,
        provider_name: row.get(1)?,
        api_key: row.get(2)?,
        base_url: row.get(3)?,
        premium_only: row.get::<_, i32>(4)? != 0,
        disabled: row.get::<_, i32>(5)? != 0,
        models: Vec::new(),
    })
}

fn row_to_model(row: &Row<'_>) -> rusqlite::Result<CredentialModel> {
    Ok(CredentialModel {
        canonical_model_id: row.get(0)?,
        api_name: row.get(1)?,
        usage_count: row.get::<_, i64>(2)?.max(0) as u64,
        failure_count: row.get::<_, i64>(3)?.max(0) as u64,
        last_failure_ts: row.get(4)?,
        avg_latency: row.get(5)?,
        supports_vision: row.get::<_, i32>(6)? != 0,
        supports_tools: row.get::<_, i32>(7)? != 0,
    })
}

pub struct ProviderDao;

impl ProviderDao {
    // ========================================================================
    // 凭证
    // ========================================================================

    /// 新增或更新凭证，保留已有的统计计数和下线状态
    pub fn upsert(conn: &Connection, credential: &ProviderCredential, now: i64) -> Result<(), String> {
        let tx = conn.unchecked_transaction().map_err(|e| e.to_string())?;

        tx.execute(
            "INSERT INTO provider_credentials (name, provider_name, api_key, base_url, premium_only, disabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(name) DO UPDATE SET
                provider_name = excluded.provider_name,
                api_key = excluded.api_key,
                base_url = excluded.base_url,
                premium_only = excluded.premium_only",
            params![
                credential.name,
                credential.provider_name,
                credential.api_key,
                credential.base_url,
                credential.premium_only as i32,
                credential.disabled as i32,
                now,
            ],
        )
        .map_err(|e| e.to_string())?;

        for model in &credential.models {
            tx.execute(
                "INSERT INTO credential_models (
                    credential_name, canonical_model_id, api_name, supports_vision, supports_tools
                 ) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(credential_name, canonical_model_id) DO UPDATE SET
                    api_name = excluded.api_name,
                    supports_vision = excluded.supports_vision,
                    supports_tools = excluded.supports_tools",
                params![
                    credential.name,
                    model.canonical_model_id,
                    model.api_name,
                    model.supports_vision as i32,
                    model.supports_tools as i32,
                ],
            )
            .map_err(|e| e.to_string())?;
        }

        // 移除不再声明的模型
        let existing = Self::model_ids(&tx, &credential.name)?;
        for model_id in existing {
            if !credential.serves(&model_id) {
                tx.execute(
                    "DELETE FROM credential_models WHERE credential_name = ?1 AND canonical_model_id = ?2",
                    params![credential.name, model_id],
                )
                .map_err(|e| e.to_string())?;
            }
        }

        tx.commit().map_err(|e| e.to_string())
    }

    fn model_ids(conn: &Connection, name: &str) -> Result<Vec<String>, String> {
        let mut stmt = conn
            .prepare("SELECT canonical_model_id FROM credential_models WHERE credential_name = ?1")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![name], |row| row.get(0))
            .map_err(|e| e.to_string())?;
        rows.collect::<Result<Vec<String>, _>>()
            .map_err(|e| e.to_string())
    }

    fn load_models(conn: &Connection, name: &str) -> Result<Vec<CredentialModel>, String> {
        let mut stmt = conn
            .prepare(
                "SELECT canonical_model_id, api_name, usage_count, failure_count,
                        last_failure_ts, avg_latency, supports_vision, supports_tools
                 FROM credential_models
                 WHERE credential_name = ?1
                 ORDER BY rowid",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![name], row_to_model)
            .map_err(|e| e.to_string())?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
    }

    pub fn get(conn: &Connection, name: &str) -> Result<Option<ProviderCredential>, String> {
        let credential = conn
            .query_row(
                "SELECT name, provider_name, api_key, base_url, premium_only, disabled
                 FROM provider_credentials WHERE name = ?1",
                params![name],
                row_to_credential,
            )
            .optional()
            .map_err(|e| e.to_string())?;

        match credential {
            Some(mut credential) => {
                credential.models = Self::load_models(conn, name)?;
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    /// 列出所有凭证（含已下线）
    pub fn list(conn: &Connection) -> Result<Vec<ProviderCredential>, String> {
        let mut stmt = conn
            .prepare(
                "SELECT name, provider_name, api_key, base_url, premium_only, disabled
                 FROM provider_credentials ORDER BY created_at, name",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], row_to_credential)
            .map_err(|e| e.to_string())?;
        let mut credentials = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        for credential in &mut credentials {
            credential.models = Self::load_models(conn, &credential.name)?;
        }
        Ok(credentials)
    }

    /// 查找声明了指定模型的凭证（含已下线，由调用方过滤）
    pub fn find_by_model(conn: &Connection, model_id: &str) -> Result<Vec<ProviderCredential>, String> {
        let mut stmt = conn
            .prepare(
                "SELECT c.name, c.provider_name, c.api_key, c.base_url, c.premium_only, c.disabled
                 FROM provider_credentials c
                 JOIN credential_models m ON m.credential_name = c.name
                 WHERE m.canonical_model_id = ?1
                 ORDER BY c.created_at, c.name",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![model_id], row_to_credential)
            .map_err(|e| e.to_string())?;
        let mut credentials = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        for credential in &mut credentials {
            credential.models = Self::load_models(conn, &credential.name)?;
        }
        Ok(credentials)
    }

    pub fn update(conn: &Connection, name: &str, update: &CredentialUpdate) -> Result<bool, String> {
        let mut sets = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(disabled) = update.disabled {
            sets.push("disabled = ?");
            values.push(Box::new(disabled as i32));
        }
        if let Some(premium_only) = update.premium_only {
            sets.push("premium_only = ?");
            values.push(Box::new(premium_only as i32));
        }
        if let Some(api_key) = &update.api_key {
            sets.push("api_key = ?");
            values.push(Box::new(api_key.clone()));
        }
        if let Some(base_url) = &update.base_url {
            sets.push("base_url = ?");
            values.push(Box::new(base_url.clone()));
        }
        if sets.is_empty() {
            return Ok(Self::get(conn, name)?.is_some());
        }
        values.push(Box::new(name.to_string()));

        let sql = format!(
            "UPDATE provider_credentials SET {} WHERE name = ?",
            sets.join(", ")
        );
        let updated = conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(|e| e.to_string())?;
        Ok(updated > 0)
    }

    // ========================================================================
    // 按模型统计
    // ========================================================================

    /// 成功：使用次数 +1，延迟平滑（首个样本直接采用，之后与旧值取平均）
    pub fn record_success(
        conn: &Connection,
        name: &str,
        model_id: &str,
        latency_sample: f64,
    ) -> Result<bool, String> {
        let updated = conn
            .execute(
                "UPDATE credential_models SET
                    usage_count = usage_count + 1,
                    avg_latency = CASE WHEN avg_latency = 0 THEN ?1 ELSE (avg_latency + ?1) / 2.0 END
                 WHERE credential_name = ?2 AND canonical_model_id = ?3",
                params![latency_sample, name, model_id],
            )
            .map_err(|e| e.to_string())?;
        Ok(updated > 0)
    }

    /// 失败：失败次数 +1，记录失败时间
    pub fn record_failure(
        conn: &Connection,
        name: &str,
        model_id: &str,
        failed_at: f64,
    ) -> Result<bool, String> {
        let updated = conn
            .execute(
                "UPDATE credential_models SET
                    failure_count = failure_count + 1,
                    last_failure_ts = ?1
                 WHERE credential_name = ?2 AND canonical_model_id = ?3",
                params![failed_at, name, model_id],
            )
            .map_err(|e| e.to_string())?;
        Ok(updated > 0)
    }

    /// 清零统计（管理操作）
    pub fn reset_stats(conn: &Connection, name: &str) -> Result<usize, String> {
        conn.execute(
            "UPDATE credential_models SET
                usage_count = 0, failure_count = 0, last_failure_ts = 0, avg_latency = 0
             WHERE credential_name = ?1",
            params![name],
        )
        .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::create_tables;

    fn credential(name: &str, models: &[&str]) -> ProviderCredential {
        ProviderCredential {
            name: name.to_string(),
            provider_name: "openai".to_string(),
            api_key: format!("sk-{name}"),
            base_url: "https://api.openai.com/v1".to_string(),
            premium_only: false,
            disabled: false,
            models: models
                .iter()
                .map(|m| CredentialModel::new(*m, *m))
                .collect(),
        }
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    #[test]
    fn test_upsert_and_find_by_model() {
        let conn = setup();
        ProviderDao::upsert(&conn, &credential("a", &["gpt-4o", "gpt-4"]), 1).unwrap();
        ProviderDao::upsert(&conn, &credential("b", &["gpt-4o"]), 2).unwrap();

        let found = ProviderDao::find_by_model(&conn, "gpt-4o").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "a");
        assert_eq!(found[0].models.len(), 2);

        let found = ProviderDao::find_by_model(&conn, "gpt-4").unwrap();
        assert_eq!(found.len(), 1);
        assert!(ProviderDao::find_by_model(&conn, "dall-e-3").unwrap().is_empty());
    }

    #[test]
    fn test_counters_are_incremental() {
        let conn = setup();
        ProviderDao::upsert(&conn, &credential("a", &["gpt-4o"]), 1).unwrap();

        assert!(ProviderDao::record_success(&conn, "a", "gpt-4o", 100.0).unwrap());
        assert!(ProviderDao::record_success(&conn, "a", "gpt-4o", 200.0).unwrap());
        assert!(ProviderDao::record_failure(&conn, "a", "gpt-4o", 42.5).unwrap());

        let model = ProviderDao::get(&conn, "a").unwrap().unwrap().models[0].clone();
        assert_eq!(model.usage_count, 2);
        assert_eq!(model.failure_count, 1);
        assert_eq!(model.avg_latency, 150.0);
        assert_eq!(model.last_failure_ts, 42.5);

        assert!(!ProviderDao::record_success(&conn, "a", "gpt-4", 1.0).unwrap());
    }

    #[test]
    fn test_upsert_preserves_stats_and_disabled_flag() {
        let conn = setup();
        ProviderDao::upsert(&conn, &credential("a", &["gpt-4o", "gpt-4"]), 1).unwrap();
        ProviderDao::record_success(&conn, "a", "gpt-4o", 80.0).unwrap();
        ProviderDao::update(
            &conn,
            "a",
            &CredentialUpdate {
                disabled: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let mut changed = credential("a", &["gpt-4o"]);
        changed.api_key = "sk-rotated".to_string();
        ProviderDao::upsert(&conn, &changed, 5).unwrap();

        let loaded = ProviderDao::get(&conn, "a").unwrap().unwrap();
        assert!(loaded.disabled);
        assert_eq!(loaded.api_key, "sk-rotated");
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].usage_count, 1);
    }

    #[test]
    fn test_reset_stats() {
        let conn = setup();
        ProviderDao::upsert(&conn, &credential("a", &["gpt-4o"]), 1).unwrap();
        ProviderDao::record_failure(&conn, "a", "gpt-4o", 9.0).unwrap();
        assert_eq!(ProviderDao::reset_stats(&conn, "a").unwrap(), 1);

        let model = ProviderDao::get(&conn, "a").unwrap().unwrap().models[0].clone();
        assert_eq!(model.failure_count, 0);
        assert_eq!(model.last_failure_ts, 0.0);
    }

    #[test]
    fn test_update_missing_credential() {
        let conn = setup();
        let update = CredentialUpdate {
            disabled: Some(true),
            ..Default::default()
        };
        assert!(!ProviderDao::update(&conn, "ghost", &update).unwrap());
        assert!(ProviderDao::list(&conn).unwrap().is_empty());
    }
}

//! 用户账户 DAO
//!
//! 余额只通过 `balance = balance + ?` 原子增减，不做读改写。

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::account::{User, UserUpdate};

const USER_COLUMNS: &str = "id, api_key, tier, balance, banned, bound_ip, last_refill, premium_expiry, created_at";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        api_key: row.get(1)?,
        tier: row.get::<_, i64>(2)?.clamp(0, i64::from(u8::MAX)) as u8,
        balance: row.get(3)?,
        banned: row.get::<_, i32>(4)? != 0,
        bound_ip: row.get(5)?,
        last_refill: row.get(6)?,
        premium_expiry: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub struct UserDao;

impl UserDao {
    pub fn insert(conn: &Connection, user: &User) -> Result<(), String> {
        conn.execute(
            "INSERT INTO users (id, api_key, tier, balance, banned, bound_ip, last_refill, premium_expiry, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id,
                user.api_key,
                i64::from(user.tier),
                user.balance,
                user.banned as i32,
                user.bound_ip,
                user.last_refill,
                user.premium_expiry,
                user.created_at,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn get_by_key(conn: &Connection, api_key: &str) -> Result<Option<User>, String> {
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE api_key = ?1"),
            params![api_key],
            row_to_user,
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    pub fn list(conn: &Connection) -> Result<Vec<User>, String> {
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at"))
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], row_to_user)
            .map_err(|e| e.to_string())?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
    }

    /// 部分更新，返回是否命中
    pub fn update(conn: &Connection, api_key: &str, update: &UserUpdate) -> Result<bool, String> {
        if update.is_empty() {
            return Ok(Self::get_by_key(conn, api_key)?.is_some());
        }

        let mut sets = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(tier) = update.tier {
            sets.push("tier = ?");
            values.push(Box::new(i64::from(tier)));
        }
        if let Some(banned) = update.banned {
            sets.push("banned = ?");
            values.push(Box::new(banned as i32));
        }
        if let Some(bound_ip) = &update.bound_ip {
            sets.push("bound_ip = ?");
            values.push(Box::new(bound_ip.clone()));
        }
        if let Some(expiry) = update.premium_expiry {
            sets.push("premium_expiry = ?");
            values.push(Box::new(expiry));
        }
        values.push(Box::new(api_key.to_string()));

        let sql = format!("UPDATE users SET {} WHERE api_key = ?", sets.join(", "));
        let updated = conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(|e| e.to_string())?;
        Ok(updated > 0)
    }

    /// 原子增减余额，返回新余额；用户不存在时返回 None
    pub fn adjust_balance(conn: &Connection, api_key: &str, delta: i64) -> Result<Option<i64>, String> {
        conn.query_row(
            "UPDATE users SET balance = balance + ?1 WHERE api_key = ?2 RETURNING balance",
            params![delta, api_key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    /// 条件补充额度：距上次补充满 `interval` 秒且余额低于阈值
    ///
    /// 单条语句完成判断与更新，返回补充后的余额；条件不满足时返回 None。
    pub fn apply_refill(
        conn: &Connection,
        api_key: &str,
        amount: i64,
        now: i64,
        interval: i64,
        threshold: i64,
    ) -> Result<Option<i64>, String> {
        conn.query_row(
            "UPDATE users SET balance = balance + ?1, last_refill = ?2
             WHERE api_key = ?3 AND ?2 - last_refill >= ?4 AND balance < ?5 AND banned = 0
             RETURNING balance",
            params![amount, now, api_key, interval, threshold],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::create_tables;

    fn setup() -> (Connection, User) {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        let user = User::issue(0, 1_000, 100);
        UserDao::insert(&conn, &user).unwrap();
        (conn, user)
    }

    #[test]
    fn test_insert_and_get() {
        let (conn, user) = setup();
        let loaded = UserDao::get_by_key(&conn, &user.api_key).unwrap().unwrap();
        assert_eq!(loaded, user);
        assert!(UserDao::get_by_key(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (conn, user) = setup();
        let mut clone = User::issue(0, 0, 0);
        clone.api_key = user.api_key.clone();
        assert!(UserDao::insert(&conn, &clone).is_err());
    }

    #[test]
    fn test_adjust_balance() {
        let (conn, user) = setup();
        assert_eq!(UserDao::adjust_balance(&conn, &user.api_key, -300).unwrap(), Some(700));
        assert_eq!(UserDao::adjust_balance(&conn, &user.api_key, -800).unwrap(), Some(-100));
        assert_eq!(UserDao::adjust_balance(&conn, "nope", 5).unwrap(), None);
    }

    #[test]
    fn test_partial_update() {
        let (conn, user) = setup();
        let update = UserUpdate {
            tier: Some(2),
            bound_ip: Some(Some("10.0.0.1".to_string())),
            premium_expiry: Some(Some(5_000)),
            ..Default::default()
        };
        assert!(UserDao::update(&conn, &user.api_key, &update).unwrap());

        let loaded = UserDao::get_by_key(&conn, &user.api_key).unwrap().unwrap();
        assert_eq!(loaded.tier, 2);
        assert_eq!(loaded.bound_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(loaded.premium_expiry, Some(5_000));
        assert!(!loaded.banned);
        assert_eq!(loaded.balance, 1_000);

        assert!(!UserDao::update(&conn, "nope", &update).unwrap());
    }

    #[test]
    fn test_apply_refill_conditions() {
        let (conn, user) = setup();
        let day = 86_400;

        // 间隔未满
        assert_eq!(
            UserDao::apply_refill(&conn, &user.api_key, 22_500, 100 + day - 1, day, 5_000).unwrap(),
            None
        );
        // 间隔已满且余额低于阈值
        assert_eq!(
            UserDao::apply_refill(&conn, &user.api_key, 22_500, 100 + day, day, 5_000).unwrap(),
            Some(23_500)
        );
        // 时间戳已重置
        assert_eq!(
            UserDao::apply_refill(&conn, &user.api_key, 22_500, 100 + day + 10, day, 50_000).unwrap(),
            None
        );
        // 余额高于阈值
        assert_eq!(
            UserDao::apply_refill(&conn, &user.api_key, 22_500, 100 + 3 * day, day, 5_000).unwrap(),
            None
        );
    }

    #[test]
    fn test_list_users() {
        let (conn, _) = setup();
        UserDao::insert(&conn, &User::issue(1, 0, 200)).unwrap();
        assert_eq!(UserDao::list(&conn).unwrap().len(), 2);
    }
}

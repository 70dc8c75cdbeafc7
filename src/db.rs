use once_cell::sync::OnceCell;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, QueryResult, Statement, Value,
};
use std::time::Duration;

static DB_POOL: OnceCell<DatabaseConnection> = OnceCell::new();

#[inline(always)]
pub fn get_db_pool() -> &'static DatabaseConnection {
    unsafe { DB_POOL.get_unchecked() }
}

/// Opens the database URL and initializes the DB_POOL static.
/// This MUST be called before get_db_pool.
pub async fn init_db(database_url: String) -> &'static DatabaseConnection {
    let mut opt = ConnectOptions::new(database_url);
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .sqlx_logging(true);

    let pool = Database::connect(opt)
        .await
        .expect("Database connection was not established.");
    if DB_POOL.set(pool).is_err() {
        log::warn!("init_db called more than once; keeping the first pool");
    }

    DB_POOL
        .get()
        .expect("DatabaseConnection in DB_POOL failed in init_db()")
}

/// Runs an `INSERT ... ON CONFLICT DO NOTHING RETURNING ...` statement.
/// None means a unique index already held an equal row and nothing was written.
pub async fn insert_or_skip<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    values: Vec<Value>,
) -> Result<Option<QueryResult>, DbErr> {
    db.query_one(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
        .await
}

/// Escapes `LIKE` wildcards so user input only matches itself.
/// Backslash is the default escape character in Postgres.
pub fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{escape_like, insert_or_skip};
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;

    const SQL: &str = "INSERT INTO favorites (user_id, post_id) VALUES ($1, $2) ON CONFLICT DO NOTHING RETURNING id";

    #[actix_rt::test]
    async fn test_insert_or_skip_reports_conflict_as_none() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![
                vec![BTreeMap::from([("id", Value::Int(Some(7)))])],
                vec![],
            ])
            .into_connection();

        let row = insert_or_skip(&db, SQL, vec![1.into(), 2.into()])
            .await
            .expect("first insert");
        assert_eq!(row.and_then(|r| r.try_get::<i32>("", "id").ok()), Some(7));

        let row = insert_or_skip(&db, SQL, vec![1.into(), 2.into()])
            .await
            .expect("second insert");
        assert!(row.is_none());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%"), r"100\%");
        assert_eq!(escape_like("a_b"), r"a\_b");
        assert_eq!(escape_like(r"C:\tmp"), r"C:\\tmp");
        assert_eq!(escape_like("猫"), "猫");
    }
}

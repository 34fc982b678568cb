// Database access layer (SQLite via sqlx).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::headhunt::{BannerType, PullRecord, PullRecordStore, PullRecordUpsert, RecordFilter};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub scopes: String,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

/// Raw `pull_records` row; list columns hold JSON text.
#[derive(Debug, sqlx::FromRow)]
struct PullRecordRow {
    id: i64,
    owner_id: i64,
    owner_name: Option<String>,
    banner: String,
    banner_type: String,
    pulls: String,
    total_pulls: i64,
    six_star_count: i64,
    five_star_count: i64,
    four_star_count: i64,
    three_star_count: i64,
    six_star_names: String,
    five_star_names: String,
    import_source: String,
    region: Option<String>,
    last_imported_at: String,
}

impl TryFrom<PullRecordRow> for PullRecord {
    type Error = sqlx::Error;

    fn try_from(row: PullRecordRow) -> Result<Self, Self::Error> {
        let banner_type = BannerType::from_str_name(&row.banner_type).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown banner type '{}'", row.banner_type).into())
        })?;
        let decode = |e: serde_json::Error| sqlx::Error::Decode(Box::new(e));

        Ok(PullRecord {
            id: row.id,
            owner_id: row.owner_id,
            owner_name: row
                .owner_name
                .unwrap_or_else(|| "Anonymous".to_string()),
            banner: row.banner,
            banner_type,
            pulls: serde_json::from_str(&row.pulls).map_err(decode)?,
            total_pulls: row.total_pulls,
            six_star_count: row.six_star_count,
            five_star_count: row.five_star_count,
            four_star_count: row.four_star_count,
            three_star_count: row.three_star_count,
            six_star_names: serde_json::from_str(&row.six_star_names).map_err(decode)?,
            five_star_names: serde_json::from_str(&row.five_star_names).map_err(decode)?,
            import_source: row.import_source,
            region: row.region,
            last_imported_at: row.last_imported_at,
        })
    }
}

const PULL_RECORD_SELECT: &str = r#"
    SELECT p.id, p.owner_id,
           COALESCE(u.display_name, u.username) AS owner_name,
           p.banner, p.banner_type, p.pulls, p.total_pulls,
           p.six_star_count, p.five_star_count, p.four_star_count, p.three_star_count,
           p.six_star_names, p.five_star_names, p.import_source, p.region, p.last_imported_at
    FROM pull_records p
    LEFT JOIN users u ON u.id = p.owner_id
"#;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT,
                display_name TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                scopes TEXT NOT NULL DEFAULT 'pulls:read,pulls:write',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_used_at TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pull_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                banner TEXT NOT NULL,
                banner_type TEXT NOT NULL,
                pulls TEXT NOT NULL DEFAULT '[]',
                total_pulls INTEGER NOT NULL DEFAULT 0,
                six_star_count INTEGER NOT NULL DEFAULT 0,
                five_star_count INTEGER NOT NULL DEFAULT 0,
                four_star_count INTEGER NOT NULL DEFAULT 0,
                three_star_count INTEGER NOT NULL DEFAULT 0,
                six_star_names TEXT NOT NULL DEFAULT '[]',
                five_star_names TEXT NOT NULL DEFAULT '[]',
                import_source TEXT NOT NULL DEFAULT 'manual',
                region TEXT,
                last_imported_at TEXT NOT NULL DEFAULT (datetime('now')),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(owner_id, banner)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pull_records_banner ON pull_records(banner)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        display_name: &str,
    ) -> Result<User, sqlx::Error> {
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, password_hash, display_name) VALUES (?, ?, ?, ?) RETURNING id, username, email, password_hash, display_name, role, created_at",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, display_name, role, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, display_name, role, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── API tokens ────────────────────────────────────────────────────

    pub async fn create_api_token(
        &self,
        user_id: i64,
        name: &str,
        token_hash: &str,
        scopes: &str,
    ) -> Result<ApiToken, sqlx::Error> {
        let row = sqlx::query_as::<_, ApiToken>(
            "INSERT INTO api_tokens (user_id, name, token_hash, scopes) VALUES (?, ?, ?, ?) RETURNING id, user_id, name, token_hash, scopes, created_at, last_used_at",
        )
        .bind(user_id)
        .bind(name)
        .bind(token_hash)
        .bind(scopes)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_api_tokens(&self, user_id: i64) -> Result<Vec<ApiToken>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ApiToken>(
            "SELECT id, user_id, name, token_hash, scopes, created_at, last_used_at FROM api_tokens WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_api_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ApiToken>, sqlx::Error> {
        let row = sqlx::query_as::<_, ApiToken>(
            "SELECT id, user_id, name, token_hash, scopes, created_at, last_used_at FROM api_tokens WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_token_last_used(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE api_tokens SET last_used_at = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_api_token(&self, id: i64, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Pull records ──────────────────────────────────────────────────

    pub async fn get_pull_record(&self, id: i64) -> Result<Option<PullRecord>, sqlx::Error> {
        let sql = format!("{PULL_RECORD_SELECT} WHERE p.id = ?");
        let row = sqlx::query_as::<_, PullRecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PullRecord::try_from).transpose()
    }
}

#[async_trait]
impl PullRecordStore for Database {
    async fn find_pull_records(&self, filter: &RecordFilter) -> Result<Vec<PullRecord>, sqlx::Error> {
        let sql = format!(
            "{PULL_RECORD_SELECT} WHERE (?1 IS NULL OR p.banner = ?1) AND (?2 IS NULL OR p.owner_id = ?2) ORDER BY p.id"
        );
        let rows = sqlx::query_as::<_, PullRecordRow>(&sql)
            .bind(filter.banner.as_deref())
            .bind(filter.owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(PullRecord::try_from).collect()
    }

    async fn upsert_pull_record(&self, record: &PullRecordUpsert) -> Result<PullRecord, sqlx::Error> {
        let encode = |e: serde_json::Error| sqlx::Error::Encode(Box::new(e));
        let pulls = serde_json::to_string(&record.pulls).map_err(encode)?;
        let six_star_names = serde_json::to_string(&record.tally.six_star_names).map_err(encode)?;
        let five_star_names =
            serde_json::to_string(&record.tally.five_star_names).map_err(encode)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pull_records (
                owner_id, banner, banner_type, pulls, total_pulls,
                six_star_count, five_star_count, four_star_count, three_star_count,
                six_star_names, five_star_names, import_source, region, last_imported_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(owner_id, banner) DO UPDATE SET
                banner_type = excluded.banner_type,
                pulls = excluded.pulls,
                total_pulls = excluded.total_pulls,
                six_star_count = excluded.six_star_count,
                five_star_count = excluded.five_star_count,
                four_star_count = excluded.four_star_count,
                three_star_count = excluded.three_star_count,
                six_star_names = excluded.six_star_names,
                five_star_names = excluded.five_star_names,
                import_source = excluded.import_source,
                region = excluded.region,
                last_imported_at = excluded.last_imported_at,
                updated_at = datetime('now')
            RETURNING id
        "#,
        )
        .bind(record.owner_id)
        .bind(&record.banner)
        .bind(record.banner_type.as_str())
        .bind(pulls)
        .bind(record.tally.total_pulls)
        .bind(record.tally.six_star_count)
        .bind(record.tally.five_star_count)
        .bind(record.tally.four_star_count)
        .bind(record.tally.three_star_count)
        .bind(six_star_names)
        .bind(five_star_names)
        .bind(&record.import_source)
        .bind(record.region.as_deref())
        .fetch_one(&self.pool)
        .await?;

        self.get_pull_record(id).await?.ok_or(sqlx::Error::RowNotFound)
    }
}

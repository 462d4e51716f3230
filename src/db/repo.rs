use super::model::SeenRecord;
use super::{SeenStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Open the database. One connection only: the scheduler is the single
/// writer, and `sqlite::memory:` needs it to keep one shared database.
pub async fn init_pool(database_url: &str) -> Result<Pool, StoreError> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL plus synchronous=FULL: a committed insert survives a crash.
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all, fields(listing_id = %listing_id))]
pub async fn has_seen(pool: &Pool, listing_id: &str) -> Result<bool, StoreError> {
    let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM seen_listings WHERE listing_id = ?")
        .bind(listing_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Insert `listing_id` unless it is already present. Returns whether a row
/// was written; an existing row keeps its original `first_seen_at`.
#[instrument(skip_all, fields(listing_id = %listing_id))]
pub async fn mark_seen(pool: &Pool, listing_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
    let res = sqlx::query(
        "INSERT INTO seen_listings (listing_id, first_seen_at) VALUES (?, ?) ON CONFLICT(listing_id) DO NOTHING",
    )
    .bind(listing_id)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all, fields(listing_id = %listing_id))]
pub async fn get_seen(pool: &Pool, listing_id: &str) -> Result<Option<SeenRecord>, StoreError> {
    let rec = sqlx::query_as::<_, SeenRecord>(
        "SELECT listing_id, first_seen_at FROM seen_listings WHERE listing_id = ?",
    )
    .bind(listing_id)
    .fetch_optional(pool)
    .await?;
    Ok(rec)
}

pub async fn count_seen(pool: &Pool) -> Result<i64, StoreError> {
    let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_listings")
        .fetch_one(pool)
        .await?;
    Ok(cnt)
}

/// `SeenStore` over the `seen_listings` table.
#[derive(Debug, Clone)]
pub struct SqliteSeenStore {
    pool: Pool,
}

impl SqliteSeenStore {
    /// Open `database_url` and bring the schema up to date.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SeenStore for SqliteSeenStore {
    async fn has_seen(&self, listing_id: &str) -> Result<bool, StoreError> {
        has_seen(&self.pool, listing_id).await
    }

    async fn mark_seen(&self, listing_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        mark_seen(&self.pool, listing_id, at).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    async fn setup_pool() -> Pool {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_mark_is_idempotent() {
        let pool = setup_pool().await;
        assert!(!has_seen(&pool, "4711").await.unwrap());

        assert!(mark_seen(&pool, "4711", t0()).await.unwrap());
        assert!(!mark_seen(&pool, "4711", t0() + Duration::hours(1)).await.unwrap());

        assert!(has_seen(&pool, "4711").await.unwrap());
        assert_eq!(count_seen(&pool).await.unwrap(), 1);
        let rec = get_seen(&pool, "4711").await.unwrap().unwrap();
        assert_eq!(rec.first_seen_at, t0());
        assert!(get_seen(&pool, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_seen_state_survives_reopen() {
        let td = tempdir().unwrap();
        let url = format!("sqlite://{}/nested/seen.db", td.path().display());

        let store = SqliteSeenStore::open(&url).await.unwrap();
        store.mark_seen("a-1", t0()).await.unwrap();
        store.close().await;

        let store = SqliteSeenStore::open(&url).await.unwrap();
        assert!(store.has_seen("a-1").await.unwrap());
        assert!(!store.has_seen("a-2").await.unwrap());
        store.mark_seen("a-1", t0()).await.unwrap();
        assert_eq!(count_seen(store.pool()).await.unwrap(), 1);
    }

    #[test]
    fn test_prepare_sqlite_url() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
        let td = tempdir().unwrap();
        let path = td.path().join("sub").join("db.sqlite");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        assert_eq!(
            prepare_sqlite_url(&url),
            format!("sqlite://{}?mode=rwc", path.display())
        );
        assert!(td.path().join("sub").exists());
    }
}

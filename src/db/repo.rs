use super::model::{NewPackage, PackageUpdate};
use crate::error::StorageError;
use crate::model::{PackageRecord, PackageType, PackageView, UserSession};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;
type Result<T> = std::result::Result<T, StorageError>;

const PACKAGE_COLUMNS: &str =
    "id, user_session, name, weight, content_cost, type_id, delivery_cost";

const PACKAGE_VIEW_SELECT: &str = "SELECT p.id AS id, p.user_session AS user_session, \
     p.name AS name, p.weight AS weight, p.content_cost AS content_cost, \
     p.type_id AS type_id, p.delivery_cost AS delivery_cost, t.name AS type_name \
     FROM packages p JOIN package_types t ON t.id = p.type_id";

/// Default catalogue inserted by [`seed_package_types`] on an empty table.
pub const DEFAULT_PACKAGE_TYPES: [&str; 3] = ["Clothing", "Electronics", "Miscellaneous"];

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL and stricter durability on every pooled connection.
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    // Every connection to `sqlite::memory:` opens a fresh database, so keep
    // exactly one connection alive for the lifetime of the pool.
    let pool = if normalized.starts_with("sqlite::memory") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new().connect_with(options).await?
    };
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
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

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- packages ----

#[instrument(skip_all)]
pub async fn create_package(
    pool: &Pool,
    user_session: &str,
    input: &NewPackage,
) -> Result<PackageRecord> {
    input.validate()?;
    let sql = format!(
        "INSERT INTO packages (user_session, name, weight, content_cost, type_id) \
         VALUES (?, ?, ?, ?, ?) RETURNING {PACKAGE_COLUMNS}"
    );
    let rec = sqlx::query_as::<_, PackageRecord>(&sql)
        .bind(user_session)
        .bind(&input.name)
        .bind(input.weight)
        .bind(input.content_cost)
        .bind(input.type_id)
        .fetch_one(pool)
        .await?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn get_package(pool: &Pool, id: i64, user_session: &str) -> Result<Option<PackageView>> {
    let sql = format!("{PACKAGE_VIEW_SELECT} WHERE p.id = ? AND p.user_session = ?");
    let view = sqlx::query_as::<_, PackageView>(&sql)
        .bind(id)
        .bind(user_session)
        .fetch_optional(pool)
        .await?;
    Ok(view)
}

#[instrument(skip_all)]
pub async fn list_packages(
    pool: &Pool,
    user_session: &str,
    skip: i64,
    limit: i64,
) -> Result<Vec<PackageView>> {
    let sql = format!(
        "{PACKAGE_VIEW_SELECT} WHERE p.user_session = ? ORDER BY p.id LIMIT ? OFFSET ?"
    );
    let views = sqlx::query_as::<_, PackageView>(&sql)
        .bind(user_session)
        .bind(limit)
        .bind(skip)
        .fetch_all(pool)
        .await?;
    Ok(views)
}

/// Apply a partial update to a package owned by `user_session`.
/// Returns `None` when no such package exists for that session.
#[instrument(skip_all)]
pub async fn update_package(
    pool: &Pool,
    id: i64,
    user_session: &str,
    update: &PackageUpdate,
) -> Result<Option<PackageRecord>> {
    update.validate()?;
    let sql = format!(
        "UPDATE packages SET \
            name = COALESCE(?, name), \
            weight = COALESCE(?, weight), \
            content_cost = COALESCE(?, content_cost), \
            type_id = COALESCE(?, type_id), \
            delivery_cost = COALESCE(?, delivery_cost) \
         WHERE id = ? AND user_session = ? RETURNING {PACKAGE_COLUMNS}"
    );
    let rec = sqlx::query_as::<_, PackageRecord>(&sql)
        .bind(update.name.as_deref())
        .bind(update.weight)
        .bind(update.content_cost)
        .bind(update.type_id)
        .bind(update.delivery_cost)
        .bind(id)
        .bind(user_session)
        .fetch_optional(pool)
        .await?;
    Ok(rec)
}

/// Delete a package owned by `user_session`, returning the removed record.
#[instrument(skip_all)]
pub async fn delete_package(
    pool: &Pool,
    id: i64,
    user_session: &str,
) -> Result<Option<PackageRecord>> {
    let sql = format!(
        "DELETE FROM packages WHERE id = ? AND user_session = ? RETURNING {PACKAGE_COLUMNS}"
    );
    let rec = sqlx::query_as::<_, PackageRecord>(&sql)
        .bind(id)
        .bind(user_session)
        .fetch_optional(pool)
        .await?;
    Ok(rec)
}

/// All packages whose delivery cost has not been computed yet.
#[instrument(skip_all)]
pub async fn list_unprocessed(pool: &Pool) -> Result<Vec<PackageRecord>> {
    let sql = format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE delivery_cost IS NULL ORDER BY id");
    let recs = sqlx::query_as::<_, PackageRecord>(&sql)
        .fetch_all(pool)
        .await?;
    Ok(recs)
}

/// Write computed delivery costs back in one transaction.
///
/// Each row is only written while its cost is still NULL, so a cost set by
/// an explicit update between scan and write is kept. Records without a
/// cost are skipped. Returns the number of rows written.
#[instrument(skip_all, fields(count = records.len()))]
pub async fn bulk_persist(pool: &Pool, records: &[PackageRecord]) -> Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for rec in records {
        let Some(cost) = rec.delivery_cost else {
            continue;
        };
        let res = sqlx::query(
            "UPDATE packages SET delivery_cost = ? WHERE id = ? AND delivery_cost IS NULL",
        )
        .bind(cost)
        .bind(rec.id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            debug!(id = rec.id, "package changed since scan; keeping stored cost");
        }
        written += res.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

// ---- package types ----

#[instrument(skip_all)]
pub async fn list_package_types(pool: &Pool, skip: i64, limit: i64) -> Result<Vec<PackageType>> {
    let types = sqlx::query_as::<_, PackageType>(
        "SELECT id, name FROM package_types ORDER BY id LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;
    Ok(types)
}

/// Insert the default catalogue unless any type already exists.
/// Returns the number of inserted types.
#[instrument(skip_all)]
pub async fn seed_package_types(pool: &Pool) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM package_types")
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        return Ok(0);
    }
    for name in DEFAULT_PACKAGE_TYPES {
        sqlx::query("INSERT INTO package_types (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(DEFAULT_PACKAGE_TYPES.len())
}

// ---- user sessions ----

/// Insert a session row unless one with the same id exists.
/// Returns whether a row was inserted.
#[instrument(skip_all)]
pub async fn create_session(pool: &Pool, session_id: &str) -> Result<bool> {
    let now = Utc::now();
    let res = sqlx::query(
        "INSERT INTO user_sessions (id, created_at, last_activity) VALUES (?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(session_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn get_session(pool: &Pool, session_id: &str) -> Result<Option<UserSession>> {
    let session = sqlx::query_as::<_, UserSession>(
        "SELECT id, created_at, last_activity FROM user_sessions WHERE id = ?",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok(session)
}

/// Bump `last_activity`; a missing session is left alone.
#[instrument(skip_all)]
pub async fn touch_session(pool: &Pool, session_id: &str, at: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query("UPDATE user_sessions SET last_activity = ? WHERE id = ?")
        .bind(at)
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Delete sessions idle for longer than `max_idle_days` as of `now`.
#[instrument(skip_all)]
pub async fn delete_inactive_sessions(
    pool: &Pool,
    now: DateTime<Utc>,
    max_idle_days: u32,
) -> Result<u64> {
    let cutoff = now - ChronoDuration::days(i64::from(max_idle_days));
    let res = sqlx::query("DELETE FROM user_sessions WHERE last_activity < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        seed_package_types(&pool).await.unwrap();
        pool
    }

    fn parcel(name: &str, weight: f64, content_cost: f64) -> NewPackage {
        NewPackage {
            name: name.into(),
            weight,
            content_cost,
            type_id: 1,
        }
    }

    #[test]
    fn prepare_sqlite_url_keeps_memory_and_query() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested/parcels.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let out = prepare_sqlite_url(&url);
        assert_eq!(out, url);
        assert!(path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_package_crud_is_session_scoped() {
        let pool = setup_pool().await;
        let created = create_package(&pool, "s1", &parcel("boots", 1.5, 40.0))
            .await
            .unwrap();
        assert_eq!(created.user_session, "s1");
        assert!(created.delivery_cost.is_none());

        assert!(get_package(&pool, created.id, "s2").await.unwrap().is_none());
        let view = get_package(&pool, created.id, "s1").await.unwrap().unwrap();
        assert_eq!(view.package, created);
        assert_eq!(view.type_name, DEFAULT_PACKAGE_TYPES[0]);

        let update = PackageUpdate {
            name: Some("winter boots".into()),
            ..Default::default()
        };
        assert!(update_package(&pool, created.id, "s2", &update)
            .await
            .unwrap()
            .is_none());
        let updated = update_package(&pool, created.id, "s1", &update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "winter boots");
        assert_eq!(updated.weight, 1.5);

        assert!(delete_package(&pool, created.id, "s2").await.unwrap().is_none());
        assert!(delete_package(&pool, created.id, "s1").await.unwrap().is_some());
        assert!(list_packages(&pool, "s1", 0, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_non_positive_weight() {
        let pool = setup_pool().await;
        let err = create_package(&pool, "s1", &parcel("air", 0.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Invalid(msg) if msg.contains("weight")));
    }

    #[tokio::test]
    async fn test_list_packages_paginates() {
        let pool = setup_pool().await;
        for i in 0..5 {
            create_package(&pool, "s1", &parcel(&format!("p{i}"), 1.0, 10.0))
                .await
                .unwrap();
        }
        create_package(&pool, "other", &parcel("x", 1.0, 10.0))
            .await
            .unwrap();
        let page = list_packages(&pool, "s1", 1, 2).await.unwrap();
        let names: Vec<_> = page.iter().map(|v| v.package.name.as_str()).collect();
        assert_eq!(names, vec!["p1", "p2"]);
        assert!(page.iter().all(|v| v.type_name == "Clothing"));
    }

    #[tokio::test]
    async fn test_bulk_persist_skips_rows_priced_since_scan() {
        let pool = setup_pool().await;
        let a = create_package(&pool, "s1", &parcel("a", 1.0, 10.0)).await.unwrap();
        let b = create_package(&pool, "s1", &parcel("b", 2.0, 20.0)).await.unwrap();

        let mut scanned = list_unprocessed(&pool).await.unwrap();
        assert_eq!(scanned.len(), 2);

        // Explicit override lands between scan and write.
        let override_cost = PackageUpdate {
            delivery_cost: Some(1.0),
            ..Default::default()
        };
        update_package(&pool, b.id, "s1", &override_cost)
            .await
            .unwrap();

        for rec in scanned.iter_mut() {
            rec.delivery_cost = Some(99.0);
        }
        let written = bulk_persist(&pool, &scanned).await.unwrap();
        assert_eq!(written, 1);

        let a = get_package(&pool, a.id, "s1").await.unwrap().unwrap().package;
        let b = get_package(&pool, b.id, "s1").await.unwrap().unwrap().package;
        assert_eq!(a.delivery_cost, Some(99.0));
        assert_eq!(b.delivery_cost, Some(1.0));
        assert!(list_unprocessed(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_persist_empty_never_touches_pool() {
        let pool = setup_pool().await;
        pool.close().await;
        assert_eq!(bulk_persist(&pool, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seed_package_types_is_idempotent() {
        let pool = setup_pool().await;
        assert_eq!(seed_package_types(&pool).await.unwrap(), 0);
        let types = list_package_types(&pool, 0, 100).await.unwrap();
        let names: Vec<_> = types.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, DEFAULT_PACKAGE_TYPES.to_vec());
    }

    #[tokio::test]
    async fn test_inactive_sessions_are_removed() {
        let pool = setup_pool().await;
        assert!(create_session(&pool, "old").await.unwrap());
        assert!(create_session(&pool, "fresh").await.unwrap());
        assert!(!create_session(&pool, "fresh").await.unwrap());

        let now = Utc::now();
        touch_session(&pool, "old", now - ChronoDuration::days(45))
            .await
            .unwrap();
        assert!(!touch_session(&pool, "missing", now).await.unwrap());

        let removed = delete_inactive_sessions(&pool, now, 30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(get_session(&pool, "old").await.unwrap().is_none());
        assert!(get_session(&pool, "fresh").await.unwrap().is_some());
    }
}

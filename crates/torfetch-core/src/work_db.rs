//! Shared work table (SQLite via sqlx).
//!
//! One row per remote file to fetch. Workers claim eligible rows with a
//! filtered `LIMIT 1` read (no lock; cross-route overlap is accepted under
//! backfill mode because the outcome write is idempotent per row) and record
//! outcomes through a single UPDATE. Rows are seeded externally and never
//! deleted here.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Work item identifier.
pub type FileId = i64;

/// One claimed work item: the fields the driver needs to fetch and publish.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: FileId,
    pub rel_path: String,
    pub ext: String,
    /// Advisory expected size from seeding; not verified.
    pub size_bytes: Option<i64>,
    /// Response code of the last recorded attempt, if any.
    pub resp_code: Option<u16>,
    pub route: u16,
}

/// Eligibility filter for `claim_next`.
///
/// `retry_code = None` selects never-attempted rows (`resp_code IS NULL`);
/// `Some(c)` selects rows whose last recorded attempt failed with exactly
/// `c`, including rows already marked done; that is how a targeted pass
/// re-opens a class of terminal failures.
#[derive(Debug, Clone, Default)]
pub struct ClaimFilter {
    /// Route this worker is bound to.
    pub route: u16,
    /// Claim across all routes (administrative/backfill mode).
    pub all_routes: bool,
    /// Narrow eligibility to rows that previously failed with this code.
    pub retry_code: Option<u16>,
    /// Extensions to skip entirely.
    pub exclude_ext: Vec<String>,
    /// Rows deferred within the current pass (retryable failures already
    /// seen); cleared between passes.
    pub exclude_ids: Vec<FileId>,
}

/// Handle to the shared SQLite work database.
#[derive(Clone)]
pub struct WorkDb {
    pool: Pool<Sqlite>,
}

impl WorkDb {
    /// Open (or create) the default work database under the XDG state
    /// directory (`~/.local/state/torfetch/work.db`) and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("torfetch")?;
        let state_dir = xdg_dirs.get_state_home();
        std::fs::create_dir_all(&state_dir)?;
        Self::open_at(&state_dir.join("work.db")).await
    }

    /// Open (or create) the work database at an explicit path.
    pub async fn open_at(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = WorkDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database for tests. Single connection so every query sees
    /// the same database.
    #[cfg(test)]
    pub(crate) async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = WorkDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // - `resp_code IS NULL` means "never attempted".
        // - `done = 1` always comes with a non-null resp_code: both are set
        //   by the same UPDATE in `record_outcome`, the only write path.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rel_path TEXT NOT NULL,
                ext TEXT NOT NULL,
                size_bytes INTEGER,
                recv_bytes INTEGER,
                resp_code INTEGER,
                route INTEGER NOT NULL,
                done INTEGER NOT NULL DEFAULT 0,
                take_ms INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_files_claim ON files (done, route, resp_code)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Claims some eligible row under `filter`, or `None` when the table is
    /// drained for this filter. Unordered `LIMIT 1`: callers must not assume
    /// FIFO. All filter values are bound parameters, never interpolated.
    pub async fn claim_next(&self, filter: &ClaimFilter) -> Result<Option<FileRow>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, rel_path, ext, size_bytes, resp_code, route FROM files WHERE 1 = 1",
        );

        match filter.retry_code {
            None => {
                qb.push(" AND done = 0 AND resp_code IS NULL");
            }
            Some(code) => {
                qb.push(" AND resp_code = ");
                qb.push_bind(code as i64);
            }
        }

        if !filter.all_routes {
            qb.push(" AND route = ");
            qb.push_bind(filter.route as i64);
        }

        if !filter.exclude_ext.is_empty() {
            qb.push(" AND ext NOT IN (");
            {
                let mut sep = qb.separated(", ");
                for ext in &filter.exclude_ext {
                    sep.push_bind(ext.as_str());
                }
            }
            qb.push(")");
        }

        if !filter.exclude_ids.is_empty() {
            qb.push(" AND id NOT IN (");
            {
                let mut sep = qb.separated(", ");
                for id in &filter.exclude_ids {
                    sep.push_bind(*id);
                }
            }
            qb.push(")");
        }

        qb.push(" LIMIT 1");

        let row = qb.build().fetch_optional(&self.pool).await?;
        Ok(row.map(|r| FileRow {
            id: r.get("id"),
            rel_path: r.get("rel_path"),
            ext: r.get("ext"),
            size_bytes: r.get("size_bytes"),
            resp_code: r.get::<Option<i64>, _>("resp_code").map(|c| c as u16),
            route: r.get::<i64, _>("route") as u16,
        }))
    }

    /// Records the outcome of one attempt: sets the completion flag, the
    /// response code, bytes received, and elapsed time in a single UPDATE.
    /// This is the only write path for worker outcomes.
    pub async fn record_outcome(
        &self,
        id: FileId,
        resp_code: u16,
        recv_bytes: i64,
        take_ms: i64,
    ) -> Result<()> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE files
            SET done = 1,
                resp_code = ?1,
                recv_bytes = ?2,
                take_ms = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(resp_code as i64)
        .bind(recv_bytes)
        .bind(take_ms)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("no row with id {} to record an outcome for", id);
        }
        Ok(())
    }

    /// Inserts a pending row. Seeding happens outside the worker loop; this
    /// is the supported write path for seeding tools and tests.
    pub async fn insert_file(
        &self,
        rel_path: &str,
        ext: &str,
        size_bytes: Option<i64>,
        route: u16,
    ) -> Result<FileId> {
        let now = unix_timestamp();
        let id = sqlx::query(
            r#"
            INSERT INTO files (rel_path, ext, size_bytes, recv_bytes, resp_code,
                               route, done, take_ms, created_at, updated_at)
            VALUES (?1, ?2, ?3, NULL, NULL, ?4, 0, NULL, ?5, ?6)
            "#,
        )
        .bind(rel_path)
        .bind(ext)
        .bind(size_bytes)
        .bind(route as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Row counts grouped by response code (NULL = never attempted),
    /// largest group first. Used by the CLI status view.
    pub async fn status_summary(&self) -> Result<Vec<(Option<u16>, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT resp_code, COUNT(id) AS n
            FROM files
            GROUP BY resp_code
            ORDER BY n DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get::<Option<i64>, _>("resp_code").map(|c| c as u16),
                    r.get::<i64, _>("n"),
                )
            })
            .collect())
    }

    /// Fetches one row by id. Test and tooling helper; the worker loop only
    /// ever reads through `claim_next`.
    pub async fn get_row(&self, id: FileId) -> Result<Option<(Option<u16>, bool, Option<i64>)>> {
        let row = sqlx::query("SELECT resp_code, done, recv_bytes FROM files WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            (
                r.get::<Option<i64>, _>("resp_code").map(|c| c as u16),
                r.get::<i64, _>("done") != 0,
                r.get("recv_bytes"),
            )
        }))
    }
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_for(route: u16) -> ClaimFilter {
        ClaimFilter {
            route,
            ..ClaimFilter::default()
        }
    }

    #[tokio::test]
    async fn default_claim_skips_attempted_rows() {
        let db = WorkDb::open_memory().await.unwrap();
        let a = db.insert_file("a.pdf", "pdf", Some(100), 9050).await.unwrap();
        let b = db.insert_file("b.pdf", "pdf", None, 9050).await.unwrap();

        db.record_outcome(a, 200, 100, 12).await.unwrap();

        let claimed = db.claim_next(&filter_for(9050)).await.unwrap().unwrap();
        assert_eq!(claimed.id, b);
        assert_eq!(claimed.resp_code, None);
    }

    #[tokio::test]
    async fn default_claim_drains_to_none() {
        let db = WorkDb::open_memory().await.unwrap();
        let a = db.insert_file("a.pdf", "pdf", None, 9050).await.unwrap();
        db.record_outcome(a, 404, 0, 0).await.unwrap();

        assert!(db.claim_next(&filter_for(9050)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn targeted_claim_matches_exact_code_even_when_done() {
        let db = WorkDb::open_memory().await.unwrap();
        let a = db.insert_file("a.pdf", "pdf", None, 9050).await.unwrap();
        let b = db.insert_file("b.pdf", "pdf", None, 9050).await.unwrap();
        db.record_outcome(a, 503, 0, 0).await.unwrap();
        db.record_outcome(b, 404, 0, 0).await.unwrap();

        let mut filter = filter_for(9050);
        filter.retry_code = Some(503);
        let claimed = db.claim_next(&filter).await.unwrap().unwrap();
        assert_eq!(claimed.id, a);
        assert_eq!(claimed.resp_code, Some(503));

        // No row failed with 500; targeted claim must not fall back.
        filter.retry_code = Some(500);
        assert!(db.claim_next(&filter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_respects_route_binding_and_all_routes() {
        let db = WorkDb::open_memory().await.unwrap();
        let other = db.insert_file("x.bin", "bin", None, 9051).await.unwrap();

        assert!(db.claim_next(&filter_for(9050)).await.unwrap().is_none());

        let mut filter = filter_for(9050);
        filter.all_routes = true;
        let claimed = db.claim_next(&filter).await.unwrap().unwrap();
        assert_eq!(claimed.id, other);
        assert_eq!(claimed.route, 9051);
    }

    #[tokio::test]
    async fn claim_excludes_extensions() {
        let db = WorkDb::open_memory().await.unwrap();
        db.insert_file("big.iso", "iso", None, 9050).await.unwrap();
        let doc = db.insert_file("doc.pdf", "pdf", None, 9050).await.unwrap();

        let mut filter = filter_for(9050);
        filter.exclude_ext = vec!["iso".to_string(), "zip".to_string()];
        let claimed = db.claim_next(&filter).await.unwrap().unwrap();
        assert_eq!(claimed.id, doc);

        filter.exclude_ext.push("pdf".to_string());
        assert!(db.claim_next(&filter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_excludes_deferred_ids() {
        let db = WorkDb::open_memory().await.unwrap();
        let a = db.insert_file("a.pdf", "pdf", None, 9050).await.unwrap();
        let b = db.insert_file("b.pdf", "pdf", None, 9050).await.unwrap();

        let mut filter = filter_for(9050);
        filter.exclude_ids = vec![a];
        let claimed = db.claim_next(&filter).await.unwrap().unwrap();
        assert_eq!(claimed.id, b);

        filter.exclude_ids.push(b);
        assert!(db.claim_next(&filter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_outcome_sets_done_with_code() {
        let db = WorkDb::open_memory().await.unwrap();
        let id = db.insert_file("a.pdf", "pdf", None, 9050).await.unwrap();

        let (code, done, recv) = db.get_row(id).await.unwrap().unwrap();
        assert_eq!((code, done, recv), (None, false, None));

        db.record_outcome(id, 200, 4096, 37).await.unwrap();
        let (code, done, recv) = db.get_row(id).await.unwrap().unwrap();
        assert_eq!((code, done, recv), (Some(200), true, Some(4096)));
    }

    #[tokio::test]
    async fn outcome_write_is_idempotent_per_row() {
        let db = WorkDb::open_memory().await.unwrap();
        let id = db.insert_file("a.pdf", "pdf", None, 9050).await.unwrap();

        db.record_outcome(id, 200, 4096, 20).await.unwrap();
        db.record_outcome(id, 200, 4096, 20).await.unwrap();
        let (code, done, recv) = db.get_row(id).await.unwrap().unwrap();
        assert_eq!((code, done, recv), (Some(200), true, Some(4096)));
    }

    #[tokio::test]
    async fn outcome_for_unknown_id_is_an_error() {
        let db = WorkDb::open_memory().await.unwrap();
        let id = db.insert_file("a.pdf", "pdf", None, 9050).await.unwrap();

        let err = db.record_outcome(id + 1, 200, 10, 1).await.unwrap_err();
        assert!(err.to_string().contains("no row"));
        // The existing row is untouched.
        let (code, done, _) = db.get_row(id).await.unwrap().unwrap();
        assert_eq!((code, done), (None, false));
    }

    #[tokio::test]
    async fn status_summary_groups_by_code() {
        let db = WorkDb::open_memory().await.unwrap();
        let a = db.insert_file("a.pdf", "pdf", None, 9050).await.unwrap();
        let b = db.insert_file("b.pdf", "pdf", None, 9050).await.unwrap();
        db.insert_file("c.pdf", "pdf", None, 9050).await.unwrap();
        db.record_outcome(a, 200, 10, 1).await.unwrap();
        db.record_outcome(b, 200, 20, 2).await.unwrap();

        let summary = db.status_summary().await.unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0], (Some(200), 2));
        assert_eq!(summary[1], (None, 1));
    }
}

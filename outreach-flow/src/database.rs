//! SQLite-backed flow store
//!
//! Persistent [`FlowStore`] implementation. The schema holds three tables:
//!
//! 1. **flows** - flow metadata (name, status, filters, outreach template)
//! 2. **businesses** - prospect records populated by the import collaborator
//! 3. **paths** - one row per prospect per flow, carrying the path status,
//!    the content artifacts and their approval flags
//!
//! The connection sits behind a mutex; every trait call locks it for the
//! duration of one statement. WAL mode is enabled for concurrent readers.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use outreach_flow_sdk::{
    async_trait, Business, BusinessId, Flow, FlowId, FlowStatus, FlowStore, Path, PathId,
    PathStatus, ResponseStatus,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::warn;

/// SQLite database wrapper for flows, businesses and paths.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn new(path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, handy for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create all tables and indexes if they do not exist yet.
    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                filters TEXT NOT NULL,
                outreach_template TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS businesses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                website TEXT,
                category TEXT,
                email TEXT,
                phone TEXT,
                address TEXT,
                rating REAL,
                review_count INTEGER
            );

            CREATE TABLE IF NOT EXISTS paths (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                business_id INTEGER NOT NULL,
                flow_id INTEGER NOT NULL,
                status TEXT,
                report TEXT,
                report_approved INTEGER NOT NULL DEFAULT 0,
                outreach_draft TEXT,
                outreach_approved INTEGER NOT NULL DEFAULT 0,
                last_contacted_at TEXT,
                response_status TEXT,

                FOREIGN KEY(business_id) REFERENCES businesses(id),
                FOREIGN KEY(flow_id) REFERENCES flows(id)
            );

            CREATE INDEX IF NOT EXISTS idx_paths_flow_id ON paths(flow_id);
            CREATE INDEX IF NOT EXISTS idx_flows_status ON flows(status);
            "#,
        )?;

        Ok(())
    }

    /// Insert a business prospect; returns its row id.
    pub fn insert_business(&self, business: &Business) -> Result<BusinessId> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO businesses (name, website, category, email, phone, address, rating, review_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                business.name,
                business.website,
                business.category,
                business.email,
                business.phone,
                business.address,
                business.rating,
                business.review_count,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a fresh `Pending` path linking a business to a flow.
    pub fn insert_path(&self, flow_id: FlowId, business_id: BusinessId) -> Result<Path> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO paths (business_id, flow_id, status) VALUES (?1, ?2, ?3)",
            params![business_id, flow_id, PathStatus::Pending.as_str()],
        )?;
        Ok(Path::new(conn.last_insert_rowid(), business_id, flow_id))
    }

    /// Fetch a business by id.
    pub fn get_business(&self, id: BusinessId) -> Result<Option<Business>> {
        let conn = self.conn.lock().unwrap();
        let business = conn
            .query_row(
                r#"
                SELECT id, name, website, category, email, phone, address, rating, review_count
                FROM businesses
                WHERE id = ?1
                "#,
                params![id],
                map_business_row,
            )
            .optional()?;
        Ok(business)
    }
}

#[async_trait]
impl FlowStore for SqliteStore {
    async fn find_flow(&self, id: FlowId) -> Result<Option<Flow>> {
        let conn = self.conn.lock().unwrap();
        let flow = conn
            .query_row(
                r#"
                SELECT id, name, status, filters, outreach_template, created_at
                FROM flows
                WHERE id = ?1
                "#,
                params![id],
                map_flow_row,
            )
            .optional()?;
        Ok(flow)
    }

    async fn find_paths_by_flow(&self, flow_id: FlowId) -> Result<Vec<Path>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, business_id, flow_id, status, report, report_approved,
                   outreach_draft, outreach_approved, last_contacted_at, response_status
            FROM paths
            WHERE flow_id = ?1
            ORDER BY id ASC
            "#,
        )?;
        let paths = stmt
            .query_map(params![flow_id], map_path_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    async fn find_path_by_id(&self, id: PathId) -> Result<Option<Path>> {
        let conn = self.conn.lock().unwrap();
        let path = conn
            .query_row(
                r#"
                SELECT id, business_id, flow_id, status, report, report_approved,
                       outreach_draft, outreach_approved, last_contacted_at, response_status
                FROM paths
                WHERE id = ?1
                "#,
                params![id],
                map_path_row,
            )
            .optional()?;
        Ok(path)
    }

    async fn save_path(&self, path: &Path) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"
            UPDATE paths
            SET status = ?1, report = ?2, report_approved = ?3,
                outreach_draft = ?4, outreach_approved = ?5,
                last_contacted_at = ?6, response_status = ?7
            WHERE id = ?8
            "#,
            params![
                path.status.as_str(),
                path.report,
                path.report_approved,
                path.outreach_draft,
                path.outreach_approved,
                path.last_contacted_at.map(|dt| dt.to_rfc3339()),
                path.response_status.map(|r| r.as_str()),
                path.id,
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("path {} does not exist", path.id));
        }
        Ok(())
    }

    async fn create_flow(
        &self,
        name: &str,
        filters: Value,
        outreach_template: &str,
    ) -> Result<Flow> {
        let created_at = Local::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO flows (name, status, filters, outreach_template, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                name,
                FlowStatus::InProgress.as_str(),
                serde_json::to_string(&filters)?,
                outreach_template,
                created_at.to_rfc3339(),
            ],
        )?;
        Ok(Flow {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            status: FlowStatus::InProgress,
            filters,
            outreach_template: outreach_template.to_string(),
            created_at,
        })
    }

    async fn save_flow(&self, flow: &Flow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"
            UPDATE flows
            SET name = ?1, status = ?2, filters = ?3, outreach_template = ?4
            WHERE id = ?5
            "#,
            params![
                flow.name,
                flow.status.as_str(),
                serde_json::to_string(&flow.filters)?,
                flow.outreach_template,
                flow.id,
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("flow {} does not exist", flow.id));
        }
        Ok(())
    }

    async fn list_flows_by_status(&self, status: FlowStatus) -> Result<Vec<Flow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, status, filters, outreach_template, created_at
            FROM flows
            WHERE status = ?1
            ORDER BY id ASC
            "#,
        )?;
        let flows = stmt
            .query_map(params![status.as_str()], map_flow_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(flows)
    }
}

// Helper functions for mapping between database and Rust types

fn text_conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn text_parse_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, message.into())
}

fn parse_local_datetime(s: &str, column: usize) -> rusqlite::Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| text_conversion_error(column, e))
}

/// Map a database row to a Flow
fn map_flow_row(row: &Row) -> rusqlite::Result<Flow> {
    let status_str: String = row.get(2)?;
    let filters_str: String = row.get(3)?;
    let created_at_str: String = row.get(5)?;

    let status = FlowStatus::parse(&status_str)
        .ok_or_else(|| text_parse_error(2, format!("unknown flow status: {status_str}")))?;
    let filters: Value =
        serde_json::from_str(&filters_str).map_err(|e| text_conversion_error(3, e))?;

    Ok(Flow {
        id: row.get(0)?,
        name: row.get(1)?,
        status,
        filters,
        outreach_template: row.get(4)?,
        created_at: parse_local_datetime(&created_at_str, 5)?,
    })
}

/// Map a database row to a Path.
///
/// A NULL status (possible for rows written before the status column was
/// populated) is normalized to `Pending` so the executor always sees a valid
/// state.
fn map_path_row(row: &Row) -> rusqlite::Result<Path> {
    let id: PathId = row.get(0)?;
    let status_str: Option<String> = row.get(3)?;
    let last_contacted_str: Option<String> = row.get(8)?;
    let response_str: Option<String> = row.get(9)?;

    let status = match status_str {
        None => {
            warn!(path = id, "path missing status; defaulting to Pending");
            PathStatus::Pending
        }
        Some(s) => PathStatus::parse(&s)
            .ok_or_else(|| text_parse_error(3, format!("unknown path status: {s}")))?,
    };

    let last_contacted_at = last_contacted_str
        .map(|s| parse_local_datetime(&s, 8))
        .transpose()?;
    let response_status = response_str
        .map(|s| {
            ResponseStatus::parse(&s)
                .ok_or_else(|| text_parse_error(9, format!("unknown response status: {s}")))
        })
        .transpose()?;

    Ok(Path {
        id,
        business_id: row.get(1)?,
        flow_id: row.get(2)?,
        status,
        report: row.get(4)?,
        report_approved: row.get(5)?,
        outreach_draft: row.get(6)?,
        outreach_approved: row.get(7)?,
        last_contacted_at,
        response_status,
    })
}

/// Map a database row to a Business
fn map_business_row(row: &Row) -> rusqlite::Result<Business> {
    Ok(Business {
        id: row.get(0)?,
        name: row.get(1)?,
        website: row.get(2)?,
        category: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        address: row.get(6)?,
        rating: row.get(7)?,
        review_count: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_business(name: &str) -> Business {
        Business {
            id: 0,
            name: name.to_string(),
            website: Some("https://example.com".to_string()),
            category: Some("bakery".to_string()),
            email: Some("owner@example.com".to_string()),
            phone: None,
            address: None,
            rating: Some(4.5),
            review_count: Some(120),
        }
    }

    fn store_with_schema() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize_schema().unwrap();
        store
    }

    #[tokio::test]
    async fn flow_round_trip() {
        let store = store_with_schema();
        let flow = store
            .create_flow(
                "bakeries",
                serde_json::json!({"city": "Ghent"}),
                "Hello {business}",
            )
            .await
            .unwrap();

        let loaded = store.find_flow(flow.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "bakeries");
        assert_eq!(loaded.status, FlowStatus::InProgress);
        assert_eq!(loaded.filters["city"], "Ghent");

        assert!(store.find_flow(flow.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn path_round_trip_and_update() {
        let store = store_with_schema();
        let flow = store
            .create_flow("flow", Value::Null, "template")
            .await
            .unwrap();
        let business_id = store.insert_business(&sample_business("Bread & Co")).unwrap();
        let path = store.insert_path(flow.id, business_id).unwrap();

        let mut loaded = store.find_path_by_id(path.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PathStatus::Pending);
        assert_eq!(loaded.business_id, business_id);

        loaded.status = PathStatus::AwaitingReportApproval;
        loaded.report = Some("report text".to_string());
        loaded.last_contacted_at = Some(Local::now());
        loaded.response_status = Some(ResponseStatus::Interested);
        store.save_path(&loaded).await.unwrap();

        let reloaded = store.find_path_by_id(path.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, PathStatus::AwaitingReportApproval);
        assert_eq!(reloaded.report.as_deref(), Some("report text"));
        assert!(reloaded.last_contacted_at.is_some());
        assert_eq!(reloaded.response_status, Some(ResponseStatus::Interested));
    }

    #[tokio::test]
    async fn save_path_rejects_unknown_id() {
        let store = store_with_schema();
        let path = Path::new(99, 1, 1);
        assert!(store.save_path(&path).await.is_err());
    }

    #[tokio::test]
    async fn null_status_is_normalized_to_pending() {
        let store = store_with_schema();
        let flow = store
            .create_flow("flow", Value::Null, "template")
            .await
            .unwrap();
        let business_id = store.insert_business(&sample_business("B")).unwrap();
        let path = store.insert_path(flow.id, business_id).unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE paths SET status = NULL WHERE id = ?1",
                params![path.id],
            )
            .unwrap();
        }

        let loaded = store.find_path_by_id(path.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PathStatus::Pending);
    }

    #[tokio::test]
    async fn list_flows_filters_by_status() {
        let store = store_with_schema();
        let active = store
            .create_flow("active", Value::Null, "t")
            .await
            .unwrap();
        let mut paused = store
            .create_flow("paused", Value::Null, "t")
            .await
            .unwrap();
        paused.status = FlowStatus::Paused;
        store.save_flow(&paused).await.unwrap();

        let in_progress = store
            .list_flows_by_status(FlowStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, active.id);

        let paused_flows = store.list_flows_by_status(FlowStatus::Paused).await.unwrap();
        assert_eq!(paused_flows.len(), 1);
    }

    #[tokio::test]
    async fn database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("outreach.db");

        let flow_id = {
            let store = SqliteStore::new(db_path.clone()).unwrap();
            store.initialize_schema().unwrap();
            let flow = store
                .create_flow("persisted", Value::Null, "t")
                .await
                .unwrap();
            let business_id = store.insert_business(&sample_business("B")).unwrap();
            store.insert_path(flow.id, business_id).unwrap();
            flow.id
        };

        let store = SqliteStore::new(db_path).unwrap();
        store.initialize_schema().unwrap();
        let flow = store.find_flow(flow_id).await.unwrap().unwrap();
        assert_eq!(flow.name, "persisted");
        assert_eq!(store.find_paths_by_flow(flow_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn business_round_trip() {
        let store = store_with_schema();
        let id = store.insert_business(&sample_business("Bread & Co")).unwrap();
        let loaded = store.get_business(id).unwrap().unwrap();
        assert_eq!(loaded.name, "Bread & Co");
        assert_eq!(loaded.rating, Some(4.5));
        assert!(store.get_business(id + 1).unwrap().is_none());
    }
}

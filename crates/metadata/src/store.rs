//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{NodeRow, timestamp_nanos};
use crate::repos::{NodeQuery, NodeRepo, Visibility};
use async_trait::async_trait;
use shoal_core::acl::PUBLIC;
use shoal_core::{Node, NodeId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: NodeRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection serializes writers.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        if let Some(secs) = query_timeout_secs {
            tracing::debug!(
                query_timeout_secs = secs,
                "SQLite query timeout is advisory only"
            );
        }

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Append `AND ...` clauses for every set field of `query`.
fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &NodeQuery) {
    if let Some(ids) = &query.ids {
        if ids.is_empty() {
            qb.push(" AND 1=0");
        } else {
            qb.push(" AND id IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");
        }
    }
    if let Some(part) = &query.references_part {
        qb.push(" AND id IN (SELECT node_id FROM node_virtual_parts WHERE part_id = ")
            .push_bind(part.to_string())
            .push(")");
    }
    if let Some(path) = &query.file_path {
        qb.push(" AND file_path = ").push_bind(path.clone());
    }
    if let Some(at) = query.expired_before {
        qb.push(" AND expiration IS NOT NULL AND expiration <= ")
            .push_bind(at.unix_timestamp());
    }
    if let Some(tag) = &query.tag {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(nodes.document, '$.tags') WHERE value = ")
            .push_bind(tag.clone())
            .push(")");
    }
    if let Some(node_type) = &query.node_type {
        qb.push(" AND node_type = ").push_bind(node_type.clone());
    }
    if let Visibility::ReadableBy(caller) = &query.visibility {
        qb.push(" AND (owner IS NULL OR EXISTS (SELECT 1 FROM json_each(nodes.document, '$.acl.read') WHERE value = ")
            .push_bind(PUBLIC);
        if let Some(caller) = caller {
            qb.push(" OR value = ")
                .push_bind(caller.clone())
                .push(") OR owner = ")
                .push_bind(caller.clone())
                .push(")");
        } else {
            qb.push("))");
        }
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl NodeRepo for SqliteStore {
    #[tracing::instrument(skip(self, node), fields(node_id = %node.id))]
    async fn upsert_node(&self, node: &Node) -> MetadataResult<()> {
        let row = NodeRow::from_node(node)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO nodes (id, node_type, owner, file_path, expiration, created_on, document)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                node_type = excluded.node_type,
                owner = excluded.owner,
                file_path = excluded.file_path,
                expiration = excluded.expiration,
                document = excluded.document
            "#,
        )
        .bind(&row.id)
        .bind(&row.node_type)
        .bind(&row.owner)
        .bind(&row.file_path)
        .bind(row.expiration)
        .bind(row.created_on)
        .bind(&row.document)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM node_virtual_parts WHERE node_id = ?")
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;

        if node.is_virtual() {
            for part in &node.file.virtual_parts {
                sqlx::query(
                    "INSERT OR IGNORE INTO node_virtual_parts (node_id, part_id) VALUES (?, ?)",
                )
                .bind(&row.id)
                .bind(part.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> MetadataResult<Option<Node>> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(NodeRow::into_node).transpose()
    }

    async fn find_nodes(
        &self,
        query: &NodeQuery,
        limit: u64,
        offset: u64,
    ) -> MetadataResult<(Vec<Node>, u64)> {
        let total = self.count_nodes(query).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM nodes WHERE 1=1");
        push_filters(&mut qb, query);
        qb.push(" ORDER BY created_on DESC, id LIMIT ")
            .push_bind(clamp(limit))
            .push(" OFFSET ")
            .push_bind(clamp(offset));

        let rows = qb
            .build_query_as::<NodeRow>()
            .fetch_all(&self.pool)
            .await?;
        let nodes = rows
            .into_iter()
            .map(NodeRow::into_node)
            .collect::<MetadataResult<Vec<_>>>()?;
        Ok((nodes, total))
    }

    async fn count_nodes(&self, query: &NodeQuery) -> MetadataResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM nodes WHERE 1=1");
        push_filters(&mut qb, query);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    #[tracing::instrument(skip(self), fields(node_id = %id))]
    async fn delete_node(&self, id: &NodeId) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("node {id} not found")));
        }
        Ok(())
    }
}


const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    node_type TEXT NOT NULL DEFAULT '',
    owner TEXT,
    file_path TEXT,
    expiration INTEGER,
    created_on INTEGER NOT NULL,
    document TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_created_on ON nodes(created_on);
CREATE INDEX IF NOT EXISTS idx_nodes_expiration ON nodes(expiration) WHERE expiration IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_nodes_file_path ON nodes(file_path) WHERE file_path IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_nodes_owner ON nodes(owner);

CREATE TABLE IF NOT EXISTS node_virtual_parts (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    part_id TEXT NOT NULL,
    PRIMARY KEY (node_id, part_id)
);

CREATE INDEX IF NOT EXISTS idx_node_virtual_parts_part ON node_virtual_parts(part_id);
"#;

//! PostgreSQL repository. Tables live in a configurable schema (default `repository`); every
//! transaction runs SERIALIZABLE so concurrent writers surface as retryable serialization failures.

use crate::error::{ApiError, ConfigError};
use crate::store::{
    evaluate_acl, merge_properties, AccessControlEntry, AccessStatus, ContentData, ContentReader, NewNode, Node,
    NodeRef, Permission, Repository, RepositoryTx,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::Postgres;
use sqlx::{ConnectOptions, PgPool, Transaction};
use std::io::Cursor;
use std::str::FromStr;
use uuid::Uuid;

const NODE_COLUMNS: &str = "id, parent_id, name, node_type, properties, aspects, working_copy_of, version, modified_at";

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: Uuid,
    parent_id: Option<Uuid>,
    name: String,
    node_type: String,
    properties: Value,
    aspects: Vec<String>,
    working_copy_of: Option<Uuid>,
    version: i64,
    modified_at: DateTime<Utc>,
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        let properties = match row.properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Node {
            id: NodeRef(row.id),
            parent_id: row.parent_id.map(NodeRef),
            name: row.name,
            node_type: row.node_type,
            properties,
            aspects: row.aspects.into_iter().collect(),
            working_copy_of: row.working_copy_of.map(NodeRef),
            version: row.version,
            modified_at: row.modified_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ContentRow {
    mimetype: String,
    encoding: String,
    size: i64,
    modified_at: DateTime<Utc>,
}

impl From<ContentRow> for ContentData {
    fn from(row: ContentRow) -> Self {
        ContentData {
            mimetype: row.mimetype,
            encoding: row.encoding,
            size: row.size.max(0) as u64,
            modified_at: row.modified_at,
        }
    }
}

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
    schema: String,
}

impl PgRepository {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), table)
}

/// Create the schema and the node, content, ACL and reference tables if missing.
pub async fn ensure_repository_tables(pool: &PgPool, schema: &str) -> Result<(), ApiError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))
        .execute(pool)
        .await?;

    let nodes = qualified(schema, "nodes");
    let statements = [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {nodes} (
                id UUID PRIMARY KEY,
                parent_id UUID REFERENCES {nodes}(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                node_type TEXT NOT NULL,
                properties JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                aspects TEXT[] NOT NULL DEFAULT '{{}}',
                working_copy_of UUID REFERENCES {nodes}(id) ON DELETE CASCADE,
                version BIGINT NOT NULL DEFAULT 1,
                modified_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS nodes_parent_name ON {nodes} \
             ((COALESCE(parent_id, '00000000-0000-0000-0000-000000000000'::uuid)), name) \
             WHERE working_copy_of IS NULL"
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                node_id UUID NOT NULL REFERENCES {nodes}(id) ON DELETE CASCADE,
                property TEXT NOT NULL,
                data BYTEA NOT NULL,
                mimetype TEXT NOT NULL,
                encoding TEXT NOT NULL,
                size BIGINT NOT NULL,
                modified_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (node_id, property)
            )
            "#,
            qualified(schema, "node_content")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                node_id UUID NOT NULL REFERENCES {nodes}(id) ON DELETE CASCADE,
                authority TEXT NOT NULL,
                permission TEXT NOT NULL,
                allowed BOOLEAN NOT NULL,
                PRIMARY KEY (node_id, authority, permission)
            )
            "#,
            qualified(schema, "node_acl")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                source_id UUID NOT NULL REFERENCES {nodes}(id) ON DELETE CASCADE,
                target_id UUID NOT NULL REFERENCES {nodes}(id) ON DELETE CASCADE,
                PRIMARY KEY (source_id, target_id)
            )
            "#,
            qualified(schema, "node_refs")
        ),
    ];
    for ddl in statements.iter() {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

#[async_trait]
impl Repository for PgRepository {
    async fn begin(&self, read_only: bool, user: &str) -> Result<Box<dyn RepositoryTx>, ApiError> {
        let mut tx = self.pool.begin().await?;
        let mode = if read_only {
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE READ ONLY"
        } else {
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        };
        sqlx::query(mode).execute(&mut *tx).await?;
        Ok(Box::new(PgTx {
            tx,
            schema: self.schema.clone(),
            read_only,
            user: user.to_string(),
        }))
    }

    async fn open_content(&self, node: NodeRef, property: &str) -> Result<Option<ContentReader>, ApiError> {
        let sql = format!(
            "SELECT data FROM {} WHERE node_id = $1 AND property = $2",
            qualified(&self.schema, "node_content")
        );
        let row: Option<(Vec<u8>,)> = sqlx::query_as(&sql)
            .bind(node.0)
            .bind(property)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(data,)| {
            let reader: ContentReader = Box::pin(Cursor::new(data));
            reader
        }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    schema: String,
    read_only: bool,
    user: String,
}

impl PgTx {
    fn table(&self, name: &str) -> String {
        qualified(&self.schema, name)
    }

    fn ensure_writable(&self, operation: &str) -> Result<(), ApiError> {
        if self.read_only {
            return Err(ApiError::ReadOnlyTransaction(operation.to_string()));
        }
        Ok(())
    }

    async fn existing(&mut self, id: NodeRef) -> Result<Node, ApiError> {
        self.get_node(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("node {}", id)))
    }

    async fn touch(&mut self, id: NodeRef) -> Result<(), ApiError> {
        let sql = format!(
            "UPDATE {} SET version = version + 1, modified_at = NOW() WHERE id = $1",
            self.table("nodes")
        );
        sqlx::query(&sql).bind(id.0).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn acl_levels(&mut self, id: NodeRef) -> Result<Option<Vec<Vec<AccessControlEntry>>>, ApiError> {
        let sql = format!(
            r#"
            WITH RECURSIVE chain(id, parent_id, depth) AS (
                SELECT id, parent_id, 0 FROM {nodes} WHERE id = $1
                UNION ALL
                SELECT n.id, n.parent_id, c.depth + 1 FROM {nodes} n JOIN chain c ON n.id = c.parent_id
            )
            SELECT c.depth, a.authority, a.permission, a.allowed
            FROM chain c LEFT JOIN {acl} a ON a.node_id = c.id
            ORDER BY c.depth
            "#,
            nodes = self.table("nodes"),
            acl = self.table("node_acl")
        );
        let rows: Vec<(i32, Option<String>, Option<String>, Option<bool>)> =
            sqlx::query_as(&sql).bind(id.0).fetch_all(&mut *self.tx).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut levels: Vec<Vec<AccessControlEntry>> = Vec::new();
        let mut current_depth = -1;
        for (depth, authority, permission, allowed) in rows {
            if depth != current_depth {
                levels.push(Vec::new());
                current_depth = depth;
            }
            if let (Some(authority), Some(permission), Some(allowed), Some(level)) =
                (authority, permission, allowed, levels.last_mut())
            {
                level.push(AccessControlEntry {
                    authority,
                    permission,
                    allowed,
                });
            }
        }
        Ok(Some(levels))
    }
}

#[async_trait]
impl RepositoryTx for PgTx {
    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn user(&self) -> &str {
        &self.user
    }

    async fn get_node(&mut self, id: NodeRef) -> Result<Option<Node>, ApiError> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", NODE_COLUMNS, self.table("nodes"));
        let row: Option<NodeRow> = sqlx::query_as(&sql).bind(id.0).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(Node::from))
    }

    async fn children(&mut self, parent: Option<NodeRef>) -> Result<Vec<Node>, ApiError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE parent_id IS NOT DISTINCT FROM $1 AND working_copy_of IS NULL ORDER BY name",
            NODE_COLUMNS,
            self.table("nodes")
        );
        tracing::debug!(sql = %sql, "query");
        let rows: Vec<NodeRow> = sqlx::query_as(&sql)
            .bind(parent.map(|p| p.0))
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(Node::from).collect())
    }

    async fn child_by_name(&mut self, parent: Option<NodeRef>, name: &str) -> Result<Option<Node>, ApiError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE parent_id IS NOT DISTINCT FROM $1 AND name = $2 AND working_copy_of IS NULL",
            NODE_COLUMNS,
            self.table("nodes")
        );
        let row: Option<NodeRow> = sqlx::query_as(&sql)
            .bind(parent.map(|p| p.0))
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Node::from))
    }

    async fn working_copy(&mut self, original: NodeRef) -> Result<Option<Node>, ApiError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE working_copy_of = $1 LIMIT 1",
            NODE_COLUMNS,
            self.table("nodes")
        );
        let row: Option<NodeRow> = sqlx::query_as(&sql)
            .bind(original.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Node::from))
    }

    async fn create_node(&mut self, node: NewNode) -> Result<Node, ApiError> {
        self.ensure_writable("create node")?;
        if let Some(parent) = node.parent_id {
            self.existing(parent).await?;
        }
        let sql = format!(
            "INSERT INTO {} (id, parent_id, name, node_type, properties, aspects, working_copy_of) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            self.table("nodes"),
            NODE_COLUMNS
        );
        tracing::debug!(sql = %sql, "query");
        let aspects: Vec<String> = node.aspects.into_iter().collect();
        let row: NodeRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(node.parent_id.map(|p| p.0))
            .bind(&node.name)
            .bind(&node.node_type)
            .bind(Value::Object(node.properties))
            .bind(&aspects)
            .bind(node.working_copy_of.map(|w| w.0))
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.into())
    }

    async fn update_node(
        &mut self,
        id: NodeRef,
        name: Option<String>,
        properties: Map<String, Value>,
    ) -> Result<Node, ApiError> {
        self.ensure_writable("update node")?;
        let mut node = self.existing(id).await?;
        merge_properties(&mut node.properties, properties);
        let sql = format!(
            "UPDATE {} SET name = $2, properties = $3, version = version + 1, modified_at = NOW() \
             WHERE id = $1 RETURNING {}",
            self.table("nodes"),
            NODE_COLUMNS
        );
        tracing::debug!(sql = %sql, "query");
        let row: NodeRow = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(name.unwrap_or(node.name))
            .bind(Value::Object(node.properties))
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.into())
    }

    async fn delete_node(&mut self, id: NodeRef) -> Result<(), ApiError> {
        self.ensure_writable("delete node")?;
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table("nodes"));
        let result = sqlx::query(&sql).bind(id.0).execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("node {}", id)));
        }
        Ok(())
    }

    async fn content(&mut self, id: NodeRef, property: &str) -> Result<Option<ContentData>, ApiError> {
        let sql = format!(
            "SELECT mimetype, encoding, size, modified_at FROM {} WHERE node_id = $1 AND property = $2",
            self.table("node_content")
        );
        let row: Option<ContentRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(property)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(ContentData::from))
    }

    async fn read_content(&mut self, id: NodeRef, property: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let sql = format!(
            "SELECT data FROM {} WHERE node_id = $1 AND property = $2",
            self.table("node_content")
        );
        let row: Option<(Vec<u8>,)> = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(property)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|(data,)| data))
    }

    async fn write_content(
        &mut self,
        id: NodeRef,
        property: &str,
        data: Vec<u8>,
        mimetype: &str,
        encoding: &str,
    ) -> Result<ContentData, ApiError> {
        self.ensure_writable("write content")?;
        self.existing(id).await?;
        let sql = format!(
            r#"
            INSERT INTO {} (node_id, property, data, mimetype, encoding, size, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (node_id, property) DO UPDATE SET
                data = EXCLUDED.data, mimetype = EXCLUDED.mimetype, encoding = EXCLUDED.encoding,
                size = EXCLUDED.size, modified_at = EXCLUDED.modified_at
            RETURNING mimetype, encoding, size, modified_at
            "#,
            self.table("node_content")
        );
        let size = data.len() as i64;
        let row: ContentRow = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(property)
            .bind(data)
            .bind(mimetype)
            .bind(encoding)
            .bind(size)
            .fetch_one(&mut *self.tx)
            .await?;
        self.touch(id).await?;
        Ok(row.into())
    }

    async fn delete_content(&mut self, id: NodeRef, property: &str) -> Result<bool, ApiError> {
        self.ensure_writable("delete content")?;
        self.existing(id).await?;
        let sql = format!(
            "DELETE FROM {} WHERE node_id = $1 AND property = $2",
            self.table("node_content")
        );
        let result = sqlx::query(&sql).bind(id.0).bind(property).execute(&mut *self.tx).await?;
        let removed = result.rows_affected() > 0;
        if removed {
            self.touch(id).await?;
        }
        Ok(removed)
    }

    async fn references(&mut self, source: NodeRef) -> Result<Vec<NodeRef>, ApiError> {
        let sql = format!(
            "SELECT target_id FROM {} WHERE source_id = $1 ORDER BY target_id",
            self.table("node_refs")
        );
        let rows: Vec<(Uuid,)> = sqlx::query_as(&sql).bind(source.0).fetch_all(&mut *self.tx).await?;
        Ok(rows.into_iter().map(|(id,)| NodeRef(id)).collect())
    }

    async fn add_reference(&mut self, source: NodeRef, target: NodeRef) -> Result<(), ApiError> {
        self.ensure_writable("add reference")?;
        self.existing(source).await?;
        self.existing(target).await?;
        let sql = format!(
            "INSERT INTO {} (source_id, target_id) VALUES ($1, $2)",
            self.table("node_refs")
        );
        sqlx::query(&sql)
            .bind(source.0)
            .bind(target.0)
            .execute(&mut *self.tx)
            .await?;
        self.touch(source).await
    }

    async fn remove_reference(&mut self, source: NodeRef, target: NodeRef) -> Result<bool, ApiError> {
        self.ensure_writable("remove reference")?;
        self.existing(source).await?;
        let sql = format!(
            "DELETE FROM {} WHERE source_id = $1 AND target_id = $2",
            self.table("node_refs")
        );
        let result = sqlx::query(&sql)
            .bind(source.0)
            .bind(target.0)
            .execute(&mut *self.tx)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            self.touch(source).await?;
        }
        Ok(removed)
    }

    async fn has_permission(&mut self, id: NodeRef, permission: Permission) -> Result<AccessStatus, ApiError> {
        let user = self.user.clone();
        Ok(match self.acl_levels(id).await? {
            Some(levels) => evaluate_acl(&levels, &user, permission),
            None => AccessStatus::Undetermined,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), ApiError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ApiError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Connect to the server's `postgres` database and create the target database when missing.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), ApiError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url).map_err(|e| {
        ConfigError::InvalidSetting {
            key: "DATABASE_URL".into(),
            message: e.to_string(),
        }
    })?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), ApiError> {
    let path_start = url.rfind('/').ok_or_else(|| ConfigError::InvalidSetting {
        key: "DATABASE_URL".into(),
        message: "no database path".into(),
    })? + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_url_targets_postgres_database() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/content?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "content");
    }

    #[test]
    fn url_without_path_is_a_config_error() {
        assert!(matches!(parse_db_name_from_url("localhost"), Err(ApiError::Config(_))));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("repository"), "\"repository\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("repo", "nodes"), "\"repo\".nodes");
    }

    #[test]
    fn non_object_properties_decode_as_empty() {
        let row = NodeRow {
            id: Uuid::new_v4(),
            parent_id: None,
            name: "n".into(),
            node_type: "cm:folder".into(),
            properties: Value::Null,
            aspects: vec!["rma:frozen".into()],
            working_copy_of: None,
            version: 3,
            modified_at: Utc::now(),
        };
        let node = Node::from(row);
        assert!(node.properties.is_empty());
        assert!(node.has_aspect("rma:frozen"));
    }
}

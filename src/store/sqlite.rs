//! SQLite Step Store（sqlx，完全异步）
//!
//! 表结构在连接时以 CREATE TABLE IF NOT EXISTS 建立；不做迁移。
//! step_number 在 (query_id, step_number) 上有唯一约束。

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::model::{
    NewStep, Query, QueryStatus, Step, StepFilter, StepOrder, StepStatus, StepType, StepUpdate,
    Tool,
};
use super::{StepStore, StoreError};

/// SQLite 存储
#[derive(Clone)]
pub struct SqliteStepStore {
    pool: SqlitePool,
}

impl SqliteStepStore {
    /// 连接数据库 URL（如 `sqlite://delve.db`），文件不存在时创建
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options: SqliteConnectOptions = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// 打开本地文件
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let url = format!("sqlite://{}", db_path.as_ref().display());
        Self::connect(&url, 5).await
    }

    /// 从已有连接池创建并确保表存在
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// 共享连接池（搜索缓存复用同一个库）
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queries (
                id TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS steps (
                id TEXT PRIMARY KEY,
                query_id TEXT NOT NULL,
                parent_step_id TEXT,
                step_number INTEGER NOT NULL,
                step_type TEXT NOT NULL,
                tool TEXT NOT NULL,
                instruction TEXT,
                description TEXT NOT NULL,
                output_schema TEXT,
                response TEXT,
                status TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                UNIQUE (query_id, step_number),
                FOREIGN KEY (query_id) REFERENCES queries(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_step_id) REFERENCES steps(id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_steps_query_status ON steps(query_id, status, step_number)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_steps_parent ON steps(parent_step_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn query_from_row(row: &SqliteRow) -> Result<Query, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Query {
        id: row.try_get("id")?,
        value: row.try_get("value")?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        ended_at: row.try_get::<Option<DateTime<Utc>>, _>("ended_at")?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<Step, StoreError> {
    let step_type: String = row.try_get("step_type")?;
    let tool: String = row.try_get("tool")?;
    let status: String = row.try_get("status")?;
    let output_schema: Option<String> = row.try_get("output_schema")?;
    Ok(Step {
        id: row.try_get("id")?,
        query_id: row.try_get("query_id")?,
        parent_step_id: row.try_get("parent_step_id")?,
        step_number: row.try_get("step_number")?,
        step_type: step_type.parse::<StepType>().map_err(StoreError::Corrupt)?,
        tool: Tool::from(tool.as_str()),
        instruction: row.try_get("instruction")?,
        description: row.try_get("description")?,
        // 非法 JSON 视为无 schema 约束
        output_schema: output_schema.and_then(|s| serde_json::from_str(&s).ok()),
        response: row.try_get("response")?,
        status: status.parse::<StepStatus>().map_err(StoreError::Corrupt)?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        ended_at: row.try_get::<Option<DateTime<Utc>>, _>("ended_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl StepStore for SqliteStepStore {
    async fn create_query(&self, value: &str) -> Result<Query, StoreError> {
        let query = Query::new(value);
        sqlx::query(
            "INSERT INTO queries (id, value, status, started_at, ended_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&query.id)
        .bind(&query.value)
        .bind(query.status.as_str())
        .bind(query.started_at)
        .bind(query.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(query)
    }

    async fn get_query(&self, query_id: &str) -> Result<Option<Query>, StoreError> {
        let row = sqlx::query("SELECT * FROM queries WHERE id = ?")
            .bind(query_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(query_from_row).transpose()
    }

    async fn set_query_status(
        &self,
        query_id: &str,
        status: QueryStatus,
    ) -> Result<Query, StoreError> {
        let ended_at = (status == QueryStatus::Completed).then(Utc::now);
        let result =
            sqlx::query("UPDATE queries SET status = ?, ended_at = COALESCE(?, ended_at) WHERE id = ?")
                .bind(status.as_str())
                .bind(ended_at)
                .bind(query_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "Query",
                id: query_id.to_string(),
            });
        }
        self.get_query(query_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "Query",
                id: query_id.to_string(),
            })
    }

    async fn list_queries(&self, limit: usize) -> Result<Vec<Query>, StoreError> {
        let rows = sqlx::query("SELECT * FROM queries ORDER BY started_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(query_from_row).collect()
    }

    async fn create_step(&self, step: NewStep) -> Result<Step, StoreError> {
        let step = step.into_step();
        let output_schema = step.output_schema.as_ref().map(|v| v.to_string());
        let inserted = sqlx::query(
            "INSERT INTO steps (
                id, query_id, parent_step_id, step_number, step_type, tool, instruction,
                description, output_schema, response, status, started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id)
        .bind(&step.query_id)
        .bind(&step.parent_step_id)
        .bind(step.step_number)
        .bind(step.step_type.as_str())
        .bind(step.tool.as_str())
        .bind(&step.instruction)
        .bind(&step.description)
        .bind(output_schema)
        .bind(&step.response)
        .bind(step.status.as_str())
        .bind(step.started_at)
        .bind(step.ended_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(step),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateStepNumber {
                query_id: step.query_id,
                step_number: step.step_number,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_step(&self, step_id: &str) -> Result<Option<Step>, StoreError> {
        let row = sqlx::query("SELECT * FROM steps WHERE id = ?")
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(step_from_row).transpose()
    }

    async fn update_step(&self, step_id: &str, update: StepUpdate) -> Result<Step, StoreError> {
        let result = sqlx::query(
            "UPDATE steps SET
                status = COALESCE(?, status),
                response = COALESCE(?, response),
                started_at = COALESCE(?, started_at),
                ended_at = COALESCE(?, ended_at)
             WHERE id = ?",
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.response)
        .bind(update.started_at)
        .bind(update.ended_at)
        .bind(step_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "Step",
                id: step_id.to_string(),
            });
        }
        self.get_step(step_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "Step",
                id: step_id.to_string(),
            })
    }

    async fn find_steps(&self, filter: &StepFilter) -> Result<Vec<Step>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT s.* FROM steps s WHERE s.query_id = ");
        qb.push_bind(filter.query_id.clone());
        if let Some(step_type) = filter.step_type {
            qb.push(" AND s.step_type = ").push_bind(step_type.as_str());
        }
        if let Some(status) = filter.status {
            qb.push(" AND s.status = ").push_bind(status.as_str());
        }
        if let Some(min) = filter.min_step_number {
            qb.push(" AND s.step_number >= ").push_bind(min);
        }
        if let Some(max) = filter.max_step_number {
            qb.push(" AND s.step_number <= ").push_bind(max);
        }
        if filter.childless {
            qb.push(" AND NOT EXISTS (SELECT 1 FROM steps c WHERE c.parent_step_id = s.id)");
        }
        qb.push(match filter.order {
            StepOrder::Ascending => " ORDER BY s.step_number ASC",
            StepOrder::Descending => " ORDER BY s.step_number DESC",
        });
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(step_from_row).collect()
    }

    async fn count_steps(&self, query_id: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM steps WHERE query_id = ?")
            .bind(query_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn next_step_number(&self, query_id: &str) -> Result<i64, StoreError> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(step_number) FROM steps WHERE query_id = ?")
                .bind(query_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max.map(|n| n + 1).unwrap_or(1))
    }
}

/// SQLite execution journal
///
/// Records every stub state transition in `<root>/journal.db` so a run can be
/// inspected afterwards: which function ran, with what arguments, and how it ended.

use crate::error::Result;
use crate::runtime::stub::CallStub;
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePool}, Row};
use std::path::Path;

/// Journal entry for one execution
#[derive(Debug, Clone, serde::Serialize)]
pub struct JournalEntry {
    pub execution_id: String,
    pub function_name: String,
    pub state: String,
    pub arguments: serde_json::Value,
    pub error: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionJournal {
    pool: SqlitePool,
}

impl ExecutionJournal {
    /// Open (creating if missing) the journal database and its schema
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let journal = Self { pool };
        journal.init_schema().await?;
        tracing::debug!("Opened execution journal: {}", path.display());
        Ok(journal)
    }

    /// Safe to call multiple times (uses IF NOT EXISTS)
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                execution_id TEXT PRIMARY KEY,
                function_name TEXT NOT NULL,
                state TEXT NOT NULL,
                arguments TEXT NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_function
            ON executions(function_name)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record the stub's current state
    ///
    /// Uses UPSERT so the first transition inserts and later ones update in place.
    pub async fn record(&self, stub: &CallStub) -> Result<()> {
        let arguments = serde_json::json!({
            "args": stub.arguments,
            "kwargs": stub.keyword_arguments,
        })
        .to_string();
        let error = stub.state.error().map(|e| e.to_string());
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO executions (execution_id, function_name, state, arguments, error, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(execution_id) DO UPDATE SET
                state = excluded.state,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(stub.execution_id.as_str())
        .bind(&stub.function_name)
        .bind(stub.state.label())
        .bind(&arguments)
        .bind(error.as_deref())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve one execution by id
    pub async fn get(&self, execution_id: &str) -> Result<Option<JournalEntry>> {
        let row = sqlx::query("SELECT * FROM executions WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| entry_from_row(&row)))
    }

    /// All executions of one function, oldest first
    pub async fn list_for_function(&self, function_name: &str) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE function_name = ? ORDER BY started_at, execution_id"
        )
        .bind(function_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(entry_from_row).collect())
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> JournalEntry {
    let execution_id: String = row.get("execution_id");
    let raw: String = row.get("arguments");
    let arguments = serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!("Unreadable arguments for journaled execution {}: {}", execution_id, e);
        serde_json::Value::Null
    });
    JournalEntry {
        execution_id,
        function_name: row.get("function_name"),
        state: row.get("state"),
        arguments,
        error: row.get("error"),
        started_at: row.get("started_at"),
        updated_at: row.get("updated_at"),
    }
}

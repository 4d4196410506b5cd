//! Database resource: a fixed SQLite query rendered as text.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use super::{Resource, ResourceError, ResourceKind};

const MAX_ROWS: usize = 200;

/// Runs one read-only query and hands the rows back as its answer.
///
/// The question does not shape the query; downstream prompts pick out what
/// matters from the rows.
pub struct DatabaseResource {
    unique_name: String,
    name: String,
    path: PathBuf,
    query: String,
}

impl DatabaseResource {
    pub fn new(unique_name: impl Into<String>, path: &Path, query: impl Into<String>) -> Self {
        let unique_name = unique_name.into();
        Self {
            name: unique_name.clone(),
            unique_name,
            path: path.to_path_buf(),
            query: query.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn run<T, F>(&self, job: F) -> Result<T, ResourceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
            job(&conn)
        })
        .await
        .map_err(|e| ResourceError::unavailable(&self.unique_name, e))?;
        outcome.map_err(|e| ResourceError::unavailable(&self.unique_name, e))
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn fetch_rows(conn: &Connection, query: &str) -> rusqlite::Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut stmt = conn.prepare(query)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if out.len() >= MAX_ROWS {
            break;
        }
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(render_value(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok((columns, out))
}

#[async_trait]
impl Resource for DatabaseResource {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Database
    }

    async fn answer(&self, _question: &str, _n_words: usize) -> Result<String, ResourceError> {
        let query = self.query.clone();
        let (columns, rows) = self.run(move |conn| fetch_rows(conn, &query)).await?;
        if rows.is_empty() {
            return Ok(format!("The query on {} returned no rows.", self.name));
        }
        let mut text = columns.join(" | ");
        for row in rows {
            text.push('\n');
            text.push_str(&row.join(" | "));
        }
        Ok(text)
    }

    async fn summarize(&self) -> Result<String, ResourceError> {
        let tables = self
            .run(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(names)
            })
            .await?;
        Ok(format!(
            "SQLite database {} with tables [{}], answering from the query: {}",
            self.name,
            tables.join(", "),
            self.query
        ))
    }
}

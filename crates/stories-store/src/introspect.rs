//! # Stats & Schema Introspection
//!
//! Unfiltered reads: aggregate stats, column reflection and primary-key
//! lookup. None of these go through the compiler.

use rusqlite::types::ValueRef;
use rusqlite::OptionalExtension;
use serde::Serialize;
use serde_json::{Map, Value};
use stories_core::StoryRecord;
use tracing::instrument;

use crate::error::StoreError;
use crate::schema::{story_from_row, STORY_COLUMNS, TABLE_NAME};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub min: Option<String>,
    pub max: Option<String>,
}

/// Body of `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_stories: u64,
    pub unique_authors: u64,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    /// `"YES"` / `"NO"`, as in `information_schema.columns`.
    pub is_nullable: String,
}

/// Body of `GET /api/schema`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaInfo {
    pub table_name: String,
    pub row_count: u64,
    pub columns: Vec<ColumnInfo>,
    pub sample_row: Option<Value>,
}

impl Snapshot {
    #[instrument(skip_all)]
    pub fn stats(&self) -> Result<Stats, StoreError> {
        self.with_conn(|conn| {
            // Timestamps of mixed precision do not sort as text; rank them by
            // julianday and skip values SQLite cannot read as a time.
            let sql = format!(
                "SELECT COUNT(*), COUNT(DISTINCT author),
                    (SELECT created FROM {t} WHERE julianday(created) IS NOT NULL
                        ORDER BY julianday(created) ASC LIMIT 1),
                    (SELECT created FROM {t} WHERE julianday(created) IS NOT NULL
                        ORDER BY julianday(created) DESC LIMIT 1)
                 FROM {t}",
                t = TABLE_NAME
            );
            let stats = conn.query_row(&sql, [], |row| {
                Ok(Stats {
                    total_stories: row.get::<_, i64>(0)? as u64,
                    unique_authors: row.get::<_, i64>(1)? as u64,
                    date_range: DateRange {
                        min: row.get(2)?,
                        max: row.get(3)?,
                    },
                })
            })?;
            Ok(stats)
        })
    }

    #[instrument(skip_all)]
    pub fn schema(&self) -> Result<SchemaInfo, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", TABLE_NAME))?;
            let columns = stmt
                .query_map([], |row| {
                    let not_null: i64 = row.get("notnull")?;
                    Ok(ColumnInfo {
                        column_name: row.get("name")?,
                        data_type: row.get("type")?,
                        is_nullable: if not_null == 0 { "YES" } else { "NO" }.to_string(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(&format!("SELECT * FROM {} LIMIT 1", TABLE_NAME))?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let sample_row = stmt
                .query_row([], |row| {
                    let mut map = Map::new();
                    for (i, name) in names.iter().enumerate() {
                        map.insert(name.clone(), json_value(row.get_ref(i)?));
                    }
                    Ok(Value::Object(map))
                })
                .optional()?;

            Ok(SchemaInfo {
                table_name: TABLE_NAME.to_string(),
                row_count: self.row_count(),
                columns,
                sample_row,
            })
        })
    }

    /// Primary-key lookup. `Ok(None)` is the not-found outcome.
    #[instrument(skip(self))]
    pub fn get_story(&self, id: &str) -> Result<Option<StoryRecord>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM {} WHERE id = ?", STORY_COLUMNS, TABLE_NAME);
            let story = conn.query_row(&sql, [id], story_from_row).optional()?;
            Ok(story)
        })
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Number(n.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

//! Table layout and row mapping for `stories`.

use rusqlite::types::Type;
use rusqlite::Row;
use stories_core::{StoryFormat, StoryRecord};

pub const TABLE_NAME: &str = "stories";

pub const CREATE_TABLE: &str = "
    CREATE TABLE stories (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        author TEXT,
        created TIMESTAMP NOT NULL,
        updated TIMESTAMP NOT NULL,
        center_lon DOUBLE,
        center_lat DOUBLE,
        format TEXT NOT NULL,
        public BOOLEAN,
        height INTEGER,
        width INTEGER,
        description TEXT,
        rate DOUBLE,
        zoom DOUBLE,
        my_framecount INTEGER NOT NULL
    );
    CREATE INDEX idx_stories_created ON stories (julianday(created));
";

/// Last write wins on a duplicate id, same as the upstream loader.
pub const INSERT_STORY: &str = "
    INSERT OR REPLACE INTO stories (
        id, title, author, created, updated,
        center_lon, center_lat, format, public, height, width,
        description, rate, zoom, my_framecount
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
";

/// Columns projected by every story-returning query.
pub const STORY_COLUMNS: &str = "id, title, author, description, created, updated, \
     center_lat, center_lon, format, public, height, width, zoom, rate, my_framecount";

/// Map a row selected with [`STORY_COLUMNS`].
pub fn story_from_row(row: &Row<'_>) -> rusqlite::Result<StoryRecord> {
    let format: String = row.get("format")?;
    let format = format.parse::<StoryFormat>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, Type::Text, e.into())
    })?;

    let lon: Option<f64> = row.get("center_lon")?;
    let lat: Option<f64> = row.get("center_lat")?;
    let (center_lon, center_lat) = match (lon, lat) {
        (Some(lon), Some(lat)) => (Some(lon), Some(lat)),
        _ => (None, None),
    };

    Ok(StoryRecord {
        id: row.get("id")?,
        title: row.get("title")?,
        author: row.get("author")?,
        description: row.get("description")?,
        created: row.get("created")?,
        updated: row.get("updated")?,
        center_lat,
        center_lon,
        format,
        public: row.get("public")?,
        height: row.get("height")?,
        width: row.get("width")?,
        zoom: row.get("zoom")?,
        rate: row.get("rate")?,
        frame_count: row.get("my_framecount")?,
    })
}

//! # Story Records
//!
//! [`RawStory`] is what the scraping pipeline hands us; [`StoryRecord`] is
//! what the store keeps and what the API returns. The JSON projection keeps
//! the column names front ends already depend on (`center_lon`,
//! `center_lat`, `my_framecount`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Media format of a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryFormat {
    /// Side-by-side imagery; the filter language calls this `type:compare`.
    Raw,
    Mp4,
}

impl StoryFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryFormat::Raw => "raw",
            StoryFormat::Mp4 => "mp4",
        }
    }
}

impl fmt::Display for StoryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoryFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(StoryFormat::Raw),
            "mp4" => Ok(StoryFormat::Mp4),
            other => Err(format!("unknown story format '{}'", other)),
        }
    }
}

/// A story as stored and served.
///
/// `center_lon` and `center_lat` are either both set or both `None`;
/// [`RawStory::into_record`] and the store's row mapping both enforce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    /// RFC 3339 UTC, see [`normalize_timestamp`].
    pub created: String,
    pub updated: String,
    pub center_lat: Option<f64>,
    pub center_lon: Option<f64>,
    pub format: StoryFormat,
    #[serde(default)]
    pub public: Option<bool>,
    pub height: Option<i64>,
    pub width: Option<i64>,
    pub zoom: Option<f64>,
    pub rate: Option<f64>,
    #[serde(rename = "my_framecount")]
    pub frame_count: i64,
}

impl StoryRecord {
    /// `(lon, lat)` when the story is geotagged.
    pub fn coordinate(&self) -> Option<(f64, f64)> {
        match (self.center_lon, self.center_lat) {
            (Some(lon), Some(lat)) => Some((lon, lat)),
            _ => None,
        }
    }
}

/// A query result row. `distance_km` is only filled by the structured
/// search path when a geo filter drove the ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryHit {
    #[serde(flatten)]
    pub story: StoryRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl From<StoryRecord> for StoryHit {
    fn from(story: StoryRecord) -> Self {
        Self {
            story,
            distance_km: None,
        }
    }
}

/// One element of the ingestion array produced upstream.
///
/// Either the raw scrape (with a `frames` array) or the preprocessed dump
/// (with `my_framecount`) is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStory {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub center: Option<Vec<f64>>,
    pub format: StoryFormat,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub zoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_framecount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
}

impl RawStory {
    pub fn frame_count(&self) -> i64 {
        match (&self.frames, self.my_framecount) {
            (Some(frames), _) => frames.len() as i64,
            (None, Some(n)) => n,
            (None, None) => 0,
        }
    }

    pub fn into_record(self) -> StoryRecord {
        let frame_count = self.frame_count();
        // Anything other than an exact [lon, lat] pair counts as untagged.
        let (center_lon, center_lat) = match self.center.as_deref() {
            Some([lon, lat]) => (Some(*lon), Some(*lat)),
            _ => (None, None),
        };

        StoryRecord {
            id: self.id,
            title: self.title,
            author: self.author,
            description: self.description,
            created: normalize_timestamp(&self.created),
            updated: normalize_timestamp(&self.updated),
            center_lat,
            center_lon,
            format: self.format,
            public: self.public,
            height: self.height,
            width: self.width,
            zoom: self.zoom,
            rate: self.rate,
            frame_count,
        }
    }
}

/// Normalize a timestamp to RFC 3339 UTC with a `Z` suffix.
///
/// Accepts RFC 3339, naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` (taken as UTC) and
/// bare dates (midnight UTC). Anything else is returned unchanged.
pub fn normalize_timestamp(raw: &str) -> String {
    let value = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true);
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return to_utc_string(naive);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return to_utc_string(naive);
        }
    }

    raw.to_string()
}

fn to_utc_string(naive: NaiveDateTime) -> String {
    Utc.from_utc_datetime(&naive)
        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: serde_json::Value) -> RawStory {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_frame_count_from_frames_array() {
        let story = raw(serde_json::json!({
            "id": "s1", "format": "mp4", "frames": [{}, {}, {}]
        }));
        assert_eq!(story.into_record().frame_count, 3);
    }

    #[test]
    fn test_frame_count_from_preprocessed_field() {
        let story = raw(serde_json::json!({
            "id": "s1", "format": "raw", "my_framecount": 7
        }));
        assert_eq!(story.into_record().frame_count, 7);
    }

    #[test]
    fn test_center_is_all_or_nothing() {
        let tagged = raw(serde_json::json!({
            "id": "s1", "format": "raw", "center": [10.0, 20.0]
        }))
        .into_record();
        assert_eq!(tagged.coordinate(), Some((10.0, 20.0)));

        let malformed = raw(serde_json::json!({
            "id": "s2", "format": "raw", "center": [10.0]
        }))
        .into_record();
        assert_eq!(malformed.center_lon, None);
        assert_eq!(malformed.center_lat, None);
    }

    #[test]
    fn test_normalize_timestamp_forms() {
        assert_eq!(normalize_timestamp("2025-01-01"), "2025-01-01T00:00:00Z");
        assert_eq!(
            normalize_timestamp("2025-01-02T03:04:05"),
            "2025-01-02T03:04:05Z"
        );
        assert_eq!(
            normalize_timestamp("2025-01-02T03:04:05+02:00"),
            "2025-01-02T01:04:05Z"
        );
        assert_eq!(
            normalize_timestamp("2025-01-02 03:04:05.250"),
            "2025-01-02T03:04:05.250Z"
        );
        assert_eq!(normalize_timestamp("last tuesday"), "last tuesday");
    }

    #[test]
    fn test_record_json_uses_wire_names() {
        let record = raw(serde_json::json!({
            "id": "s1", "format": "mp4", "my_framecount": 2
        }))
        .into_record();
        let json = serde_json::to_value(StoryHit::from(record)).unwrap();
        assert_eq!(json["my_framecount"], 2);
        assert_eq!(json["format"], "mp4");
        assert!(json.get("distance_km").is_none());
        assert!(json.get("center_lon").is_some());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("raw".parse::<StoryFormat>(), Ok(StoryFormat::Raw));
        assert_eq!("mp4".parse::<StoryFormat>(), Ok(StoryFormat::Mp4));
        assert!("gif".parse::<StoryFormat>().is_err());
    }
}

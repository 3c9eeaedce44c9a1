//! # Query Executor
//!
//! Binds a [`CompiledQuery`] against a [`Snapshot`]. The data query, the
//! count query and the distinct-author query all render the same `WHERE`
//! text from the same clause list and bind the same values, so `total` is
//! always the size of the full match set that `rows` is a page of.
//!
//! Rows with equal ordering keys come back in whatever order SQLite picks.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use stories_core::{BoundValue, CompiledQuery, StoryHit};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::schema::{story_from_row, STORY_COLUMNS, TABLE_NAME};
use crate::snapshot::Snapshot;

/// Pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

/// Result of [`Snapshot::execute`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub rows: Vec<StoryHit>,
    /// Matches ignoring pagination.
    pub total: u64,
    /// Distinct non-null authors among the matches.
    pub unique_authors: u64,
}

impl Snapshot {
    /// Page of rows, total count and distinct-author count for one query.
    #[instrument(
        skip_all,
        fields(clauses = query.clauses.len(), limit = page.limit, offset = page.offset)
    )]
    pub fn execute(&self, query: &CompiledQuery, page: Page) -> Result<QueryOutcome, StoreError> {
        check_placeholders(query)?;
        debug!("compiled query:\n{}", query.explain());

        self.with_conn(|conn| {
            let rows = fetch_page(conn, query, page)?;
            let total = count_matches(conn, query)?;
            let unique_authors = count_authors(conn, query)?;
            debug!(rows = rows.len(), total, unique_authors, "query done");
            Ok(QueryOutcome {
                rows,
                total,
                unique_authors,
            })
        })
    }

    /// Page of rows only; used by the structured search path.
    #[instrument(skip_all, fields(clauses = query.clauses.len(), limit = page.limit))]
    pub fn fetch(&self, query: &CompiledQuery, page: Page) -> Result<Vec<StoryHit>, StoreError> {
        check_placeholders(query)?;
        debug!("compiled query:\n{}", query.explain());
        self.with_conn(|conn| fetch_page(conn, query, page))
    }
}

fn fetch_page(
    conn: &Connection,
    query: &CompiledQuery,
    page: Page,
) -> Result<Vec<StoryHit>, StoreError> {
    let derived_sql = query
        .derived
        .as_ref()
        .map(|d| format!(", {}", d.select_sql()))
        .unwrap_or_default();
    let sql = format!(
        "SELECT {}{} FROM {} WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
        STORY_COLUMNS,
        derived_sql,
        TABLE_NAME,
        query.where_sql(),
        query.order_by.sql(),
    );

    // Placeholder order: derived column, WHERE clauses, LIMIT, OFFSET.
    let mut values: Vec<Value> = query
        .derived
        .iter()
        .flat_map(|d| d.params.iter())
        .chain(query.where_params())
        .map(to_sql_value)
        .collect();
    values.push(Value::Integer(page.limit as i64));
    values.push(Value::Integer(page.offset as i64));

    let derived_alias = query.derived.as_ref().map(|d| d.alias);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        let distance_km = match derived_alias {
            Some(alias) => row.get(alias)?,
            None => None,
        };
        let mut hit = StoryHit::from(story_from_row(row)?);
        hit.distance_km = distance_km;
        Ok(hit)
    })?;

    let hits = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

fn count_matches(conn: &Connection, query: &CompiledQuery) -> Result<u64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", TABLE_NAME, query.where_sql());
    scalar_count(conn, &sql, query)
}

fn count_authors(conn: &Connection, query: &CompiledQuery) -> Result<u64, StoreError> {
    let sql = format!(
        "SELECT COUNT(DISTINCT author) FROM {} WHERE ({}) AND author IS NOT NULL",
        TABLE_NAME,
        query.where_sql()
    );
    scalar_count(conn, &sql, query)
}

fn scalar_count(conn: &Connection, sql: &str, query: &CompiledQuery) -> Result<u64, StoreError> {
    let values: Vec<Value> = query.where_params().into_iter().map(to_sql_value).collect();
    let n: i64 = conn.query_row(sql, params_from_iter(values.iter()), |row| row.get(0))?;
    Ok(n as u64)
}

fn check_placeholders(query: &CompiledQuery) -> Result<(), StoreError> {
    for clause in &query.clauses {
        let expected = clause.sql.matches('?').count();
        if expected != clause.params.len() {
            return Err(StoreError::InvalidQuery(format!(
                "'{}' has {} placeholders but {} values",
                clause.sql,
                expected,
                clause.params.len()
            )));
        }
    }
    if let Some(derived) = &query.derived {
        if derived.sql.matches('?').count() != derived.params.len() {
            return Err(StoreError::InvalidQuery(format!(
                "derived column '{}' has mismatched values",
                derived.alias
            )));
        }
    }
    Ok(())
}

fn to_sql_value(value: &BoundValue) -> Value {
    match value {
        BoundValue::Text(s) => Value::Text(s.clone()),
        BoundValue::Integer(n) => Value::Integer(*n),
        BoundValue::Real(f) => Value::Real(*f),
        BoundValue::Bool(b) => Value::Integer(i64::from(*b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, at, story};
    use stories_core::{compile, compile_search, geo, parse, Clause, GeoFilter, SearchRequest};

    fn run(snapshot: &Snapshot, filter: &str, page: Page) -> QueryOutcome {
        let parsed = parse(filter);
        let query = compile(&parsed.predicates, &parsed.free_text);
        snapshot.execute(&query, page).unwrap()
    }

    fn ids(outcome: &QueryOutcome) -> Vec<&str> {
        outcome.rows.iter().map(|h| h.story.id.as_str()).collect()
    }

    const ALL: Page = Page {
        limit: 100,
        offset: 0,
    };

    #[test]
    fn test_fixture_after_and_author() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let outcome = run(&snapshot, r#"after:2025-01-01 author:"NASA""#, ALL);
        assert_eq!(ids(&outcome), vec!["c"]);
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.unique_authors, 1);
    }

    #[test]
    fn test_default_order_is_newest_first() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let outcome = run(&snapshot, "", ALL);
        assert_eq!(ids(&outcome), vec!["c", "b", "a"]);
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.unique_authors, 2);
    }

    #[test]
    fn test_total_ignores_pagination() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        for offset in 0..4 {
            let outcome = run(&snapshot, "Story", Page::new(1, offset));
            assert_eq!(outcome.total, 3);
            assert!(outcome.total >= outcome.rows.len() as u64);
            assert_eq!(outcome.rows.len(), usize::from(offset < 3));
        }
        let outcome = run(&snapshot, "Story", Page::new(2, 1));
        assert_eq!(ids(&outcome), vec!["b", "a"]);
    }

    #[test]
    fn test_before_is_strict() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let outcome = run(&snapshot, "before:2025-01-02", ALL);
        assert_eq!(ids(&outcome), vec!["a"]);
    }

    #[test]
    fn test_date_token_with_time_component() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let outcome = run(&snapshot, "after:2025-01-02T12:00:00Z", ALL);
        assert_eq!(ids(&outcome), vec!["c"]);
    }

    #[test]
    fn test_malformed_date_matches_nothing() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let outcome = run(&snapshot, "before:someday", ALL);
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.total, 0);
    }

    #[test]
    fn test_year_only_date_token_matches_nothing() {
        let mut records = fixtures::three_stories();
        records.push(story("old", "2019-06-01T00:00:00Z", Some("USGS")));
        let snapshot = fixtures::snapshot(records);

        for filter in ["after:2024", "before:2024", "after:20240101"] {
            let outcome = run(&snapshot, filter, ALL);
            assert!(outcome.rows.is_empty(), "{} matched {:?}", filter, ids(&outcome));
            assert_eq!(outcome.total, 0);
        }
        assert_eq!(ids(&run(&snapshot, "before:2024-01-01", ALL)), vec!["old"]);
        assert_eq!(ids(&run(&snapshot, "after:2024-01-01", ALL)), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_sub_second_timestamps_order_by_time() {
        let records = vec![
            story("whole", "2025-01-02T03:04:05Z", Some("NASA")),
            story("later", "2025-01-02T03:04:05.250Z", Some("NASA")),
            story("earlier", "2025-01-02T03:04:04.999Z", Some("ESA")),
        ];
        let snapshot = fixtures::snapshot(records);
        let outcome = run(&snapshot, "", ALL);
        assert_eq!(ids(&outcome), vec!["later", "whole", "earlier"]);

        let outcome = run(&snapshot, "after:2025-01-02T03:04:05Z", ALL);
        assert_eq!(ids(&outcome), vec!["later"]);
    }

    #[test]
    fn test_author_is_case_insensitive() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let outcome = run(&snapshot, r#"author:"nasa""#, ALL);
        assert_eq!(ids(&outcome), vec!["c", "a"]);
    }

    #[test]
    fn test_null_authors_are_not_counted() {
        let mut records = fixtures::three_stories();
        records.push(story("d", "2025-01-04T00:00:00Z", None));
        let snapshot = fixtures::snapshot(records);
        let outcome = run(&snapshot, "", ALL);
        assert_eq!(outcome.total, 4);
        assert_eq!(outcome.unique_authors, 2);
    }

    #[test]
    fn test_free_text_searches_description() {
        let mut records = fixtures::three_stories();
        records[1].description = Some("Glacier retreat in the Alps".into());
        let snapshot = fixtures::snapshot(records);
        let outcome = run(&snapshot, "glacier", ALL);
        assert_eq!(ids(&outcome), vec!["b"]);
    }

    #[test]
    fn test_desc_length_bounds_are_strict() {
        let mut records = fixtures::three_stories();
        records[0].description = Some("abcde".into());
        let snapshot = fixtures::snapshot(records);

        assert!(!ids(&run(&snapshot, "desc_length:>5", ALL)).contains(&"a"));
        assert!(!ids(&run(&snapshot, "desc_length:<5", ALL)).contains(&"a"));
        assert_eq!(ids(&run(&snapshot, "desc_length:>4", ALL)), vec!["a"]);
        // Missing descriptions count as length zero.
        assert_eq!(ids(&run(&snapshot, "desc_length:<1", ALL)), vec!["c", "b"]);
    }

    #[test]
    fn test_geo_radius_is_inclusive() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let r = geo::distance_km(10.0, 21.0, 10.0, 20.0);

        let query = |radius_km: f64| CompiledQuery {
            clauses: vec![Clause {
                sql: "geo_distance_km(?, ?, center_lon, center_lat) <= ?",
                params: vec![
                    BoundValue::Real(10.0),
                    BoundValue::Real(21.0),
                    BoundValue::Real(radius_km),
                ],
            }],
            derived: None,
            order_by: stories_core::OrderBy::CreatedDesc,
        };

        let inside = snapshot.execute(&query(r), ALL).unwrap();
        assert_eq!(ids(&inside), vec!["c"]);
        let outside = snapshot.execute(&query(r - 1e-9), ALL).unwrap();
        assert!(outside.rows.is_empty());
    }

    #[test]
    fn test_location_directive_skips_untagged_stories() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let outcome = run(&snapshot, "location:10,20,20000", ALL);
        assert_eq!(ids(&outcome), vec!["c"]);
    }

    #[test]
    fn test_type_directive() {
        let mut records = fixtures::three_stories();
        records[1].format = stories_core::StoryFormat::Mp4;
        let snapshot = fixtures::snapshot(records);
        assert_eq!(ids(&run(&snapshot, "type:mp4", ALL)), vec!["b"]);
        assert_eq!(ids(&run(&snapshot, "type:compare", ALL)), vec!["c", "a"]);
    }

    #[test]
    fn test_structured_geo_orders_by_distance() {
        let records = vec![
            at(story("far", "2025-01-05T00:00:00Z", Some("NASA")), 12.0, 20.0),
            at(story("near", "2025-01-01T00:00:00Z", Some("ESA")), 10.1, 20.0),
            story("untagged", "2025-01-09T00:00:00Z", Some("ESA")),
        ];
        let snapshot = fixtures::snapshot(records);
        let request = SearchRequest {
            geo: Some(GeoFilter {
                lat: 20.0,
                lng: 10.0,
                radius: 500.0,
            }),
            ..Default::default()
        };

        let hits = snapshot.fetch(&compile_search(&request), ALL).unwrap();
        let order: Vec<_> = hits.iter().map(|h| h.story.id.as_str()).collect();
        assert_eq!(order, vec!["near", "far"]);
        let near = hits[0].distance_km.unwrap();
        assert!((near - geo::distance_km(10.0, 20.0, 10.1, 20.0)).abs() < 1e-9);
    }

    #[test]
    fn test_structured_public_filter() {
        let mut records = fixtures::three_stories();
        records[0].public = Some(true);
        records[1].public = Some(false);
        let snapshot = fixtures::snapshot(records);
        let request = SearchRequest {
            public: Some(true),
            ..Default::default()
        };
        let hits = snapshot.fetch(&compile_search(&request), ALL).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].story.id, "a");
        assert_eq!(hits[0].distance_km, None);
    }

    #[test]
    fn test_structured_date_range_is_inclusive() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let request: SearchRequest = serde_json::from_value(serde_json::json!({
            "date": { "start": "2025-01-02", "end": "2025-01-03" }
        }))
        .unwrap();
        let hits = snapshot.fetch(&compile_search(&request), ALL).unwrap();
        let order: Vec<_> = hits.iter().map(|h| h.story.id.as_str()).collect();
        assert_eq!(order, vec!["c", "b"]);
    }

    #[test]
    fn test_mismatched_placeholders_are_an_internal_fault() {
        let snapshot = fixtures::snapshot(fixtures::three_stories());
        let query = CompiledQuery {
            clauses: vec![Clause {
                sql: "format = ?",
                params: vec![],
            }],
            derived: None,
            order_by: stories_core::OrderBy::CreatedDesc,
        };
        let result = snapshot.execute(&query, ALL);
        assert!(matches!(result, Err(StoreError::InvalidQuery(_))));
    }
}

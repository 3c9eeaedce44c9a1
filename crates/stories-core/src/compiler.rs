//! # Query Compiler
//!
//! Maps predicates onto parameterized SQL fragments for the `stories` table.
//! Every value reaches the store through a `?` placeholder and a matching
//! [`BoundValue`]; nothing user-supplied is ever spliced into SQL text.
//!
//! Two entry points share the same clause mapping:
//! - [`compile`] for the filter-string path (`GET /api/all`), always ordered
//!   by `created DESC`;
//! - [`compile_search`] for the structured path (`POST /api/search`), which
//!   adds a `distance_km` column and orders by it when a geo filter is given.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::filter::FilterPredicate;
use crate::model::StoryFormat;

/// Default radius of the structured geo filter, kilometers.
pub const DEFAULT_GEO_RADIUS_KM: f64 = 50.0;

/// `julianday(created) <op> <bound>`, where the bound only reaches
/// `julianday` when the token starts with `YYYY-MM-DD`. Anything else (a bare
/// `2024` would otherwise be read as a Julian day number) compares against
/// NULL and matches nothing. Binds the token twice.
macro_rules! created_cmp {
    ($op:literal) => {
        concat!(
            "julianday(created) ",
            $op,
            " julianday(CASE WHEN ? GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*' THEN ? END)"
        )
    };
}

/// A value bound to one `?` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
}

/// One `WHERE` fragment and the values for its placeholders, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clause {
    pub sql: &'static str,
    pub params: Vec<BoundValue>,
}

/// A computed output column, e.g. the distance to a search point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedColumn {
    pub alias: &'static str,
    pub sql: &'static str,
    pub params: Vec<BoundValue>,
}

impl DerivedColumn {
    /// `<expr> AS <alias>`
    pub fn select_sql(&self) -> String {
        format!("{} AS {}", self.sql, self.alias)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    CreatedDesc,
    DistanceAsc,
}

impl OrderBy {
    pub fn sql(&self) -> &'static str {
        match self {
            OrderBy::CreatedDesc => "julianday(created) DESC",
            OrderBy::DistanceAsc => "distance_km ASC",
        }
    }
}

/// Output of the compiler; built and dropped within one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub clauses: Vec<Clause>,
    pub derived: Option<DerivedColumn>,
    pub order_by: OrderBy,
}

impl CompiledQuery {
    /// Clauses joined with `AND`, or `1=1` when there are none.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            return "1=1".to_string();
        }
        self.clauses
            .iter()
            .map(|c| c.sql)
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Parameters for [`where_sql`](Self::where_sql), in placeholder order.
    pub fn where_params(&self) -> Vec<&BoundValue> {
        self.clauses.iter().flat_map(|c| c.params.iter()).collect()
    }

    pub fn placeholder_count(&self) -> usize {
        self.clauses
            .iter()
            .map(|c| c.sql.matches('?').count())
            .sum()
    }

    /// Human-readable dump used by `stories explain` and debug logs.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        if let Some(derived) = &self.derived {
            let _ = writeln!(out, "SELECT ..., {}  -- {:?}", derived.select_sql(), derived.params);
        }
        let _ = writeln!(out, "WHERE {}", self.where_sql());
        for clause in &self.clauses {
            let _ = writeln!(out, "  {}  -- {:?}", clause.sql, clause.params);
        }
        let _ = write!(out, "ORDER BY {}", self.order_by.sql());
        out
    }
}

/// Body of `POST /api/search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Searched in title, author and description.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub geo: Option<GeoFilter>,
    #[serde(default)]
    pub date: Option<DateFilter>,
    #[serde(default)]
    pub author: Option<String>,
    /// An unknown format is dropped rather than rejected.
    #[serde(default, deserialize_with = "lenient")]
    pub format: Option<StoryFormat>,
    /// A non-boolean value is dropped rather than rejected.
    #[serde(default, deserialize_with = "lenient")]
    pub public: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFilter {
    pub lat: f64,
    pub lng: f64,
    /// Kilometers.
    #[serde(default = "default_radius")]
    pub radius: f64,
}

fn default_radius() -> f64 {
    DEFAULT_GEO_RADIUS_KM
}

/// Inclusive date range; either end may be open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateFilter {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

impl SearchRequest {
    /// Predicates in the order geo, date start, date end, author, format,
    /// public. Empty strings count as absent. Free text is left to
    /// [`compile_search`].
    pub fn predicates(&self) -> Vec<FilterPredicate> {
        let mut predicates = Vec::new();

        if let Some(geo) = &self.geo {
            predicates.push(FilterPredicate::GeoWithin {
                lon: geo.lng,
                lat: geo.lat,
                radius_km: geo.radius,
            });
        }
        if let Some(date) = &self.date {
            if let Some(start) = non_empty(&date.start) {
                predicates.push(FilterPredicate::DateOnOrAfter(start.to_string()));
            }
            if let Some(end) = non_empty(&date.end) {
                predicates.push(FilterPredicate::DateOnOrBefore(end.to_string()));
            }
        }
        if let Some(author) = non_empty(&self.author) {
            predicates.push(FilterPredicate::AuthorContains(author.to_string()));
        }
        if let Some(format) = self.format {
            predicates.push(FilterPredicate::FormatEquals(format));
        }
        if let Some(public) = self.public {
            predicates.push(FilterPredicate::PublicEquals(public));
        }

        predicates
    }
}

/// `Some` when the value deserializes as `T`, `None` otherwise.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Compile the filter-string path. Only the first predicate of each kind is
/// used; free text, when non-empty, is always the last clause.
pub fn compile(predicates: &[FilterPredicate], free_text: &str) -> CompiledQuery {
    let free_text =
        (!free_text.is_empty()).then(|| FilterPredicate::FreeText(free_text.to_string()));

    let mut seen = HashSet::new();
    let clauses = predicates
        .iter()
        .chain(free_text.iter())
        .filter(|p| !matches!(p, FilterPredicate::FreeText(t) if t.is_empty()))
        .filter(|p| seen.insert(p.kind()))
        .map(clause_for)
        .collect();

    CompiledQuery {
        clauses,
        derived: None,
        order_by: OrderBy::CreatedDesc,
    }
}

/// Compile the structured path.
pub fn compile_search(request: &SearchRequest) -> CompiledQuery {
    let text = non_empty(&request.text).unwrap_or("");
    let mut query = compile(&request.predicates(), text);

    if let Some(geo) = &request.geo {
        query.derived = Some(DerivedColumn {
            alias: "distance_km",
            sql: "geo_distance_km(?, ?, center_lon, center_lat)",
            params: vec![BoundValue::Real(geo.lng), BoundValue::Real(geo.lat)],
        });
        query.order_by = OrderBy::DistanceAsc;
    }

    query
}

fn clause_for(predicate: &FilterPredicate) -> Clause {
    use BoundValue::*;

    let (sql, params) = match predicate {
        FilterPredicate::DateBefore(v) => (created_cmp!("<"), date_params(v)),
        FilterPredicate::DateAfter(v) => (created_cmp!(">"), date_params(v)),
        FilterPredicate::DateOnOrAfter(v) => (created_cmp!(">="), date_params(v)),
        FilterPredicate::DateOnOrBefore(v) => (created_cmp!("<="), date_params(v)),
        FilterPredicate::AuthorContains(v) => ("author LIKE ?", vec![Text(like_pattern(v))]),
        FilterPredicate::DescLengthGreaterThan(n) => {
            ("LENGTH(COALESCE(description, '')) > ?", vec![Integer(*n)])
        }
        FilterPredicate::DescLengthLessThan(n) => {
            ("LENGTH(COALESCE(description, '')) < ?", vec![Integer(*n)])
        }
        FilterPredicate::GeoWithin {
            lon,
            lat,
            radius_km,
        } => (
            "geo_distance_km(?, ?, center_lon, center_lat) <= ?",
            vec![Real(*lon), Real(*lat), Real(*radius_km)],
        ),
        FilterPredicate::FormatEquals(f) => ("format = ?", vec![Text(f.as_str().to_string())]),
        FilterPredicate::PublicEquals(b) => ("public = ?", vec![Bool(*b)]),
        FilterPredicate::FreeText(v) => {
            let pattern = like_pattern(v);
            (
                "(title LIKE ? OR author LIKE ? OR description LIKE ?)",
                vec![Text(pattern.clone()), Text(pattern.clone()), Text(pattern)],
            )
        }
    };

    Clause { sql, params }
}

fn date_params(token: &str) -> Vec<BoundValue> {
    vec![BoundValue::Text(token.to_string()), BoundValue::Text(token.to_string())]
}

fn like_pattern(value: &str) -> String {
    format!("%{}%", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;
    use proptest::prelude::*;

    fn placeholders_match(query: &CompiledQuery) -> bool {
        query
            .clauses
            .iter()
            .all(|c| c.sql.matches('?').count() == c.params.len())
            && query
                .derived
                .as_ref()
                .map_or(true, |d| d.sql.matches('?').count() == d.params.len())
    }

    #[test]
    fn test_empty_compiles_to_tautology() {
        let q = compile(&[], "");
        assert!(q.clauses.is_empty());
        assert_eq!(q.where_sql(), "1=1");
        assert_eq!(q.order_by, OrderBy::CreatedDesc);
    }

    #[test]
    fn test_fixture_filter_compiles_in_order() {
        let parsed = parse(r#"after:2025-01-01 author:"NASA""#);
        let q = compile(&parsed.predicates, &parsed.free_text);
        assert_eq!(
            q.where_sql(),
            format!("{} AND author LIKE ?", created_cmp!(">"))
        );
        assert_eq!(
            q.where_params(),
            vec![
                &BoundValue::Text("2025-01-01".into()),
                &BoundValue::Text("2025-01-01".into()),
                &BoundValue::Text("%NASA%".into())
            ]
        );
    }

    #[test]
    fn test_free_text_binds_three_times_and_comes_last() {
        let parsed = parse("type:mp4 ice");
        let q = compile(&parsed.predicates, &parsed.free_text);
        assert_eq!(q.clauses.len(), 2);
        assert_eq!(q.clauses[0].sql, "format = ?");
        assert_eq!(q.clauses[0].params, vec![BoundValue::Text("mp4".into())]);
        assert_eq!(q.clauses[1].params.len(), 3);
        assert!(q.clauses[1]
            .params
            .iter()
            .all(|p| *p == BoundValue::Text("%ice%".into())));
    }

    #[test]
    fn test_only_first_predicate_of_a_kind_is_used() {
        let q = compile(
            &[
                FilterPredicate::DateAfter("2025-01-01".into()),
                FilterPredicate::DateAfter("2020-01-01".into()),
                FilterPredicate::DescLengthLessThan(10),
            ],
            "",
        );
        assert_eq!(q.clauses.len(), 2);
        assert_eq!(q.clauses[0].params, date_params("2025-01-01"));
    }

    #[test]
    fn test_text_path_geo_keeps_created_order() {
        let parsed = parse("location:10,20,5");
        let q = compile(&parsed.predicates, &parsed.free_text);
        assert!(q.derived.is_none());
        assert_eq!(q.order_by, OrderBy::CreatedDesc);
        assert_eq!(
            q.where_params(),
            vec![
                &BoundValue::Real(10.0),
                &BoundValue::Real(20.0),
                &BoundValue::Real(5.0)
            ]
        );
    }

    #[test]
    fn test_structured_geo_orders_by_distance() {
        let request: SearchRequest = serde_json::from_value(serde_json::json!({
            "text": "deforestation",
            "geo": { "lat": -3.0, "lng": -60.0 }
        }))
        .unwrap();
        let q = compile_search(&request);

        assert_eq!(q.order_by, OrderBy::DistanceAsc);
        let derived = q.derived.as_ref().unwrap();
        assert_eq!(
            derived.select_sql(),
            "geo_distance_km(?, ?, center_lon, center_lat) AS distance_km"
        );
        assert_eq!(
            derived.params,
            vec![BoundValue::Real(-60.0), BoundValue::Real(-3.0)]
        );
        // Default radius.
        assert_eq!(q.clauses[0].params[2], BoundValue::Real(DEFAULT_GEO_RADIUS_KM));
        assert!(placeholders_match(&q));
    }

    #[test]
    fn test_structured_dates_are_inclusive() {
        let request = SearchRequest {
            date: Some(DateFilter {
                start: Some("2025-01-01".into()),
                end: Some("2025-12-31".into()),
            }),
            ..Default::default()
        };
        let q = compile_search(&request);
        assert_eq!(
            q.where_sql(),
            format!("{} AND {}", created_cmp!(">="), created_cmp!("<="))
        );
        assert!(placeholders_match(&q));
        assert_eq!(q.order_by, OrderBy::CreatedDesc);
    }

    #[test]
    fn test_structured_empty_strings_are_ignored() {
        let request = SearchRequest {
            text: Some(String::new()),
            author: Some(String::new()),
            public: Some(false),
            ..Default::default()
        };
        let q = compile_search(&request);
        assert_eq!(q.where_sql(), "public = ?");
        assert_eq!(q.where_params(), vec![&BoundValue::Bool(false)]);
    }

    #[test]
    fn test_structured_bad_format_and_public_are_dropped() {
        let request: SearchRequest = serde_json::from_value(serde_json::json!({
            "format": "gif",
            "public": "yes",
            "author": "NASA"
        }))
        .unwrap();
        assert_eq!(request.format, None);
        assert_eq!(request.public, None);

        let q = compile_search(&request);
        assert_eq!(q.where_sql(), "author LIKE ?");
    }

    #[test]
    fn test_structured_valid_format_and_public_are_kept() {
        let request: SearchRequest = serde_json::from_value(serde_json::json!({
            "format": "raw",
            "public": false,
            "date": null
        }))
        .unwrap();
        assert_eq!(request.format, Some(StoryFormat::Raw));
        assert_eq!(request.public, Some(false));
        assert_eq!(compile_search(&request).clauses.len(), 2);
    }

    #[test]
    fn test_date_tokens_bind_through_shape_guard() {
        let q = compile(&[FilterPredicate::DateAfter("2024".into())], "");
        assert!(q.where_sql().contains("GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*'"));
        assert_eq!(q.where_params().len(), 2);
        assert!(placeholders_match(&q));
    }

    #[test]
    fn test_explain_mentions_every_clause() {
        let parsed = parse(r#"before:2025-02-01 desc_length:>5 rivers"#);
        let q = compile(&parsed.predicates, &parsed.free_text);
        let text = q.explain();
        assert!(text.contains(created_cmp!("<")));
        assert!(text.contains("LENGTH(COALESCE(description, '')) > ?"));
        assert!(text.ends_with("ORDER BY julianday(created) DESC"));
    }

    fn directive() -> impl Strategy<Value = String> {
        prop_oneof![
            "[0-9]{4}-[0-9]{2}-[0-9]{2}".prop_map(|d| format!("before:{}", d)),
            "[0-9]{4}-[0-9]{2}-[0-9]{2}".prop_map(|d| format!("after:{}", d)),
            "[A-Za-z ]{1,8}".prop_map(|a| format!("author:\"{}\"", a)),
            (0u32..5000).prop_map(|n| format!("desc_length:>{}", n)),
            (0u32..5000).prop_map(|n| format!("desc_length:<{}", n)),
            (-180i32..180, -90i32..90, 0u32..500)
                .prop_map(|(lon, lat, r)| format!("location:{},{},{}", lon, lat, r)),
            Just("type:mp4".to_string()),
            Just("type:compare".to_string()),
            "[a-z]{1,8}",
        ]
    }

    proptest! {
        #[test]
        fn prop_params_match_placeholders(parts in prop::collection::vec(directive(), 0..10)) {
            let parsed = parse(&parts.join(" "));
            let q = compile(&parsed.predicates, &parsed.free_text);
            prop_assert!(placeholders_match(&q));
            prop_assert_eq!(q.placeholder_count(), q.where_params().len());
        }
    }
}

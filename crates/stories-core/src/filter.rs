//! # Filter Expression Parser
//!
//! Turns the single free-form `filter` string of `/api/all` into structured
//! predicates plus residual free text.
//!
//! Syntax:
//! ```text
//! after:2025-10-01 author:"NASA" desc_length:>100 location:-122.4,37.8,50 type:mp4 wildfire
//! ```
//!
//! | Directive              | Predicate                         |
//! |------------------------|-----------------------------------|
//! | `before:<token>`       | [`FilterPredicate::DateBefore`]   |
//! | `after:<token>`        | [`FilterPredicate::DateAfter`]    |
//! | `author:"<text>"`      | [`FilterPredicate::AuthorContains`] |
//! | `desc_length:>N`       | [`FilterPredicate::DescLengthGreaterThan`] |
//! | `desc_length:<N`       | [`FilterPredicate::DescLengthLessThan`] |
//! | `location:lon,lat,km`  | [`FilterPredicate::GeoWithin`]    |
//! | `type:compare\|mp4`    | [`FilterPredicate::FormatEquals`] |
//!
//! Every directive is searched for independently in the untouched input and
//! only its first occurrence is considered. Matches are then accepted in the
//! table order above; a match whose span overlaps an already accepted one is
//! dropped. Whatever is left once the accepted spans are cut out, trimmed, is
//! the free text.
//!
//! Known quirks, kept on purpose:
//! - a repeated directive is not merged; later occurrences stay in the free text;
//! - a directive whose number does not parse is dropped silently and its text
//!   stays in the free text;
//! - date tokens are not validated here.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::model::StoryFormat;

/// One structured filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPredicate {
    /// `created < token`
    DateBefore(String),
    /// `created > token`
    DateAfter(String),
    /// `created >= token` (structured `date.start`)
    DateOnOrAfter(String),
    /// `created <= token` (structured `date.end`)
    DateOnOrBefore(String),
    AuthorContains(String),
    DescLengthGreaterThan(i64),
    DescLengthLessThan(i64),
    GeoWithin { lon: f64, lat: f64, radius_km: f64 },
    FormatEquals(StoryFormat),
    PublicEquals(bool),
    FreeText(String),
}

/// Predicate discriminant; the compiler keeps at most one predicate per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateKind {
    DateBefore,
    DateAfter,
    DateOnOrAfter,
    DateOnOrBefore,
    Author,
    DescLengthGreater,
    DescLengthLess,
    Geo,
    Format,
    Public,
    FreeText,
}

impl FilterPredicate {
    pub fn kind(&self) -> PredicateKind {
        match self {
            FilterPredicate::DateBefore(_) => PredicateKind::DateBefore,
            FilterPredicate::DateAfter(_) => PredicateKind::DateAfter,
            FilterPredicate::DateOnOrAfter(_) => PredicateKind::DateOnOrAfter,
            FilterPredicate::DateOnOrBefore(_) => PredicateKind::DateOnOrBefore,
            FilterPredicate::AuthorContains(_) => PredicateKind::Author,
            FilterPredicate::DescLengthGreaterThan(_) => PredicateKind::DescLengthGreater,
            FilterPredicate::DescLengthLessThan(_) => PredicateKind::DescLengthLess,
            FilterPredicate::GeoWithin { .. } => PredicateKind::Geo,
            FilterPredicate::FormatEquals(_) => PredicateKind::Format,
            FilterPredicate::PublicEquals(_) => PredicateKind::Public,
            FilterPredicate::FreeText(_) => PredicateKind::FreeText,
        }
    }
}

/// Result of [`parse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFilter {
    /// Extracted predicates, in directive table order.
    pub predicates: Vec<FilterPredicate>,
    /// Residual text, trimmed. Searched across title, author and description.
    pub free_text: String,
}

lazy_static! {
    static ref BEFORE: Regex = Regex::new(r"before:(\S+)").unwrap();
    static ref AFTER: Regex = Regex::new(r"after:(\S+)").unwrap();
    static ref AUTHOR: Regex = Regex::new(r#"author:"([^"]+)""#).unwrap();
    static ref DESC_LENGTH_GT: Regex = Regex::new(r"desc_length:>([0-9]+)").unwrap();
    static ref DESC_LENGTH_LT: Regex = Regex::new(r"desc_length:<([0-9]+)").unwrap();
    static ref LOCATION: Regex =
        Regex::new(r"location:([-0-9.]+),([-0-9.]+),([0-9.]+)").unwrap();
    static ref TYPE: Regex = Regex::new(r"type:(compare|mp4)").unwrap();
}

#[derive(Debug, Clone, Copy)]
enum Directive {
    Before,
    After,
    Author,
    DescLengthGt,
    DescLengthLt,
    Location,
    Type,
}

/// Extraction order. Only matters when spans overlap.
const DIRECTIVES: [Directive; 7] = [
    Directive::Before,
    Directive::After,
    Directive::Author,
    Directive::DescLengthGt,
    Directive::DescLengthLt,
    Directive::Location,
    Directive::Type,
];

impl Directive {
    fn regex(self) -> &'static Regex {
        match self {
            Directive::Before => &BEFORE,
            Directive::After => &AFTER,
            Directive::Author => &AUTHOR,
            Directive::DescLengthGt => &DESC_LENGTH_GT,
            Directive::DescLengthLt => &DESC_LENGTH_LT,
            Directive::Location => &LOCATION,
            Directive::Type => &TYPE,
        }
    }

    /// `None` when a captured number does not parse.
    fn build(self, c: &Captures) -> Option<FilterPredicate> {
        match self {
            Directive::Before => Some(FilterPredicate::DateBefore(c[1].to_string())),
            Directive::After => Some(FilterPredicate::DateAfter(c[1].to_string())),
            Directive::Author => Some(FilterPredicate::AuthorContains(c[1].to_string())),
            Directive::DescLengthGt => {
                c[1].parse().ok().map(FilterPredicate::DescLengthGreaterThan)
            }
            Directive::DescLengthLt => c[1].parse().ok().map(FilterPredicate::DescLengthLessThan),
            Directive::Location => Some(FilterPredicate::GeoWithin {
                lon: c[1].parse().ok()?,
                lat: c[2].parse().ok()?,
                radius_km: c[3].parse().ok()?,
            }),
            Directive::Type => {
                let format = match &c[1] {
                    "compare" => StoryFormat::Raw,
                    _ => StoryFormat::Mp4,
                };
                Some(FilterPredicate::FormatEquals(format))
            }
        }
    }
}

/// Parse a filter string into predicates and free text.
pub fn parse(input: &str) -> ParsedFilter {
    let mut predicates = Vec::new();
    let mut taken: Vec<(usize, usize)> = Vec::new();

    for directive in DIRECTIVES {
        let Some(caps) = directive.regex().captures(input) else {
            continue;
        };
        let Some(span) = caps.get(0).map(|m| (m.start(), m.end())) else {
            continue;
        };
        if taken.iter().any(|&(s, e)| span.0 < e && s < span.1) {
            continue;
        }
        if let Some(predicate) = directive.build(&caps) {
            predicates.push(predicate);
            taken.push(span);
        }
    }

    ParsedFilter {
        predicates,
        free_text: strip_spans(input, taken).trim().to_string(),
    }
}

fn strip_spans(input: &str, mut spans: Vec<(usize, usize)>) -> String {
    spans.sort_unstable();
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    for (start, end) in spans {
        out.push_str(&input[cursor..start]);
        cursor = end;
    }
    out.push_str(&input[cursor..]);
    out
}

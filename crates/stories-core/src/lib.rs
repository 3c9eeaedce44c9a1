//! # stories-core: the pure half of the story viewer
//!
//! Everything in here is synchronous and side-effect free. A request enters
//! either as a free-form filter string or as a structured [`SearchRequest`],
//! and leaves as a [`CompiledQuery`]: an ordered list of parameterized
//! clauses plus an optional derived column and an order-by directive.
//!
//! ```text
//! filter text ──► filter::parse ──► predicates + free text ──┐
//!                                                             ├──► compiler ──► CompiledQuery
//! SearchRequest ─────────────────────────────────────────────┘
//! ```
//!
//! The store crate is the only place a [`CompiledQuery`] gets bound and run.

pub mod compiler;
pub mod filter;
pub mod geo;
pub mod model;

pub use compiler::{
    compile, compile_search, BoundValue, Clause, CompiledQuery, DateFilter, DerivedColumn,
    GeoFilter, OrderBy, SearchRequest,
};
pub use filter::{parse, FilterPredicate, ParsedFilter, PredicateKind};
pub use model::{RawStory, StoryFormat, StoryHit, StoryRecord};

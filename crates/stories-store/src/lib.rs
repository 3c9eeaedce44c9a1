//! # stories-store: the engine
//!
//! A [`Snapshot`] is one immutable, fully loaded copy of the `stories` table
//! (an in-memory SQLite database with a `geo_distance_km` scalar function).
//! [`StoryStore`] is the handle requests go through: it hands out
//! `Arc<Snapshot>` and can swap in a freshly loaded snapshot atomically, so a
//! reader never sees a half-loaded table.
//!
//! Query execution ([`executor`]) and unfiltered reads ([`introspect`]) are
//! both `impl Snapshot` blocks.

pub mod error;
pub mod executor;
pub mod introspect;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use error::StoreError;
pub use executor::{Page, QueryOutcome};
pub use introspect::{ColumnInfo, DateRange, SchemaInfo, Stats};
pub use snapshot::{Snapshot, SnapshotInfo};
pub use store::StoryStore;

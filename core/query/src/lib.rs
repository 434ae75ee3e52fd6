//! MongoDB-style query evaluation over JSON documents.
//!
//! Queries are parsed into a [`Clause`] tree, compiled into a [`Filter`] and
//! run locally. The same tree is handed to the remote side to scope pulls.

pub mod clause;
pub mod eval;
pub mod query;

pub use clause::{Clause, CompareOp, RegexOptions};
pub use eval::{resolve_path, values_equal, Filter};
pub use query::{Document, Query, SortKey};

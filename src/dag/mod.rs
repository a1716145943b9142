// src/dag/mod.rs

//! Task graph representation.
//!
//! [`graph`] holds the immutable, declaration-ordered view of the tasks in a
//! run: leaf detection, downstream lookup, quantifiers, and restriction to
//! the transitive closure of a requested subset.

pub mod graph;

pub use graph::{Task, TaskGraph};

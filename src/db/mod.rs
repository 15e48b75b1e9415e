//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: stored entities returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `wp_mirror::db`; the repository API
//! and the entity types are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewPost, Post, PostFields, RefRecord, RelationSets};

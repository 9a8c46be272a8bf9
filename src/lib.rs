//! Declarative analytics query engine for PostgreSQL-backed dashboards.
//!
//! A widget's `data_config` names a source, dimensions, measures and filters.
//! The engine validates it against a static [`catalog::Catalog`], compiles it
//! into one parameterized aggregate SELECT, runs it through a
//! [`db::QueryStore`] and shapes the rows into a [`shape::ResultTable`].

pub mod ast;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod export;
pub mod query;
pub mod shape;

pub use engine::{Engine, RunOptions};
pub use error::{EngineError, ExecutionError, ValidationError};

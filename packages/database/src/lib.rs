#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database access for the taxi trip pipeline.
//!
//! Two `PostgreSQL` targets are involved: the operational store the trips
//! are extracted from ([`source`]) and the analytical store the enriched
//! airport trips are loaded into ([`destination`]). The analytical store
//! also keeps a durable reverse-geocode cache ([`geocode_cache`]).
//!
//! All statements are raw SQL through `switchy_database`.

pub mod db;
pub mod destination;
pub mod geocode_cache;
pub mod source;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The store could not be reached or the connection settings are invalid.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// The extraction query or a row decode failed.
    #[error("Extraction error: {message}")]
    Extraction {
        /// Description of what went wrong.
        message: String,
    },

    /// Dropping or recreating the destination table failed.
    #[error("Schema reset failed on `{statement}`: {source}")]
    SchemaReset {
        /// Which DDL statement failed.
        statement: &'static str,
        /// Underlying database error.
        source: switchy_database::DatabaseError,
    },

    /// Cached JSON could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

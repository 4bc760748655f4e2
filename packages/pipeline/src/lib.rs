#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! End-to-end risk model run over a loaded study area.
//!
//! [`assemble`] grids the study area and builds the feature table,
//! [`run`] cross-validates the four model variants and evaluates them
//! against the kernel density baseline, and [`export`] writes the result
//! tables. Every stage takes the previous stage's output by reference and
//! returns a new value.

pub mod assemble;
pub mod config;
pub mod export;
pub mod run;

use crime_risk_feature_models::{GroupKind, TableError};
use thiserror::Error;

pub use assemble::{Assembly, assemble};
pub use config::{CityCenter, ModelConfig};
pub use export::{RunSummary, write_outputs};
pub use run::{ModelRun, RunReport, run_models};

/// Errors that can occur during a model run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The model configuration is invalid.
    #[error("Invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// TOML parsing failed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A spatial operation failed.
    #[error("Spatial error: {0}")]
    Spatial(#[from] crime_risk_spatial::SpatialError),

    /// An analytical operation failed.
    #[error("Analytics error: {0}")]
    Analytics(#[from] crime_risk_analytics::AnalyticsError),

    /// Feature table assembly failed.
    #[error("Feature table error: {0}")]
    Table(#[from] TableError),

    /// The configured city-center neighborhood does not exist.
    #[error("City center neighborhood {0:?} not found")]
    MissingCityCenter(String),

    /// The grouping used for LOGO-CV has no polygons.
    #[error("No {0} polygons loaded")]
    MissingGroupLayer(GroupKind),

    /// Too few hot spot cells for the hot-spot distance feature.
    #[error("Found {found} hot spot cells, need at least {required}")]
    TooFewHotSpots {
        /// Hot spots found.
        found: usize,
        /// Neighbors requested.
        required: usize,
    },

    /// Every cell was dropped from the feature table.
    #[error("Feature table is empty after dropping incomplete cells")]
    EmptyTable,
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Fetches the datasets of a study area and turns them into planar layers.
//!
//! Sources are TOML files embedded at compile time (see [`registry`]).
//! Each layer is downloaded by the fetcher its definition names, normalized
//! into geometries using its [`GeometryExtractor`], and projected with a
//! local equirectangular projection so every downstream distance is a plain
//! Euclidean distance in feet or meters.
//!
//! [`GeometryExtractor`]: crime_risk_ingest_models::GeometryExtractor

pub mod fetchers;
pub mod normalize;
pub mod projection;
pub mod registry;
pub mod retry;
pub mod study;

use thiserror::Error;

pub use study::{IngestOptions, StudyData, Tract, load_study_data};

/// Errors that can occur while ingesting a study area.
#[derive(Debug, Error)]
pub enum IngestError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a local file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Building spatial structures from the layers failed.
    #[error("Spatial error: {0}")]
    Spatial(#[from] crime_risk_spatial::SpatialError),

    /// Data conversion or normalization error.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// A required layer produced no usable geometry.
    #[error("Layer {layer} has no usable geometry")]
    EmptyLayer {
        /// Layer label.
        layer: String,
    },

    /// No registered source has this identifier.
    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

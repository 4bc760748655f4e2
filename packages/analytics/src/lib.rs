#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Statistical core of the risk model.
//!
//! Local Moran's I over row-standardized queen weights, a Poisson GLM fitted
//! by iteratively reweighted least squares, random and leave-one-group-out
//! cross-validation, and the kernel-density baseline comparison.
//!
//! Every entry point takes immutable inputs and returns new values; nothing
//! here mutates a shared working table.

pub mod cross_validation;
pub mod density;
pub mod evaluate;
pub mod glm;
pub mod moran;
pub mod progress;
pub mod special;

use crime_risk_analytics_models::FoldKey;
use crime_risk_feature_models::{CellId, FeatureName, GroupKind};
use thiserror::Error;

pub use cross_validation::{CrossValidation, FoldAssignment, cross_validate};
pub use glm::{GlmError, PoissonFit, PoissonRegression};
pub use moran::{SpatialWeights, local_moran};

/// Errors that can occur during analytical operations.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Local Moran's I needs at least three cells.
    #[error("Local Moran's I needs at least 3 cells, found {0}")]
    TooFewCells(usize),

    /// A weighted cell has no observed value.
    #[error("No value for cell {0}")]
    MissingValue(CellId),

    /// A requested covariate is not declared in the feature table.
    #[error("Feature {0} is not in the feature table")]
    MissingFeature(FeatureName),

    /// A cell has no name for the grouping used as fold key.
    #[error("Cell {cell} has no {kind} group")]
    MissingGroup {
        /// The cell.
        cell: CellId,
        /// The grouping.
        kind: GroupKind,
    },

    /// A table row has no fold key.
    #[error("Cell {0} has no fold assignment")]
    UnassignedCell(CellId),

    /// The fold scheme produced fewer than two folds.
    #[error("Cross-validation needs at least 2 folds, found {0}")]
    TooFewFolds(usize),

    /// Every cell is in the held-out fold.
    #[error("Fold {0} leaves no training cells")]
    EmptyTrainingFold(FoldKey),

    /// Fitting or predicting one fold failed.
    #[error("Fold {fold} failed: {source}")]
    Fold {
        /// The failing fold.
        fold: FoldKey,
        /// Underlying regression error.
        #[source]
        source: GlmError,
    },

    /// The held-out predictions do not cover every cell exactly once.
    #[error("Cell {cell} was predicted {count} times")]
    PartitionViolation {
        /// The cell.
        cell: CellId,
        /// Number of predictions produced for it.
        count: usize,
    },

    /// Kernel bandwidth is not a positive finite number.
    #[error("Invalid kernel bandwidth {0}")]
    InvalidBandwidth(f64),
}

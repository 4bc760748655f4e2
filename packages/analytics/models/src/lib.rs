#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result types for the risk model's analytical stages.
//!
//! Fold keys and prediction records produced by cross-validation, Local
//! Moran's I results, and the rows of the evaluation summary tables. All
//! table rows are flat and `Serialize` so they can be written as CSV.

use crime_risk_feature_models::{CellId, CovariateSet, GroupKind};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The fold a cell is held out in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FoldKey {
    /// Synthetic random bucket, numbered from 1.
    Bucket(u32),
    /// Natural group, e.g. a neighborhood name.
    Group(String),
}

impl std::fmt::Display for FoldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bucket(id) => write!(f, "{id}"),
            Self::Group(name) => write!(f, "{name}"),
        }
    }
}

impl Serialize for FoldKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How cells are partitioned into folds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FoldScheme {
    /// Each cell draws a bucket in `1..=folds` uniformly at random.
    Random {
        /// Number of buckets.
        folds: u32,
        /// Seed for the bucket draw.
        seed: u64,
    },
    /// One fold per distinct group name.
    LeaveOneGroupOut {
        /// Which grouping defines the folds.
        group: GroupKind,
    },
}

impl FoldScheme {
    /// Human-readable label used in summary tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Random { .. } => "Random k-fold CV",
            Self::LeaveOneGroupOut { .. } => "Spatial LOGO-CV",
        }
    }
}

/// One cross-validated model: a fold scheme paired with a covariate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVariant {
    /// Fold scheme.
    pub scheme: FoldScheme,
    /// Covariate set.
    pub covariates: CovariateSet,
}

impl ModelVariant {
    /// Label such as `"Spatial LOGO-CV: Spatial Process"`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}: {}", self.scheme.label(), self.covariates.label())
    }
}

/// A held-out prediction for one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    /// The predicted cell.
    pub cell: CellId,
    /// The fold the cell was held out in.
    pub fold: FoldKey,
    /// Observed incident count.
    pub observed: f64,
    /// Predicted expected count.
    pub predicted: f64,
}

impl PredictionRecord {
    /// Signed error, `predicted - observed`.
    #[must_use]
    pub fn error(&self) -> f64 {
        self.predicted - self.observed
    }

    /// Absolute error.
    #[must_use]
    pub fn absolute_error(&self) -> f64 {
        self.error().abs()
    }
}

/// Alpha thresholds for Local Moran's I.
///
/// `display_alpha` marks cells as significant for reporting.
/// `cluster_alpha` is much stricter and defines hot-spot membership used
/// as a model feature. The two are configured independently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceThresholds {
    /// Alpha for reporting significance.
    pub display_alpha: f64,
    /// Alpha for the hot-spot feature.
    pub cluster_alpha: f64,
}

impl Default for SignificanceThresholds {
    fn default() -> Self {
        Self {
            display_alpha: 0.05,
            cluster_alpha: 0.000_000_1,
        }
    }
}

/// Local Moran's I result for one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalMoran {
    /// The cell.
    pub cell: CellId,
    /// Local statistic `I_i`.
    pub statistic: f64,
    /// Expected value under no autocorrelation.
    pub expected: f64,
    /// Variance under randomisation.
    pub variance: f64,
    /// Standardized statistic.
    pub z_score: f64,
    /// One-sided (upper tail) p-value.
    pub p_value: f64,
    /// `p_value <= display_alpha`.
    pub significant: bool,
    /// `p_value <= cluster_alpha`.
    pub hotspot: bool,
    /// The cell has no neighbors and was excluded from the statistic.
    pub isolated: bool,
}

/// Percentile risk bucket.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum RiskCategory {
    /// Percentiles 1–29.
    #[serde(rename = "1% to 29%")]
    #[strum(serialize = "1% to 29%")]
    Lowest,
    /// Percentiles 30–49.
    #[serde(rename = "30% to 49%")]
    #[strum(serialize = "30% to 49%")]
    Low,
    /// Percentiles 50–69.
    #[serde(rename = "50% to 69%")]
    #[strum(serialize = "50% to 69%")]
    Moderate,
    /// Percentiles 70–89.
    #[serde(rename = "70% to 89%")]
    #[strum(serialize = "70% to 89%")]
    High,
    /// Percentiles 90–100.
    #[serde(rename = "90% to 100%")]
    #[strum(serialize = "90% to 100%")]
    Highest,
}

impl RiskCategory {
    /// All categories, lowest risk first.
    pub const ALL: [Self; 5] = [
        Self::Lowest,
        Self::Low,
        Self::Moderate,
        Self::High,
        Self::Highest,
    ];

    /// Buckets a percentile in `1..=100`.
    #[must_use]
    pub const fn from_percentile(percentile: u32) -> Self {
        match percentile {
            90.. => Self::Highest,
            70..=89 => Self::High,
            50..=69 => Self::Moderate,
            30..=49 => Self::Low,
            _ => Self::Lowest,
        }
    }
}

/// Cross-validation error summary for one model variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    /// Model variant label.
    pub model: String,
    /// `mean(|predicted - observed|)` over every cell.
    pub mae: f64,
    /// Mean of the per-fold MAEs.
    pub mean_fold_mae: f64,
    /// Standard deviation of the per-fold MAEs.
    pub sd_fold_mae: f64,
    /// Number of folds.
    pub folds: usize,
}

/// MAE of one held-out fold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldError {
    /// Model variant label.
    pub model: String,
    /// Held-out fold.
    pub fold: FoldKey,
    /// Cells in the fold.
    pub cells: usize,
    /// Mean absolute error over the fold.
    pub mae: f64,
}

/// Mean signed error of a model within one demographic group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupError {
    /// Model variant label.
    pub model: String,
    /// Group label, e.g. `"Majority_White"`.
    pub group: String,
    /// Cells in the group.
    pub cells: usize,
    /// `mean(predicted - observed)`.
    pub mean_error: f64,
}

/// Observed incidents captured by one risk category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCapture {
    /// Risk category.
    pub category: RiskCategory,
    /// Observed incidents in cells of this category.
    pub count: f64,
    /// Share of all observed incidents.
    pub rate: f64,
}

/// Side-by-side capture rates for the density baseline and the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationRow {
    /// Risk category.
    pub category: RiskCategory,
    /// Share of observed incidents captured by the kernel density bucket.
    pub kernel_density_rate: f64,
    /// Share of observed incidents captured by the model bucket.
    pub risk_model_rate: f64,
}

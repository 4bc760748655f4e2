//! Model configuration.
//!
//! Read from TOML; every field has a default, so an empty file (or no file)
//! reproduces the standard run. [`ModelConfig::validate`] runs before any
//! computation.

use std::path::Path;

use crime_risk_analytics_models::SignificanceThresholds;
use crime_risk_feature_models::GroupKind;
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Where distances to the city center are measured from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CityCenter {
    /// Centroid of the neighborhood with this name.
    Neighborhood(String),
    /// Explicit projected coordinate.
    Point {
        /// Easting.
        x: f64,
        /// Northing.
        y: f64,
    },
}

impl Default for CityCenter {
    fn default() -> Self {
        Self::Neighborhood("Loop".to_string())
    }
}

/// Parameters of a model run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Fishnet cell side, in projection units.
    pub cell_size: f64,
    /// `k` for risk-factor `.nn` features.
    pub nearest_neighbors: usize,
    /// `k` for the hot-spot distance feature.
    pub cluster_distance_neighbors: usize,
    /// Alpha for reporting Local Moran's I significance.
    pub display_alpha: f64,
    /// Alpha defining hot-spot membership.
    pub cluster_alpha: f64,
    /// Cells per random fold when `random_folds` is unset.
    pub cells_per_random_fold: u32,
    /// Explicit random fold count.
    pub random_folds: Option<u32>,
    /// Seed for the random fold draw.
    pub seed: u64,
    /// Gaussian kernel bandwidth, in projection units.
    pub kde_bandwidth: f64,
    /// Reference point for `loopDistance`.
    pub city_center: CityCenter,
    /// Grouping used for leave-one-group-out cross-validation.
    pub logo_group: GroupKind,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let thresholds = SignificanceThresholds::default();
        Self {
            cell_size: 500.0,
            nearest_neighbors: 3,
            cluster_distance_neighbors: 1,
            display_alpha: thresholds.display_alpha,
            cluster_alpha: thresholds.cluster_alpha,
            cells_per_random_fold: 24,
            random_folds: None,
            seed: 20_180_101,
            kde_bandwidth: 1000.0,
            city_center: CityCenter::default(),
            logo_group: GroupKind::Neighborhood,
        }
    }
}

impl ModelConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Toml`] for malformed TOML or unknown keys,
    /// and [`PipelineError::InvalidConfig`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be read, otherwise
    /// the errors of [`Self::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        log::info!("Loaded model configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first invalid
    /// field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        positive("cell_size", self.cell_size)?;
        positive("kde_bandwidth", self.kde_bandwidth)?;
        probability("display_alpha", self.display_alpha)?;
        probability("cluster_alpha", self.cluster_alpha)?;

        if self.nearest_neighbors == 0 {
            return Err(invalid("nearest_neighbors", "must be at least 1"));
        }
        if self.cluster_distance_neighbors == 0 {
            return Err(invalid("cluster_distance_neighbors", "must be at least 1"));
        }
        if self.cells_per_random_fold == 0 {
            return Err(invalid("cells_per_random_fold", "must be at least 1"));
        }
        if self.random_folds.is_some_and(|folds| folds < 2) {
            return Err(invalid("random_folds", "must be at least 2"));
        }
        match &self.city_center {
            CityCenter::Point { x, y } if !(x.is_finite() && y.is_finite()) => {
                return Err(invalid("city_center", "coordinates must be finite"));
            }
            CityCenter::Neighborhood(name) if name.trim().is_empty() => {
                return Err(invalid("city_center", "neighborhood name is empty"));
            }
            _ => {}
        }

        Ok(())
    }

    /// Both Local Moran's I thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> SignificanceThresholds {
        SignificanceThresholds {
            display_alpha: self.display_alpha,
            cluster_alpha: self.cluster_alpha,
        }
    }

    /// Number of random folds for a table of `cells` rows: the explicit
    /// `random_folds`, else `round(cells / cells_per_random_fold)`, never
    /// fewer than two.
    #[must_use]
    pub fn random_fold_count(&self, cells: usize) -> u32 {
        self.random_folds.unwrap_or_else(|| {
            #[allow(
                clippy::cast_precision_loss,
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss
            )]
            let folds = (cells as f64 / f64::from(self.cells_per_random_fold)).round() as u32;
            folds.max(2)
        })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), PipelineError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("{value} is not a positive finite number")))
    }
}

fn probability(field: &'static str, value: f64) -> Result<(), PipelineError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("{value} is not in (0, 1]")))
    }
}

fn invalid(field: &'static str, message: &str) -> PipelineError {
    PipelineError::InvalidConfig {
        field,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = ModelConfig::from_toml_str("").unwrap();
        assert_eq!(config, ModelConfig::default());
        assert_eq!(config.cell_size, 500.0);
        assert_eq!(config.nearest_neighbors, 3);
        assert_eq!(config.cluster_distance_neighbors, 1);
        assert_eq!(config.cluster_alpha, 0.000_000_1);
        assert_eq!(config.city_center, CityCenter::Neighborhood("Loop".to_string()));
    }

    #[test]
    fn parses_overrides() {
        let config = ModelConfig::from_toml_str(
            r#"
cell_size = 250.0
random_folds = 10
seed = 7
logo_group = "police_district"
city_center = { x = 1.0, y = 2.0 }
"#,
        )
        .unwrap();

        assert_eq!(config.cell_size, 250.0);
        assert_eq!(config.random_fold_count(10_000), 10);
        assert_eq!(config.logo_group, GroupKind::PoliceDistrict);
        assert_eq!(config.city_center, CityCenter::Point { x: 1.0, y: 2.0 });
    }

    #[test]
    fn rejects_invalid_values() {
        for text in [
            "cell_size = 0.0",
            "cell_size = -10.0",
            "nearest_neighbors = 0",
            "display_alpha = 0.0",
            "cluster_alpha = 1.5",
            "random_folds = 1",
            "kde_bandwidth = -1.0",
        ] {
            assert!(
                matches!(
                    ModelConfig::from_toml_str(text),
                    Err(PipelineError::InvalidConfig { .. })
                ),
                "{text} was accepted"
            );
        }
        assert!(matches!(
            ModelConfig::from_toml_str("unknown_key = 1"),
            Err(PipelineError::Toml(_))
        ));
    }

    #[test]
    fn fold_count_scales_with_cells() {
        let config = ModelConfig::default();
        assert_eq!(config.random_fold_count(2400), 100);
        assert_eq!(config.random_fold_count(2411), 100);
        assert_eq!(config.random_fold_count(10), 2);
    }
}

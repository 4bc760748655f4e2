#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Grid cell identifiers and the closed feature-name taxonomy.
//!
//! Every column the risk model can consume is a [`FeatureName`] variant.
//! There are no free-form string columns: a feature is either a per-cell
//! count of a [`RiskFactor`] layer, the mean nearest-neighbor distance to
//! that layer, or one of the fixed spatial-structure features.

pub mod table;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use table::{FeatureRow, FeatureTable, FeatureTableBuilder, TableAssembly, TableError};

/// Identifier of a single fishnet cell.
///
/// Identifiers are dense (`0..n`) and assigned once by the grid builder.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CellId(pub u32);

impl CellId {
    /// Returns the raw numeric identifier.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Environmental risk factor layers.
///
/// The serialized names match the column names used in exported tables
/// (e.g. `Abandoned_Cars`).
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
pub enum RiskFactor {
    /// 311 abandoned vehicle requests
    #[serde(rename = "Abandoned_Cars")]
    #[strum(serialize = "Abandoned_Cars")]
    AbandonedCars,
    /// Vacant and abandoned building reports
    #[serde(rename = "Abandoned_Buildings")]
    #[strum(serialize = "Abandoned_Buildings")]
    AbandonedBuildings,
    /// Graffiti removal requests
    #[serde(rename = "Graffiti")]
    #[strum(serialize = "Graffiti")]
    Graffiti,
    /// Street lights (all out) requests
    #[serde(rename = "Street_Lights_Out")]
    #[strum(serialize = "Street_Lights_Out")]
    StreetLightsOut,
    /// Sanitation code complaints
    #[serde(rename = "Sanitation")]
    #[strum(serialize = "Sanitation")]
    Sanitation,
    /// Packaged liquor retail licenses
    #[serde(rename = "Liquor_Retail")]
    #[strum(serialize = "Liquor_Retail")]
    LiquorRetail,
    /// Tobacco retail licenses
    #[serde(rename = "Tobacco_Retail")]
    #[strum(serialize = "Tobacco_Retail")]
    TobaccoRetail,
    /// Pawnbroker licenses
    #[serde(rename = "Pawn_Shops")]
    #[strum(serialize = "Pawn_Shops")]
    PawnShops,
}

impl RiskFactor {
    /// Returns all risk factors in declaration order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::AbandonedCars,
            Self::AbandonedBuildings,
            Self::Graffiti,
            Self::StreetLightsOut,
            Self::Sanitation,
            Self::LiquorRetail,
            Self::TobaccoRetail,
            Self::PawnShops,
        ]
    }
}

/// A natural grouping a cell belongs to, joined by cell centroid.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GroupKind {
    /// Named neighborhood polygon.
    Neighborhood,
    /// Police district polygon.
    PoliceDistrict,
}

/// A model feature column.
///
/// Display names follow the exported column convention:
/// `Abandoned_Cars`, `Abandoned_Cars.nn`, `loopDistance`, `isSig`,
/// `isSig.dist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureName {
    /// Number of layer points falling inside the cell.
    Count(RiskFactor),
    /// Mean distance from the cell centroid to the k nearest layer points.
    NearestNeighbor(RiskFactor),
    /// Distance from the cell centroid to the city center.
    CityCenterDistance,
    /// `1.0` if the cell is a significant incident hot spot, else `0.0`.
    SignificantCluster,
    /// Mean distance from the cell centroid to the nearest hot spot cells.
    SignificantClusterDistance,
}

impl std::fmt::Display for FeatureName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(factor) => write!(f, "{factor}"),
            Self::NearestNeighbor(factor) => write!(f, "{factor}.nn"),
            Self::CityCenterDistance => write!(f, "loopDistance"),
            Self::SignificantCluster => write!(f, "isSig"),
            Self::SignificantClusterDistance => write!(f, "isSig.dist"),
        }
    }
}

/// Error returned when a string does not name a [`FeatureName`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature name: {0}")]
pub struct UnknownFeatureError(pub String);

impl FromStr for FeatureName {
    type Err = UnknownFeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loopDistance" => return Ok(Self::CityCenterDistance),
            "isSig" => return Ok(Self::SignificantCluster),
            "isSig.dist" => return Ok(Self::SignificantClusterDistance),
            _ => {}
        }

        let parsed = s.strip_suffix(".nn").map_or_else(
            || RiskFactor::from_str(s).map(Self::Count),
            |factor| RiskFactor::from_str(factor).map(Self::NearestNeighbor),
        );

        parsed.map_err(|_| UnknownFeatureError(s.to_string()))
    }
}

impl Serialize for FeatureName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FeatureName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which covariates a regression run uses.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CovariateSet {
    /// Nearest-neighbor risk factor distances plus the city-center distance.
    RiskFactors,
    /// [`Self::RiskFactors`] plus hot-spot membership and hot-spot distance.
    SpatialProcess,
}

impl CovariateSet {
    /// Both covariate sets, in reporting order.
    pub const ALL: [Self; 2] = [Self::RiskFactors, Self::SpatialProcess];

    /// Human-readable label used in summary tables.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::RiskFactors => "Just Risk Factors",
            Self::SpatialProcess => "Spatial Process",
        }
    }

    /// Expands the set into concrete feature columns for the given layers.
    #[must_use]
    pub fn features(self, factors: &[RiskFactor]) -> Vec<FeatureName> {
        let mut features: Vec<FeatureName> = factors
            .iter()
            .copied()
            .map(FeatureName::NearestNeighbor)
            .collect();
        features.push(FeatureName::CityCenterDistance);

        if self == Self::SpatialProcess {
            features.push(FeatureName::SignificantCluster);
            features.push(FeatureName::SignificantClusterDistance);
        }

        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_roundtrip_through_display() {
        let mut names = vec![
            FeatureName::CityCenterDistance,
            FeatureName::SignificantCluster,
            FeatureName::SignificantClusterDistance,
        ];
        for factor in RiskFactor::all() {
            names.push(FeatureName::Count(*factor));
            names.push(FeatureName::NearestNeighbor(*factor));
        }

        for name in names {
            let parsed: FeatureName = name.to_string().parse().unwrap();
            assert_eq!(parsed, name, "{name} did not parse back");
        }
    }

    #[test]
    fn feature_display_matches_column_names() {
        assert_eq!(
            FeatureName::NearestNeighbor(RiskFactor::AbandonedCars).to_string(),
            "Abandoned_Cars.nn"
        );
        assert_eq!(
            FeatureName::Count(RiskFactor::StreetLightsOut).to_string(),
            "Street_Lights_Out"
        );
        assert_eq!(FeatureName::CityCenterDistance.to_string(), "loopDistance");
    }

    #[test]
    fn rejects_unknown_feature() {
        assert!("Potholes.nn".parse::<FeatureName>().is_err());
        assert!("".parse::<FeatureName>().is_err());
    }

    #[test]
    fn spatial_process_extends_risk_factors() {
        let factors = [RiskFactor::Graffiti, RiskFactor::Sanitation];
        let base = CovariateSet::RiskFactors.features(&factors);
        let spatial = CovariateSet::SpatialProcess.features(&factors);

        assert_eq!(base.len(), 3);
        assert_eq!(spatial.len(), 5);
        assert_eq!(&spatial[..3], base.as_slice());
        assert!(spatial.contains(&FeatureName::SignificantClusterDistance));
    }
}

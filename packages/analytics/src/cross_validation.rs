//! Fold assignment and cross-validated Poisson predictions.
//!
//! Every fold trains on the complement of its held-out cells, so each cell
//! receives exactly one out-of-sample prediction. Folds are independent and
//! fitted in parallel with `rayon`; results are sorted by cell afterwards so
//! output never depends on scheduling.

use std::collections::{BTreeMap, BTreeSet};

use crime_risk_analytics_models::{
    ErrorSummary, FoldError, FoldKey, FoldScheme, PredictionRecord,
};
use crime_risk_feature_models::{CellId, FeatureName, FeatureTable, GroupKind};
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::glm::PoissonRegression;
use crate::progress::ProgressCallback;
use crate::AnalyticsError;

/// Maps every cell to the fold it is held out in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldAssignment {
    keys: BTreeMap<CellId, FoldKey>,
}

impl FoldAssignment {
    /// Draws a bucket in `1..=folds` for each cell, in ascending cell order,
    /// from a generator seeded with `seed`. The same cells, fold count and
    /// seed always give the same assignment.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::TooFewFolds`] if `folds < 2`.
    pub fn random(
        cells: impl IntoIterator<Item = CellId>,
        folds: u32,
        seed: u64,
    ) -> Result<Self, AnalyticsError> {
        if folds < 2 {
            return Err(AnalyticsError::TooFewFolds(folds as usize));
        }

        let ordered: BTreeSet<CellId> = cells.into_iter().collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let keys = ordered
            .into_iter()
            .map(|cell| (cell, FoldKey::Bucket(rng.gen_range(1..=folds))))
            .collect();

        Ok(Self { keys })
    }

    /// Uses each cell's `kind` group name as its fold key.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::MissingGroup`] if a row has no name for
    /// `kind`.
    pub fn by_group(table: &FeatureTable, kind: GroupKind) -> Result<Self, AnalyticsError> {
        let keys = table
            .rows()
            .iter()
            .map(|row| {
                row.group(kind)
                    .map(|name| (row.cell, FoldKey::Group(name.to_string())))
                    .ok_or(AnalyticsError::MissingGroup {
                        cell: row.cell,
                        kind,
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { keys })
    }

    /// Builds the assignment a [`FoldScheme`] describes for `table`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::random`] and [`Self::by_group`].
    pub fn for_scheme(table: &FeatureTable, scheme: &FoldScheme) -> Result<Self, AnalyticsError> {
        match scheme {
            FoldScheme::Random { folds, seed } => {
                Self::random(table.rows().iter().map(|row| row.cell), *folds, *seed)
            }
            FoldScheme::LeaveOneGroupOut { group } => Self::by_group(table, *group),
        }
    }

    /// Fold key for `cell`.
    #[must_use]
    pub fn key(&self, cell: CellId) -> Option<&FoldKey> {
        self.keys.get(&cell)
    }

    /// Distinct fold keys, ascending.
    #[must_use]
    pub fn folds(&self) -> Vec<FoldKey> {
        self.keys
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of assigned cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no cell is assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Out-of-sample predictions for one model variant.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidation {
    /// Model variant label.
    pub model: String,
    /// One record per cell, ascending by cell.
    pub predictions: Vec<PredictionRecord>,
}

impl CrossValidation {
    /// Mean absolute error over every cell.
    #[must_use]
    pub fn mae(&self) -> f64 {
        mean(self.predictions.iter().map(PredictionRecord::absolute_error))
    }

    /// MAE of each held-out fold, ascending by fold key.
    #[must_use]
    pub fn fold_errors(&self) -> Vec<FoldError> {
        let mut by_fold: BTreeMap<&FoldKey, Vec<f64>> = BTreeMap::new();
        for record in &self.predictions {
            by_fold
                .entry(&record.fold)
                .or_default()
                .push(record.absolute_error());
        }

        by_fold
            .into_iter()
            .map(|(fold, errors)| FoldError {
                model: self.model.clone(),
                fold: fold.clone(),
                cells: errors.len(),
                mae: mean(errors.iter().copied()),
            })
            .collect()
    }

    /// Overall MAE plus mean and sample standard deviation of fold MAEs.
    #[must_use]
    pub fn summary(&self) -> ErrorSummary {
        let fold_maes: Vec<f64> = self.fold_errors().iter().map(|f| f.mae).collect();
        let mean_fold_mae = mean(fold_maes.iter().copied());
        let sd_fold_mae = if fold_maes.len() > 1 {
            #[allow(clippy::cast_precision_loss)]
            let denom = (fold_maes.len() - 1) as f64;
            (fold_maes
                .iter()
                .map(|m| (m - mean_fold_mae).powi(2))
                .sum::<f64>()
                / denom)
                .sqrt()
        } else {
            0.0
        };

        ErrorSummary {
            model: self.model.clone(),
            mae: self.mae(),
            mean_fold_mae,
            sd_fold_mae,
            folds: fold_maes.len(),
        }
    }
}

/// Fits one Poisson model per fold and predicts the held-out cells.
///
/// # Errors
///
/// * [`AnalyticsError::MissingFeature`] if a covariate is not in the table.
/// * [`AnalyticsError::UnassignedCell`] if a row has no fold key.
/// * [`AnalyticsError::TooFewFolds`] if fewer than two folds exist.
/// * [`AnalyticsError::EmptyTrainingFold`] if a fold holds out every cell.
/// * [`AnalyticsError::Fold`] if fitting or predicting a fold fails.
/// * [`AnalyticsError::PartitionViolation`] if a cell is not predicted
///   exactly once.
pub fn cross_validate(
    table: &FeatureTable,
    covariates: &[FeatureName],
    assignment: &FoldAssignment,
    model: &str,
    progress: &dyn ProgressCallback,
) -> Result<CrossValidation, AnalyticsError> {
    if let Some(missing) = covariates.iter().find(|f| !table.features().contains(f)) {
        return Err(AnalyticsError::MissingFeature(*missing));
    }

    let rows = table.rows();
    let mut keys = Vec::with_capacity(rows.len());
    for row in rows {
        keys.push(
            assignment
                .key(row.cell)
                .ok_or(AnalyticsError::UnassignedCell(row.cell))?,
        );
    }

    let folds: Vec<&FoldKey> = keys.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    if folds.len() < 2 {
        return Err(AnalyticsError::TooFewFolds(folds.len()));
    }

    let design: Vec<Vec<f64>> = rows
        .iter()
        .map(|row| {
            covariates
                .iter()
                .map(|f| row.value(*f).unwrap_or(f64::NAN))
                .collect()
        })
        .collect();

    log::info!(
        "{model}: {} cells, {} folds, {} covariates",
        rows.len(),
        folds.len(),
        covariates.len()
    );
    progress.set_total(folds.len() as u64);
    progress.set_message(model.to_string());

    let regression = PoissonRegression::default();
    let per_fold = folds
        .par_iter()
        .map(|&fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..rows.len()).partition(|&i| keys[i] == fold);
            if train.is_empty() {
                return Err(AnalyticsError::EmptyTrainingFold(fold.clone()));
            }

            let subset = |idx: &[usize]| {
                DMatrix::from_fn(idx.len(), covariates.len(), |i, j| design[idx[i]][j])
            };
            let y: Vec<f64> = train.iter().map(|&i| rows[i].observed).collect();

            let fitted = regression
                .fit(&subset(&train), &y)
                .and_then(|fit| {
                    if !fit.converged {
                        log::warn!("{model}: fold {fold} did not converge");
                    }
                    fit.predict(&subset(&test))
                })
                .map_err(|source| AnalyticsError::Fold {
                    fold: fold.clone(),
                    source,
                })?;

            log::debug!(
                "{model}: fold {fold} trained on {} cells, predicted {}",
                train.len(),
                test.len()
            );
            progress.inc(1);

            Ok(test
                .iter()
                .zip(fitted)
                .map(|(&i, predicted)| PredictionRecord {
                    cell: rows[i].cell,
                    fold: fold.clone(),
                    observed: rows[i].observed,
                    predicted,
                })
                .collect::<Vec<_>>())
        })
        .collect::<Result<Vec<_>, AnalyticsError>>()?;

    let mut predictions: Vec<PredictionRecord> = per_fold.into_iter().flatten().collect();
    predictions.sort_by_key(|p| p.cell);
    verify_partition(table, &predictions)?;

    progress.finish(format!("{model}: {} folds", folds.len()));

    Ok(CrossValidation {
        model: model.to_string(),
        predictions,
    })
}

fn verify_partition(
    table: &FeatureTable,
    predictions: &[PredictionRecord],
) -> Result<(), AnalyticsError> {
    let mut counts: BTreeMap<CellId, usize> =
        table.rows().iter().map(|row| (row.cell, 0)).collect();
    for record in predictions {
        *counts.entry(record.cell).or_default() += 1;
    }
    match counts.into_iter().find(|&(_, count)| count != 1) {
        Some((cell, count)) => Err(AnalyticsError::PartitionViolation { cell, count }),
        None => Ok(()),
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::GlmError;
    use crate::progress::NullProgress;
    use crime_risk_feature_models::{FeatureTableBuilder, RiskFactor};

    const GRAFFITI: FeatureName = FeatureName::NearestNeighbor(RiskFactor::Graffiti);

    fn table(n: u32) -> FeatureTable {
        let cells: Vec<CellId> = (0..n).map(CellId).collect();
        let mut builder = FeatureTableBuilder::new(cells.clone());
        builder
            .observed(
                cells
                    .iter()
                    .map(|&c| (c, f64::from(c.value() % 5 + c.value() / 10))),
            )
            .unwrap()
            .feature(GRAFFITI, cells.iter().map(|&c| (c, f64::from(c.value()))))
            .unwrap()
            .group(
                GroupKind::Neighborhood,
                cells
                    .iter()
                    .map(|&c| (c, format!("hood-{}", c.value() % 4))),
            )
            .unwrap();
        builder.build().table
    }

    #[test]
    fn random_assignment_is_deterministic_and_in_range() {
        let cells: Vec<CellId> = (0..50).map(CellId).collect();
        let a = FoldAssignment::random(cells.clone(), 5, 42).unwrap();
        let b = FoldAssignment::random(cells.iter().rev().copied(), 5, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        for cell in &cells {
            match a.key(*cell).unwrap() {
                FoldKey::Bucket(k) => assert!((1..=5).contains(k)),
                FoldKey::Group(_) => panic!("random assignment produced a group key"),
            }
        }

        let other = FoldAssignment::random(cells, 5, 7).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn random_assignment_needs_two_folds() {
        assert!(matches!(
            FoldAssignment::random((0..3).map(CellId), 1, 0),
            Err(AnalyticsError::TooFewFolds(1))
        ));
    }

    #[test]
    fn group_assignment_uses_group_names() {
        let table = table(8);
        let assignment = FoldAssignment::by_group(&table, GroupKind::Neighborhood).unwrap();
        assert_eq!(
            assignment.key(CellId(5)),
            Some(&FoldKey::Group("hood-1".to_string()))
        );
        assert_eq!(assignment.folds().len(), 4);
        assert!(matches!(
            FoldAssignment::by_group(&table, GroupKind::PoliceDistrict),
            Err(AnalyticsError::MissingGroup { .. })
        ));
    }

    #[test]
    fn every_cell_is_predicted_exactly_once() {
        let table = table(40);
        let assignment = FoldAssignment::for_scheme(
            &table,
            &FoldScheme::LeaveOneGroupOut {
                group: GroupKind::Neighborhood,
            },
        )
        .unwrap();

        let cv = cross_validate(&table, &[GRAFFITI], &assignment, "logo", &NullProgress).unwrap();
        assert_eq!(cv.predictions.len(), 40);
        for (record, row) in cv.predictions.iter().zip(table.rows()) {
            assert_eq!(record.cell, row.cell);
            assert_eq!(record.observed, row.observed);
            assert!(record.predicted.is_finite() && record.predicted > 0.0);
        }

        let summary = cv.summary();
        assert_eq!(summary.folds, 4);
        assert!(summary.mae >= 0.0);
        assert_eq!(cv.fold_errors().iter().map(|f| f.cells).sum::<usize>(), 40);
    }

    #[test]
    fn a_single_group_cannot_be_cross_validated() {
        let cells: Vec<CellId> = (0..5).map(CellId).collect();
        let mut builder = FeatureTableBuilder::new(cells.clone());
        builder
            .observed(cells.iter().map(|&c| (c, 1.0)))
            .unwrap()
            .group(
                GroupKind::Neighborhood,
                cells.iter().map(|&c| (c, "Loop".to_string())),
            )
            .unwrap();
        let table = builder.build().table;
        let assignment = FoldAssignment::by_group(&table, GroupKind::Neighborhood).unwrap();

        assert!(matches!(
            cross_validate(&table, &[], &assignment, "m", &NullProgress),
            Err(AnalyticsError::TooFewFolds(1))
        ));
    }

    #[test]
    fn fold_failures_name_the_fold() {
        // The covariate is constant, so every training design is collinear
        // with the intercept.
        let cells: Vec<CellId> = (0..6).map(CellId).collect();
        let mut builder = FeatureTableBuilder::new(cells.clone());
        builder
            .observed(cells.iter().map(|&c| (c, f64::from(c.value()))))
            .unwrap()
            .feature(GRAFFITI, cells.iter().map(|&c| (c, 1.0)))
            .unwrap()
            .group(
                GroupKind::Neighborhood,
                cells
                    .iter()
                    .map(|&c| (c, if c.value() < 3 { "a" } else { "b" }.to_string())),
            )
            .unwrap();
        let table = builder.build().table;
        let assignment = FoldAssignment::by_group(&table, GroupKind::Neighborhood).unwrap();

        let err = cross_validate(&table, &[GRAFFITI], &assignment, "m", &NullProgress)
            .unwrap_err();
        let AnalyticsError::Fold { fold, source } = err else {
            panic!("unexpected error {err}");
        };
        assert!(matches!(fold, FoldKey::Group(_)));
        assert!(matches!(source, GlmError::RankDeficient { .. }));
    }

    #[test]
    fn rejects_unknown_covariates() {
        let table = table(10);
        let assignment = FoldAssignment::random((0..10).map(CellId), 2, 3).unwrap();
        assert!(matches!(
            cross_validate(
                &table,
                &[FeatureName::SignificantCluster],
                &assignment,
                "m",
                &NullProgress
            ),
            Err(AnalyticsError::MissingFeature(FeatureName::SignificantCluster))
        ));
    }

    #[test]
    fn summary_statistics() {
        let record = |cell: u32, fold: u32, observed: f64, predicted: f64| PredictionRecord {
            cell: CellId(cell),
            fold: FoldKey::Bucket(fold),
            observed,
            predicted,
        };
        let cv = CrossValidation {
            model: "m".to_string(),
            predictions: vec![
                record(0, 1, 1.0, 2.0),
                record(1, 1, 3.0, 2.0),
                record(2, 2, 0.0, 3.0),
            ],
        };

        let summary = cv.summary();
        assert!((summary.mae - 5.0 / 3.0).abs() < 1e-12);
        assert!((summary.mean_fold_mae - 2.0).abs() < 1e-12);
        assert!((summary.sd_fold_mae - 2.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(summary.folds, 2);
    }
}

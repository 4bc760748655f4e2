//! Cross-validates the model suite and evaluates it.

use std::collections::BTreeMap;

use crime_risk_analytics::{
    CrossValidation, FoldAssignment, cross_validate,
    density::kernel_density,
    evaluate::{
        capture_rates, compare_allocation, majority_context, mean_error_by_group, risk_categories,
    },
    progress::ProgressCallback,
};
use crime_risk_analytics_models::{
    AllocationRow, CategoryCapture, ErrorSummary, FoldError, FoldScheme, GroupError, ModelVariant,
};
use crime_risk_feature_models::{CellId, CovariateSet};
use crime_risk_ingest::{StudyData, Tract};
use crime_risk_spatial::{NamedRegion, RegionIndex, count_points};
use geo::Point;

use crate::{Assembly, ModelConfig, PipelineError};

/// The variant whose predictions are compared against kernel density.
pub const ALLOCATION_MODEL: &str = "Spatial LOGO-CV: Spatial Process";

/// One cross-validated model variant.
#[derive(Debug, Clone)]
pub struct ModelRun {
    /// Fold scheme and covariate set.
    pub variant: ModelVariant,
    /// Held-out predictions.
    pub cross_validation: CrossValidation,
}

/// Everything a model run produces.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The four variants, random folds first.
    pub runs: Vec<ModelRun>,
    /// Error summary per variant.
    pub summaries: Vec<ErrorSummary>,
    /// Per-fold MAE of every variant.
    pub fold_errors: Vec<FoldError>,
    /// Number of random folds used.
    pub random_folds: u32,
    /// Whether capture rates count the holdout incidents.
    pub evaluated_on_holdout: bool,
    /// Kernel density capture by risk category.
    pub kernel_density_capture: Vec<CategoryCapture>,
    /// Risk model capture by risk category.
    pub risk_model_capture: Vec<CategoryCapture>,
    /// Side-by-side capture rates.
    pub allocation: Vec<AllocationRow>,
    /// Majority context of each cell with a populated tract.
    pub race_context: BTreeMap<CellId, String>,
    /// Mean signed error per context, for every variant.
    pub race_errors: Vec<GroupError>,
}

impl RunReport {
    /// The run with the given label.
    #[must_use]
    pub fn run(&self, label: &str) -> Option<&ModelRun> {
        self.runs.iter().find(|run| run.cross_validation.model == label)
    }
}

/// The four variants: random k-fold and LOGO, each with both covariate
/// sets.
#[must_use]
pub fn model_variants(config: &ModelConfig, cells: usize) -> Vec<ModelVariant> {
    let schemes = [
        FoldScheme::Random {
            folds: config.random_fold_count(cells),
            seed: config.seed,
        },
        FoldScheme::LeaveOneGroupOut {
            group: config.logo_group,
        },
    ];

    schemes
        .iter()
        .flat_map(|scheme| {
            CovariateSet::ALL.iter().map(|&covariates| ModelVariant {
                scheme: scheme.clone(),
                covariates,
            })
        })
        .collect()
}

/// Cross-validates every variant, then compares the allocation model with
/// the kernel density baseline and breaks errors down by majority context.
///
/// # Errors
///
/// Returns [`PipelineError::Analytics`] if fold assignment, a fit, or the
/// density estimate fails.
pub fn run_models(
    study: &StudyData,
    assembly: &Assembly,
    config: &ModelConfig,
    progress: &dyn ProgressCallback,
) -> Result<RunReport, PipelineError> {
    let table = &assembly.table;
    let variants = model_variants(config, table.len());
    let random_folds = config.random_fold_count(table.len());

    let mut runs = Vec::with_capacity(variants.len());
    for variant in variants {
        let label = variant.label();
        let covariates = variant.covariates.features(&assembly.risk_factors);
        let assignment = FoldAssignment::for_scheme(table, &variant.scheme)?;
        let cross_validation = cross_validate(table, &covariates, &assignment, &label, progress)?;
        log::info!("{label}: MAE {:.4}", cross_validation.mae());
        runs.push(ModelRun {
            variant,
            cross_validation,
        });
    }

    let summaries: Vec<ErrorSummary> = runs.iter().map(|r| r.cross_validation.summary()).collect();
    let fold_errors: Vec<FoldError> = runs
        .iter()
        .flat_map(|r| r.cross_validation.fold_errors())
        .collect();

    let centroids = assembly.row_centroids();
    let observed = evaluation_counts(study, assembly);
    let evaluated_on_holdout = study.holdout_incidents.is_some();

    let at: Vec<Point<f64>> = centroids.iter().map(|&(_, p)| p).collect();
    let density = kernel_density(&study.incidents.points, &at, config.kde_bandwidth)?;
    let density_scores: BTreeMap<CellId, f64> =
        centroids.iter().map(|&(cell, _)| cell).zip(density).collect();
    let kernel_density_capture = capture_rates(&risk_categories(&density_scores), &observed);

    let model_scores: BTreeMap<CellId, f64> = runs
        .iter()
        .find(|r| r.cross_validation.model == ALLOCATION_MODEL)
        .map(|r| {
            r.cross_validation
                .predictions
                .iter()
                .map(|p| (p.cell, p.predicted))
                .collect()
        })
        .unwrap_or_default();
    let risk_model_capture = capture_rates(&risk_categories(&model_scores), &observed);
    let allocation = compare_allocation(&kernel_density_capture, &risk_model_capture);

    let race_context = race_context(&study.tracts, &centroids);
    let race_errors = if race_context.is_empty() {
        log::info!("No tract context available, skipping error by context");
        Vec::new()
    } else {
        runs.iter()
            .flat_map(|r| {
                mean_error_by_group(
                    &r.cross_validation.model,
                    &r.cross_validation.predictions,
                    &race_context,
                )
            })
            .collect()
    };

    Ok(RunReport {
        runs,
        summaries,
        fold_errors,
        random_folds,
        evaluated_on_holdout,
        kernel_density_capture,
        risk_model_capture,
        allocation,
        race_context,
        race_errors,
    })
}

/// Incident counts per table cell used to score capture: the holdout layer
/// when present, else the modelled counts.
fn evaluation_counts(study: &StudyData, assembly: &Assembly) -> BTreeMap<CellId, f64> {
    let Some(holdout) = &study.holdout_incidents else {
        return assembly
            .table
            .rows()
            .iter()
            .map(|row| (row.cell, row.observed))
            .collect();
    };

    let counts = count_points(&assembly.fishnet, holdout);
    log::info!(
        "Evaluating against {} holdout incidents",
        counts.total()
    );
    counts
        .as_values()
        .filter(|(cell, _)| assembly.table.row(*cell).is_some())
        .collect()
}

/// Labels each cell by the majority context of the tract containing its
/// centroid. Unpopulated tracts are skipped.
fn race_context(tracts: &[Tract], centroids: &[(CellId, Point<f64>)]) -> BTreeMap<CellId, String> {
    let regions: Vec<NamedRegion> = tracts
        .iter()
        .filter_map(|tract| {
            tract.white_share().map(|share| NamedRegion {
                name: majority_context(share).to_string(),
                polygon: tract.polygon.clone(),
            })
        })
        .collect();
    if regions.is_empty() {
        return BTreeMap::new();
    }

    let index = RegionIndex::new(&regions);
    centroids
        .iter()
        .filter_map(|&(cell, point)| index.lookup(point).map(|label| (cell, label.to_string())))
        .collect()
}

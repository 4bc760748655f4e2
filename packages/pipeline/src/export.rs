//! Writes the result tables of a run.
//!
//! Every table is a CSV file in the output directory. `run_summary.json`
//! records the configuration and headline errors so a run can be compared
//! with later ones.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crime_risk_analytics_models::{ErrorSummary, FoldKey};
use crime_risk_feature_models::CellId;
use serde::Serialize;

use crate::{Assembly, ModelConfig, PipelineError, RunReport};

/// Per-cell features.
pub const FEATURES_FILE: &str = "features.csv";
/// Held-out predictions of every variant.
pub const PREDICTIONS_FILE: &str = "predictions.csv";
/// One row per variant.
pub const ERROR_SUMMARY_FILE: &str = "error_summary.csv";
/// One row per variant and fold.
pub const FOLD_ERRORS_FILE: &str = "fold_errors.csv";
/// Capture rate comparison.
pub const ALLOCATION_FILE: &str = "allocation.csv";
/// Mean error per majority context.
pub const RACE_CONTEXT_FILE: &str = "race_context.csv";
/// Local Moran's I per cell.
pub const LOCAL_MORAN_FILE: &str = "local_moran.csv";
/// Run metadata.
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Metadata written to `run_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Study source identifier.
    pub source_id: String,
    /// When the outputs were written.
    pub generated_at: DateTime<Utc>,
    /// Cells in the grid.
    pub grid_cells: usize,
    /// Cells in the feature table.
    pub modelled_cells: usize,
    /// Cells dropped for incomplete features.
    pub dropped_cells: usize,
    /// Hot spot cells.
    pub hotspots: usize,
    /// Random fold count.
    pub random_folds: u32,
    /// Whether capture rates used the holdout incidents.
    pub evaluated_on_holdout: bool,
    /// Configuration of the run.
    pub config: ModelConfig,
    /// Error summary per variant.
    pub errors: Vec<ErrorSummary>,
    /// Files written, relative to the output directory.
    pub files: Vec<String>,
}

#[derive(Serialize)]
struct PredictionRow<'a> {
    model: &'a str,
    cell: CellId,
    fold: &'a FoldKey,
    observed: f64,
    predicted: f64,
    error: f64,
}

#[derive(Serialize)]
struct MoranRow {
    cell: CellId,
    local_i: f64,
    z_score: f64,
    p_value: f64,
    significant: bool,
    hotspot: bool,
    isolated: bool,
}

/// Writes every result table and the run summary into `dir`, creating it
/// if needed.
///
/// # Errors
///
/// Returns [`PipelineError::Io`], [`PipelineError::Csv`], or
/// [`PipelineError::Json`] if a file cannot be written.
pub fn write_outputs(
    dir: &Path,
    source_id: &str,
    assembly: &Assembly,
    report: &RunReport,
    config: &ModelConfig,
) -> Result<RunSummary, PipelineError> {
    std::fs::create_dir_all(dir)?;

    write_features(&dir.join(FEATURES_FILE), assembly)?;

    let mut writer = csv::Writer::from_path(dir.join(PREDICTIONS_FILE))?;
    for run in &report.runs {
        let model = run.cross_validation.model.as_str();
        for record in &run.cross_validation.predictions {
            writer.serialize(PredictionRow {
                model,
                cell: record.cell,
                fold: &record.fold,
                observed: record.observed,
                predicted: record.predicted,
                error: record.error(),
            })?;
        }
    }
    writer.flush()?;

    write_rows(&dir.join(ERROR_SUMMARY_FILE), &report.summaries)?;
    write_rows(&dir.join(FOLD_ERRORS_FILE), &report.fold_errors)?;
    write_rows(&dir.join(ALLOCATION_FILE), &report.allocation)?;
    write_rows(&dir.join(RACE_CONTEXT_FILE), &report.race_errors)?;
    write_rows(
        &dir.join(LOCAL_MORAN_FILE),
        assembly.moran.iter().map(|m| MoranRow {
            cell: m.cell,
            local_i: m.statistic,
            z_score: m.z_score,
            p_value: m.p_value,
            significant: m.significant,
            hotspot: m.hotspot,
            isolated: m.isolated,
        }),
    )?;

    let summary = RunSummary {
        source_id: source_id.to_string(),
        generated_at: Utc::now(),
        grid_cells: assembly.fishnet.len(),
        modelled_cells: assembly.table.len(),
        dropped_cells: assembly.dropped.len(),
        hotspots: assembly.hotspots(),
        random_folds: report.random_folds,
        evaluated_on_holdout: report.evaluated_on_holdout,
        config: config.clone(),
        errors: report.summaries.clone(),
        files: [
            FEATURES_FILE,
            PREDICTIONS_FILE,
            ERROR_SUMMARY_FILE,
            FOLD_ERRORS_FILE,
            ALLOCATION_FILE,
            RACE_CONTEXT_FILE,
            LOCAL_MORAN_FILE,
        ]
        .iter()
        .map(ToString::to_string)
        .collect(),
    };

    let summary_path: PathBuf = dir.join(RUN_SUMMARY_FILE);
    std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
    log::info!("Wrote {} result files to {}", summary.files.len() + 1, dir.display());

    Ok(summary)
}

/// Header: `cell`, `observed`, one column per group, one per feature.
fn write_features(path: &Path, assembly: &Assembly) -> Result<(), PipelineError> {
    let table = &assembly.table;
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["cell".to_string(), "observed".to_string()];
    header.extend(table.groups().iter().map(ToString::to_string));
    header.extend(table.features().iter().map(ToString::to_string));
    writer.write_record(&header)?;

    for row in table.rows() {
        let mut record = vec![row.cell.to_string(), row.observed.to_string()];
        record.extend(
            table
                .groups()
                .iter()
                .map(|kind| row.group(*kind).unwrap_or_default().to_string()),
        );
        record.extend(
            table
                .features()
                .iter()
                .map(|feature| row.value(*feature).map_or_else(String::new, |v| v.to_string())),
        );
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_rows<T: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

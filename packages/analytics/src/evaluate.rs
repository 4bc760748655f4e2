//! Risk categories, capture rates and error by neighborhood context.

use std::collections::BTreeMap;

use crime_risk_analytics_models::{
    AllocationRow, CategoryCapture, GroupError, PredictionRecord, RiskCategory,
};
use crime_risk_feature_models::CellId;

/// Label for tracts whose white share exceeds one half.
pub const MAJORITY_WHITE: &str = "Majority_White";

/// Label for every other tract.
pub const MAJORITY_NON_WHITE: &str = "Majority_Non_White";

/// Percentile bucket in `1..=100` for each cell.
///
/// Cells are ranked ascending by score, ties broken by cell id, and rank
/// `r` (1-based) out of `n` maps to `floor(100 (r - 1) / n) + 1`.
#[must_use]
pub fn percentile_ranks(scores: &BTreeMap<CellId, f64>) -> BTreeMap<CellId, u32> {
    let mut ordered: Vec<(CellId, f64)> = scores.iter().map(|(&c, &s)| (c, s)).collect();
    ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let n = ordered.len() as u64;
    ordered
        .into_iter()
        .enumerate()
        .map(|(rank, (cell, _))| {
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (100 * rank as u64 / n) as u32 + 1;
            (cell, bucket)
        })
        .collect()
}

/// Risk category of each cell from its score percentile.
#[must_use]
pub fn risk_categories(scores: &BTreeMap<CellId, f64>) -> BTreeMap<CellId, RiskCategory> {
    percentile_ranks(scores)
        .into_iter()
        .map(|(cell, pct)| (cell, RiskCategory::from_percentile(pct)))
        .collect()
}

/// Share of observed incidents falling in each category, for all five
/// categories in ascending order. Rates are zero when nothing was observed.
///
/// Cells without an observed value contribute nothing.
#[must_use]
pub fn capture_rates(
    categories: &BTreeMap<CellId, RiskCategory>,
    observed: &BTreeMap<CellId, f64>,
) -> Vec<CategoryCapture> {
    let mut counts: BTreeMap<RiskCategory, f64> =
        RiskCategory::ALL.iter().map(|&c| (c, 0.0)).collect();
    for (cell, category) in categories {
        if let Some(count) = observed.get(cell) {
            *counts.entry(*category).or_default() += count;
        }
    }

    let total: f64 = counts.values().sum();
    counts
        .into_iter()
        .map(|(category, count)| CategoryCapture {
            category,
            count,
            rate: if total > 0.0 { count / total } else { 0.0 },
        })
        .collect()
}

/// Joins baseline and model capture rates by category.
#[must_use]
pub fn compare_allocation(
    kernel_density: &[CategoryCapture],
    risk_model: &[CategoryCapture],
) -> Vec<AllocationRow> {
    let rate = |rows: &[CategoryCapture], category: RiskCategory| {
        rows.iter()
            .find(|row| row.category == category)
            .map_or(0.0, |row| row.rate)
    };

    RiskCategory::ALL
        .iter()
        .map(|&category| AllocationRow {
            category,
            kernel_density_rate: rate(kernel_density, category),
            risk_model_rate: rate(risk_model, category),
        })
        .collect()
}

/// Context label for a white population share.
#[must_use]
pub fn majority_context(white_share: f64) -> &'static str {
    if white_share > 0.5 {
        MAJORITY_WHITE
    } else {
        MAJORITY_NON_WHITE
    }
}

/// Mean signed error (`predicted - observed`) per context group.
/// Predictions for cells with no context are skipped.
#[must_use]
pub fn mean_error_by_group(
    model: &str,
    predictions: &[PredictionRecord],
    context: &BTreeMap<CellId, String>,
) -> Vec<GroupError> {
    let mut groups: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for record in predictions {
        if let Some(label) = context.get(&record.cell) {
            let entry = groups.entry(label.as_str()).or_default();
            entry.0 += record.error();
            entry.1 += 1;
        }
    }

    groups
        .into_iter()
        .map(|(group, (sum, cells))| {
            #[allow(clippy::cast_precision_loss)]
            let mean_error = sum / cells as f64;
            GroupError {
                model: model.to_string(),
                group: group.to_string(),
                cells,
                mean_error,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crime_risk_analytics_models::FoldKey;

    #[test]
    fn ntile_of_two_hundred_cells() {
        let scores: BTreeMap<CellId, f64> =
            (0..200).map(|i| (CellId(i), f64::from(i))).collect();
        let ranks = percentile_ranks(&scores);
        assert_eq!(ranks[&CellId(0)], 1);
        assert_eq!(ranks[&CellId(1)], 1);
        assert_eq!(ranks[&CellId(2)], 2);
        assert_eq!(ranks[&CellId(199)], 100);

        let categories = risk_categories(&scores);
        assert_eq!(categories[&CellId(57)], RiskCategory::Lowest);
        assert_eq!(categories[&CellId(58)], RiskCategory::Low);
        assert_eq!(categories[&CellId(180)], RiskCategory::Highest);
    }

    #[test]
    fn ties_break_by_cell_id() {
        let scores = BTreeMap::from([(CellId(3), 1.0), (CellId(1), 1.0), (CellId(2), 0.0)]);
        let ranks = percentile_ranks(&scores);
        assert_eq!(ranks[&CellId(2)], 1);
        assert_eq!(ranks[&CellId(1)], 34);
        assert_eq!(ranks[&CellId(3)], 67);
    }

    #[test]
    fn capture_rates_cover_every_category() {
        let categories = BTreeMap::from([
            (CellId(0), RiskCategory::Lowest),
            (CellId(1), RiskCategory::Highest),
            (CellId(2), RiskCategory::Highest),
        ]);
        let observed = BTreeMap::from([(CellId(0), 1.0), (CellId(1), 2.0), (CellId(2), 1.0)]);
        let rates = capture_rates(&categories, &observed);

        assert_eq!(rates.len(), 5);
        assert_eq!(rates[0].category, RiskCategory::Lowest);
        assert!((rates[0].rate - 0.25).abs() < 1e-12);
        assert!((rates[4].rate - 0.75).abs() < 1e-12);
        assert_eq!(rates[2].count, 0.0);

        let empty = capture_rates(&categories, &BTreeMap::new());
        assert!(empty.iter().all(|r| r.rate == 0.0));
    }

    #[test]
    fn allocation_pairs_rates_by_category() {
        let capture = |category, rate| CategoryCapture {
            category,
            count: 0.0,
            rate,
        };
        let rows = compare_allocation(
            &[capture(RiskCategory::Highest, 0.6)],
            &[capture(RiskCategory::Highest, 0.7), capture(RiskCategory::Low, 0.3)],
        );
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4].kernel_density_rate, 0.6);
        assert_eq!(rows[4].risk_model_rate, 0.7);
        assert_eq!(rows[1].kernel_density_rate, 0.0);
        assert_eq!(rows[1].risk_model_rate, 0.3);
    }

    #[test]
    fn group_errors_are_signed_means() {
        let record = |cell, observed, predicted| PredictionRecord {
            cell: CellId(cell),
            fold: FoldKey::Bucket(1),
            observed,
            predicted,
        };
        let predictions = [record(0, 1.0, 3.0), record(1, 2.0, 1.0), record(2, 5.0, 5.0)];
        let context = BTreeMap::from([
            (CellId(0), majority_context(0.8).to_string()),
            (CellId(1), majority_context(0.5).to_string()),
        ]);

        let errors = mean_error_by_group("m", &predictions, &context);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].group, MAJORITY_NON_WHITE);
        assert_eq!(errors[0].mean_error, -1.0);
        assert_eq!(errors[1].group, MAJORITY_WHITE);
        assert_eq!(errors[1].mean_error, 2.0);
    }
}

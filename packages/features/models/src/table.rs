//! The per-cell feature table and its validating builder.
//!
//! A [`FeatureTable`] only ever contains complete rows: every declared
//! feature has a finite value and every declared group has a name. The
//! builder drops incomplete cells instead of failing, and reports which
//! cells were dropped.

use std::collections::{BTreeMap, BTreeSet};

use crate::{CellId, FeatureName, GroupKind};

/// Errors raised while assembling a [`FeatureTable`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// The same feature column was added twice.
    #[error("feature {0} declared more than once")]
    DuplicateFeature(FeatureName),

    /// The same group column was added twice.
    #[error("group {0} declared more than once")]
    DuplicateGroup(GroupKind),

    /// A value referenced a cell that is not part of the table.
    #[error("value supplied for unknown cell {cell} in column {column}")]
    UnknownCell {
        /// The offending cell.
        cell: CellId,
        /// The column being populated.
        column: String,
    },
}

/// One complete row of the feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// The grid cell this row describes.
    pub cell: CellId,
    /// Observed incident count in the cell.
    pub observed: f64,
    /// Group names keyed by grouping.
    pub groups: BTreeMap<GroupKind, String>,
    /// Feature values keyed by feature.
    pub values: BTreeMap<FeatureName, f64>,
}

impl FeatureRow {
    /// Returns the value of `feature`, if the row carries it.
    #[must_use]
    pub fn value(&self, feature: FeatureName) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    /// Returns the group name for `kind`, if the row carries it.
    #[must_use]
    pub fn group(&self, kind: GroupKind) -> Option<&str> {
        self.groups.get(&kind).map(String::as_str)
    }
}

/// A validated feature table, sorted by cell identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    features: Vec<FeatureName>,
    groups: Vec<GroupKind>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Declared feature columns, in declaration order.
    #[must_use]
    pub fn features(&self) -> &[FeatureName] {
        &self.features
    }

    /// Declared group columns, in declaration order.
    #[must_use]
    pub fn groups(&self) -> &[GroupKind] {
        &self.groups
    }

    /// All rows, sorted by cell identifier.
    #[must_use]
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up the row for `cell`.
    #[must_use]
    pub fn row(&self, cell: CellId) -> Option<&FeatureRow> {
        self.rows
            .binary_search_by_key(&cell, |row| row.cell)
            .ok()
            .map(|idx| &self.rows[idx])
    }

    /// Reopens the table so more columns can be added.
    ///
    /// Existing rows are complete, so they stay complete unless a new
    /// column leaves some of them without a value.
    #[must_use]
    pub fn into_builder(self) -> FeatureTableBuilder {
        let cells = self
            .rows
            .into_iter()
            .map(|row| {
                (
                    row.cell,
                    PartialRow {
                        observed: Some(row.observed),
                        groups: row.groups,
                        values: row.values,
                    },
                )
            })
            .collect();

        FeatureTableBuilder {
            cells,
            features: self.features,
            groups: self.groups,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PartialRow {
    observed: Option<f64>,
    groups: BTreeMap<GroupKind, String>,
    values: BTreeMap<FeatureName, f64>,
}

/// The result of [`FeatureTableBuilder::build`].
#[derive(Debug, Clone)]
pub struct TableAssembly {
    /// The validated table.
    pub table: FeatureTable,
    /// Cells excluded because at least one value was missing.
    pub dropped: Vec<CellId>,
}

/// Collects columns for a fixed set of cells and validates completeness.
#[derive(Debug, Clone)]
pub struct FeatureTableBuilder {
    cells: BTreeMap<CellId, PartialRow>,
    features: Vec<FeatureName>,
    groups: Vec<GroupKind>,
}

impl FeatureTableBuilder {
    /// Starts a builder over the given cells with no columns.
    #[must_use]
    pub fn new(cells: impl IntoIterator<Item = CellId>) -> Self {
        Self {
            cells: cells
                .into_iter()
                .map(|cell| (cell, PartialRow::default()))
                .collect(),
            features: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Sets the observed incident counts.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::UnknownCell`] if a value names a cell that
    /// the builder does not contain.
    pub fn observed(
        &mut self,
        values: impl IntoIterator<Item = (CellId, f64)>,
    ) -> Result<&mut Self, TableError> {
        for (cell, value) in values {
            self.partial_mut(cell, "observed")?.observed = Some(value);
        }
        Ok(self)
    }

    /// Declares `feature` and fills it from `values`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::DuplicateFeature`] if the feature is already
    /// declared, or [`TableError::UnknownCell`] for values of unknown cells.
    pub fn feature(
        &mut self,
        feature: FeatureName,
        values: impl IntoIterator<Item = (CellId, f64)>,
    ) -> Result<&mut Self, TableError> {
        if self.features.contains(&feature) {
            return Err(TableError::DuplicateFeature(feature));
        }
        self.features.push(feature);

        let column = feature.to_string();
        for (cell, value) in values {
            self.partial_mut(cell, &column)?
                .values
                .insert(feature, value);
        }
        Ok(self)
    }

    /// Declares group `kind` and fills it from `values`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::DuplicateGroup`] if the group is already
    /// declared, or [`TableError::UnknownCell`] for values of unknown cells.
    pub fn group(
        &mut self,
        kind: GroupKind,
        values: impl IntoIterator<Item = (CellId, String)>,
    ) -> Result<&mut Self, TableError> {
        if self.groups.contains(&kind) {
            return Err(TableError::DuplicateGroup(kind));
        }
        self.groups.push(kind);

        let column = kind.to_string();
        for (cell, name) in values {
            self.partial_mut(cell, &column)?.groups.insert(kind, name);
        }
        Ok(self)
    }

    fn partial_mut(&mut self, cell: CellId, column: &str) -> Result<&mut PartialRow, TableError> {
        self.cells
            .get_mut(&cell)
            .ok_or_else(|| TableError::UnknownCell {
                cell,
                column: column.to_string(),
            })
    }

    /// Validates every row and returns the complete ones.
    ///
    /// A row is complete when it has an observed count, a finite value for
    /// every declared feature, and a non-empty name for every declared
    /// group.
    #[must_use]
    pub fn build(self) -> TableAssembly {
        let declared: BTreeSet<FeatureName> = self.features.iter().copied().collect();
        let mut rows = Vec::with_capacity(self.cells.len());
        let mut dropped = Vec::new();

        for (cell, partial) in self.cells {
            let complete = partial.observed.is_some_and(f64::is_finite)
                && declared
                    .iter()
                    .all(|f| partial.values.get(f).is_some_and(|v| v.is_finite()))
                && self
                    .groups
                    .iter()
                    .all(|g| partial.groups.get(g).is_some_and(|name| !name.is_empty()));

            if complete {
                rows.push(FeatureRow {
                    cell,
                    observed: partial.observed.unwrap_or_default(),
                    groups: partial.groups,
                    values: partial.values,
                });
            } else {
                dropped.push(cell);
            }
        }

        if !dropped.is_empty() {
            log::warn!(
                "Dropped {} of {} cells with incomplete features",
                dropped.len(),
                rows.len() + dropped.len()
            );
        }

        TableAssembly {
            table: FeatureTable {
                features: self.features,
                groups: self.groups,
                rows,
            },
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RiskFactor;

    const GRAFFITI_NN: FeatureName = FeatureName::NearestNeighbor(RiskFactor::Graffiti);

    fn cells(n: u32) -> Vec<CellId> {
        (0..n).map(CellId).collect()
    }

    #[test]
    fn keeps_complete_rows() {
        let mut builder = FeatureTableBuilder::new(cells(3));
        builder
            .observed(cells(3).into_iter().map(|c| (c, 1.0)))
            .unwrap()
            .feature(GRAFFITI_NN, cells(3).into_iter().map(|c| (c, 10.0)))
            .unwrap();

        let assembly = builder.build();
        assert_eq!(assembly.table.len(), 3);
        assert!(assembly.dropped.is_empty());
        for row in assembly.table.rows() {
            assert_eq!(row.value(GRAFFITI_NN), Some(10.0));
        }
    }

    #[test]
    fn drops_rows_missing_a_feature_or_group() {
        let mut builder = FeatureTableBuilder::new(cells(4));
        builder
            .observed(cells(4).into_iter().map(|c| (c, 0.0)))
            .unwrap()
            .feature(
                GRAFFITI_NN,
                vec![(CellId(0), 1.0), (CellId(1), f64::NAN), (CellId(2), 2.0)],
            )
            .unwrap()
            .group(
                GroupKind::Neighborhood,
                vec![
                    (CellId(0), "Loop".to_string()),
                    (CellId(1), "Loop".to_string()),
                    (CellId(3), "Uptown".to_string()),
                ],
            )
            .unwrap();

        let assembly = builder.build();
        let kept: Vec<CellId> = assembly.table.rows().iter().map(|r| r.cell).collect();
        assert_eq!(kept, vec![CellId(0)]);
        assert_eq!(assembly.dropped, vec![CellId(1), CellId(2), CellId(3)]);
    }

    #[test]
    fn rejects_duplicate_and_unknown_columns() {
        let mut builder = FeatureTableBuilder::new(cells(2));
        builder.feature(GRAFFITI_NN, Vec::new()).unwrap();
        assert_eq!(
            builder.feature(GRAFFITI_NN, Vec::new()).unwrap_err(),
            TableError::DuplicateFeature(GRAFFITI_NN)
        );
        assert!(matches!(
            builder.observed(vec![(CellId(9), 1.0)]),
            Err(TableError::UnknownCell { cell: CellId(9), .. })
        ));
    }

    #[test]
    fn reopened_table_accepts_new_columns() {
        let mut builder = FeatureTableBuilder::new(cells(2));
        builder
            .observed(vec![(CellId(0), 3.0), (CellId(1), 0.0)])
            .unwrap();
        let table = builder.build().table;

        let mut reopened = table.into_builder();
        reopened
            .feature(
                FeatureName::SignificantCluster,
                vec![(CellId(0), 1.0), (CellId(1), 0.0)],
            )
            .unwrap();
        let table = reopened.build().table;

        assert_eq!(table.row(CellId(0)).unwrap().observed, 3.0);
        assert_eq!(
            table.row(CellId(1)).unwrap().value(FeatureName::SignificantCluster),
            Some(0.0)
        );
    }
}

//! Fishnet grid construction.
//!
//! Lays a square lattice over the boundary's bounding rectangle and keeps
//! every cell that intersects the boundary. Cells are not clipped, so every
//! cell has the same area. Identifiers are assigned row-major from the
//! bottom-left corner, counting only kept cells, so they are dense.

use crime_risk_feature_models::CellId;
use geo::{Area, BoundingRect, Intersects, MultiPolygon, Point, Polygon, Rect, coord};
use rstar::RTree;
use rstar::primitives::{GeomWithData, Rectangle};

use crate::SpatialError;

/// Upper bound on lattice size before any cell is generated.
const MAX_LATTICE_CELLS: u64 = 25_000_000;

type CellEnvelope = GeomWithData<Rectangle<[f64; 2]>, u32>;

/// A single square cell of the fishnet.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    /// Dense, unique identifier.
    pub id: CellId,
    /// Lattice row (from the bottom).
    pub row: u32,
    /// Lattice column (from the left).
    pub col: u32,
    /// Square cell polygon.
    pub polygon: Polygon<f64>,
    /// Cell center.
    pub centroid: Point<f64>,
}

/// The study-area grid.
#[derive(Debug, Clone)]
pub struct Fishnet {
    cells: Vec<GridCell>,
    index: RTree<CellEnvelope>,
}

impl Fishnet {
    /// Builds the grid covering `boundary` with square cells of side
    /// `cell_size` (in projection units).
    ///
    /// # Errors
    ///
    /// * [`SpatialError::InvalidCellSize`] if `cell_size` is not a positive
    ///   finite number.
    /// * [`SpatialError::InvalidBoundary`] if the boundary is empty, has
    ///   non-finite coordinates, has zero area, or would need an
    ///   unreasonably large lattice.
    pub fn build(boundary: &MultiPolygon<f64>, cell_size: f64) -> Result<Self, SpatialError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(SpatialError::InvalidCellSize(cell_size));
        }

        let bbox = validate_boundary(boundary)?;
        let (cols, rows) = lattice_dimensions(&bbox, cell_size)?;
        let origin = bbox.min();

        log::debug!("Laying {cols}x{rows} lattice with cell size {cell_size}");

        let mut cells = Vec::new();
        let mut next_id = 0u32;

        for row in 0..rows {
            for col in 0..cols {
                let rect = cell_rect(origin.x, origin.y, cell_size, col, row);
                let polygon = rect.to_polygon();
                if !boundary.intersects(&polygon) {
                    continue;
                }

                let center = rect.center();
                cells.push(GridCell {
                    id: CellId(next_id),
                    row,
                    col,
                    polygon,
                    centroid: Point::from(center),
                });
                next_id += 1;
            }
        }

        if cells.is_empty() {
            return Err(SpatialError::InvalidBoundary {
                message: "no grid cell intersects the boundary".to_string(),
            });
        }

        log::info!(
            "Built fishnet with {} cells ({} lattice positions)",
            cells.len(),
            u64::from(cols) * u64::from(rows)
        );

        let index = RTree::bulk_load(
            cells
                .iter()
                .map(|cell| {
                    let rect = cell_rect(origin.x, origin.y, cell_size, cell.col, cell.row);
                    GeomWithData::new(
                        Rectangle::from_corners(
                            [rect.min().x, rect.min().y],
                            [rect.max().x, rect.max().y],
                        ),
                        cell.id.value(),
                    )
                })
                .collect(),
        );

        Ok(Self {
            cells,
            index,
        })
    }

    /// All cells, ordered by identifier.
    #[must_use]
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells. A built grid never is.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Looks up a cell by identifier.
    #[must_use]
    pub fn cell(&self, id: CellId) -> Option<&GridCell> {
        self.cells.get(id.value() as usize)
    }

    /// The single cell a point is attributed to: the lowest identifier
    /// among the cells whose closed polygon contains it. A point on a
    /// shared edge or corner touches more than one cell.
    #[must_use]
    pub fn locate(&self, point: Point<f64>) -> Option<CellId> {
        self.index
            .locate_all_at_point(&[point.x(), point.y()])
            .map(|entry| CellId(entry.data))
            .min()
    }
}

fn validate_boundary(boundary: &MultiPolygon<f64>) -> Result<Rect<f64>, SpatialError> {
    if boundary.0.is_empty() {
        return Err(SpatialError::InvalidBoundary {
            message: "boundary has no polygons".to_string(),
        });
    }

    let Some(bbox) = boundary.bounding_rect() else {
        return Err(SpatialError::InvalidBoundary {
            message: "boundary has no coordinates".to_string(),
        });
    };

    let finite = [bbox.min().x, bbox.min().y, bbox.max().x, bbox.max().y]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return Err(SpatialError::InvalidBoundary {
            message: "boundary has non-finite coordinates".to_string(),
        });
    }

    let area = boundary.unsigned_area();
    if !(area.is_finite() && area > 0.0) {
        return Err(SpatialError::InvalidBoundary {
            message: format!("boundary area is {area}"),
        });
    }

    Ok(bbox)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lattice_dimensions(bbox: &Rect<f64>, cell_size: f64) -> Result<(u32, u32), SpatialError> {
    let cols = (bbox.width() / cell_size).ceil().max(1.0);
    let rows = (bbox.height() / cell_size).ceil().max(1.0);

    #[allow(clippy::cast_precision_loss)]
    let limit = MAX_LATTICE_CELLS as f64;
    if cols * rows > limit {
        return Err(SpatialError::InvalidBoundary {
            message: format!(
                "cell size {cell_size} needs a {cols}x{rows} lattice \
                 (more than {MAX_LATTICE_CELLS} cells)"
            ),
        });
    }

    Ok((cols as u32, rows as u32))
}

/// Corner coordinates are computed from integer lattice positions so
/// neighboring cells share bit-identical vertices.
fn cell_rect(x0: f64, y0: f64, size: f64, col: u32, row: u32) -> Rect<f64> {
    let min_x = f64::from(col).mul_add(size, x0);
    let min_y = f64::from(row).mul_add(size, y0);
    let max_x = f64::from(col + 1).mul_add(size, x0);
    let max_y = f64::from(row + 1).mul_add(size, y0);
    Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn rect_boundary(width: f64, height: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: width, y: height }).to_polygon(),
        ])
    }

    #[test]
    fn builds_dense_row_major_ids() {
        let fishnet = Fishnet::build(&rect_boundary(400.0, 400.0), 100.0).unwrap();
        assert_eq!(fishnet.len(), 16);

        let ids: Vec<u32> = fishnet.cells().iter().map(|c| c.id.value()).collect();
        assert_eq!(ids, (0..16).collect::<Vec<_>>());

        let unique: BTreeSet<CellId> = fishnet.cells().iter().map(|c| c.id).collect();
        assert_eq!(unique.len(), 16);

        let first = fishnet.cell(CellId(0)).unwrap();
        assert_eq!((first.row, first.col), (0, 0));
        let second = fishnet.cell(CellId(1)).unwrap();
        assert_eq!((second.row, second.col), (0, 1));
        assert!((first.centroid.x() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn drops_cells_outside_an_l_shaped_boundary() {
        // 300x300 square missing its top-right 200x200 quadrant.
        let boundary = MultiPolygon(vec![Polygon::new(
            geo::LineString::from(vec![
                (0.0, 0.0),
                (300.0, 0.0),
                (300.0, 100.0),
                (100.0, 100.0),
                (100.0, 300.0),
                (0.0, 300.0),
                (0.0, 0.0),
            ]),
            vec![],
        )]);
        let fishnet = Fishnet::build(&boundary, 50.0).unwrap();

        // 36 lattice cells minus the 16 strictly inside the missing quadrant.
        // Cells touching the notch edges still intersect the boundary.
        assert!(fishnet.len() < 36);
        assert!(fishnet.cells().iter().all(|c| boundary.intersects(&c.polygon)));
        assert!(
            fishnet
                .cells()
                .iter()
                .all(|c| !(c.centroid.x() > 125.0 && c.centroid.y() > 125.0))
        );
    }

    #[test]
    fn rejects_invalid_configuration() {
        let boundary = rect_boundary(100.0, 100.0);
        assert_eq!(
            Fishnet::build(&boundary, 0.0).unwrap_err(),
            SpatialError::InvalidCellSize(0.0)
        );
        assert!(Fishnet::build(&boundary, -5.0).is_err());
        assert!(Fishnet::build(&boundary, f64::NAN).is_err());
        assert!(matches!(
            Fishnet::build(&MultiPolygon(vec![]), 10.0),
            Err(SpatialError::InvalidBoundary { .. })
        ));
        assert!(matches!(
            Fishnet::build(&boundary, 1e-6),
            Err(SpatialError::InvalidBoundary { .. })
        ));
    }

    #[test]
    fn boundary_points_resolve_to_lowest_id() {
        let fishnet = Fishnet::build(&rect_boundary(200.0, 200.0), 100.0).unwrap();

        let corner = Point::new(100.0, 100.0);
        assert_eq!(fishnet.locate(corner), Some(CellId(0)));

        assert_eq!(fishnet.locate(Point::new(150.0, 50.0)), Some(CellId(1)));
        assert_eq!(fishnet.locate(Point::new(500.0, 50.0)), None);
    }
}

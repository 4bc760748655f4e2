//! Nearest-neighbor distance features.
//!
//! One function serves every proximity feature: risk-factor `.nn` columns
//! and the distance to significant hot-spot cells.

use geo::Point;
use rstar::RTree;

use crate::SpatialError;

/// For each point in `from`, the mean Euclidean distance to its `k`
/// nearest points in `to`. Output order matches `from`.
///
/// # Errors
///
/// * [`SpatialError::InvalidNeighborCount`] if `k` is zero.
/// * [`SpatialError::InsufficientPoints`] if `to` has fewer than `k`
///   points. `k` is never reduced to fit the data.
pub fn mean_nearest_distance(
    from: &[Point<f64>],
    to: &[Point<f64>],
    k: usize,
) -> Result<Vec<f64>, SpatialError> {
    if k == 0 {
        return Err(SpatialError::InvalidNeighborCount);
    }
    if to.len() < k {
        return Err(SpatialError::InsufficientPoints {
            required: k,
            available: to.len(),
        });
    }

    let tree = RTree::bulk_load(to.iter().map(|p| [p.x(), p.y()]).collect::<Vec<_>>());

    #[allow(clippy::cast_precision_loss)]
    let divisor = k as f64;

    Ok(from
        .iter()
        .map(|p| {
            tree.nearest_neighbor_iter_with_distance_2(&[p.x(), p.y()])
                .take(k)
                .map(|(_, dist_2)| dist_2.sqrt())
                .sum::<f64>()
                / divisor
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_reference_points_average_all_of_them() {
        let to = vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, 4.0),
            Point::new(-6.0, 8.0),
        ];
        let from = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)];

        let distances = mean_nearest_distance(&from, &to, 3).unwrap();

        for (origin, got) in from.iter().zip(&distances) {
            let expected = to
                .iter()
                .map(|p| (p.x() - origin.x()).hypot(p.y() - origin.y()))
                .sum::<f64>()
                / 3.0;
            assert!((got - expected).abs() < 1e-9, "{got} != {expected}");
        }
        assert!((distances[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn uses_only_the_k_closest() {
        let to = vec![
            Point::new(1.0, 0.0),
            Point::new(0.0, 2.0),
            Point::new(100.0, 100.0),
        ];
        let distances = mean_nearest_distance(&[Point::new(0.0, 0.0)], &to, 2).unwrap();
        assert!((distances[0] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn refuses_to_shrink_k() {
        let to = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
        assert_eq!(
            mean_nearest_distance(&[Point::new(0.0, 0.0)], &to, 3).unwrap_err(),
            SpatialError::InsufficientPoints {
                required: 3,
                available: 2
            }
        );
        assert_eq!(
            mean_nearest_distance(&[Point::new(0.0, 0.0)], &to, 0).unwrap_err(),
            SpatialError::InvalidNeighborCount
        );
    }

    #[test]
    fn is_idempotent() {
        let to: Vec<Point<f64>> = (0..20)
            .map(|i| Point::new(f64::from(i) * 7.0, f64::from(i % 5) * 3.0))
            .collect();
        let from = vec![Point::new(12.0, 4.0), Point::new(80.0, 1.0)];
        assert_eq!(
            mean_nearest_distance(&from, &to, 3).unwrap(),
            mean_nearest_distance(&from, &to, 3).unwrap()
        );
    }
}

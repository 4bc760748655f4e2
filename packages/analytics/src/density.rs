//! Gaussian kernel density, the baseline the risk model is compared to.

use geo::Point;
use rstar::RTree;

use crate::AnalyticsError;

/// Contributions beyond this many bandwidths are ignored.
const KERNEL_CUTOFF: f64 = 4.0;

/// Evaluates an isotropic Gaussian kernel density of `points` at each of
/// `at`, in input order.
///
/// The density is `sum(exp(-d^2 / 2h^2)) / (2 pi h^2)` over source points
/// within `4h`. There is no edge correction.
///
/// # Errors
///
/// Returns [`AnalyticsError::InvalidBandwidth`] unless `bandwidth` is a
/// positive finite number.
pub fn kernel_density(
    points: &[Point<f64>],
    at: &[Point<f64>],
    bandwidth: f64,
) -> Result<Vec<f64>, AnalyticsError> {
    if !(bandwidth.is_finite() && bandwidth > 0.0) {
        return Err(AnalyticsError::InvalidBandwidth(bandwidth));
    }

    let tree = RTree::bulk_load(points.iter().map(|p| [p.x(), p.y()]).collect());
    let h2 = bandwidth * bandwidth;
    let norm = 1.0 / (2.0 * std::f64::consts::PI * h2);
    let cutoff = (KERNEL_CUTOFF * bandwidth).powi(2);

    Ok(at
        .iter()
        .map(|target| {
            let query = [target.x(), target.y()];
            let sum: f64 = tree
                .locate_within_distance(query, cutoff)
                .map(|p| {
                    let dx = p[0] - query[0];
                    let dy = p[1] - query[1];
                    (-dx.mul_add(dx, dy * dy) / (2.0 * h2)).exp()
                })
                .sum();
            norm * sum
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_point_peak_matches_the_kernel() {
        let density =
            kernel_density(&[Point::new(0.0, 0.0)], &[Point::new(0.0, 0.0)], 10.0).unwrap();
        let expected = 1.0 / (2.0 * std::f64::consts::PI * 100.0);
        assert!((density[0] - expected).abs() < 1e-15);
    }

    #[test]
    fn density_decays_with_distance_and_is_truncated() {
        let points = [Point::new(0.0, 0.0)];
        let at = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(30.0, 0.0),
            Point::new(41.0, 0.0),
        ];
        let density = kernel_density(&points, &at, 10.0).unwrap();
        assert!(density[0] > density[1]);
        assert!(density[1] > density[2]);
        assert!(density[2] > 0.0);
        assert_eq!(density[3], 0.0);
    }

    #[test]
    fn densities_add_across_points() {
        let one = kernel_density(&[Point::new(5.0, 5.0)], &[Point::new(0.0, 0.0)], 8.0).unwrap();
        let two = kernel_density(
            &[Point::new(5.0, 5.0), Point::new(5.0, 5.0)],
            &[Point::new(0.0, 0.0)],
            8.0,
        )
        .unwrap();
        assert!((two[0] - 2.0 * one[0]).abs() < 1e-15);
    }

    #[test]
    fn rejects_bad_bandwidth() {
        assert!(matches!(
            kernel_density(&[], &[Point::new(0.0, 0.0)], 0.0),
            Err(AnalyticsError::InvalidBandwidth(_))
        ));
        assert_eq!(
            kernel_density(&[], &[Point::new(0.0, 0.0)], 1.0).unwrap(),
            vec![0.0]
        );
    }
}

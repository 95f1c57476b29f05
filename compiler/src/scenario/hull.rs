//! Convex-hull geometry for point clouds of any dimension
//!
//! Membership is decided exactly as a linear feasibility problem: `p` lies in
//! the hull of `V` iff some `λ ≥ 0` with `Σλ = 1` gives `Σ λᵢ vᵢ = p`. The
//! problem is solved with a dense phase-1 simplex using Bland's rule, which
//! cannot cycle. Boundary points count as inside.

const PIVOT_EPS: f64 = 1e-12;
const FEASIBILITY_TOL: f64 = 1e-9;

/// Rescale every coordinate to `[0, 1]` over the cloud's bounding box
///
/// Constant coordinates map to 0.
pub fn normalize(points: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let dim = first.len();
    let mut lo = vec![f64::INFINITY; dim];
    let mut hi = vec![f64::NEG_INFINITY; dim];
    for p in points {
        for k in 0..dim {
            lo[k] = lo[k].min(p[k]);
            hi[k] = hi[k].max(p[k]);
        }
    }
    points
        .iter()
        .map(|p| {
            (0..dim)
                .map(|k| {
                    let span = hi[k] - lo[k];
                    if span > 0.0 {
                        (p[k] - lo[k]) / span
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

/// Whether `point` is a convex combination of `vertices`
pub fn in_hull(point: &[f64], vertices: &[&[f64]]) -> bool {
    if vertices.is_empty() {
        return false;
    }
    let dim = point.len();
    let n = vertices.len();
    let rows = dim + 1;
    let rhs = n + rows;
    let width = rhs + 1;

    // [A | I | b] with A = vertex coordinates stacked over a row of ones
    let mut tableau = vec![vec![0.0; width]; rows];
    for (r, row) in tableau.iter_mut().enumerate() {
        if r < dim {
            for (j, v) in vertices.iter().enumerate() {
                row[j] = v[r];
            }
            row[rhs] = point[r];
        } else {
            row[..n].fill(1.0);
            row[rhs] = 1.0;
        }
        if row[rhs] < 0.0 {
            row.iter_mut().for_each(|x| *x = -*x);
        }
        row[n + r] = 1.0;
    }
    let mut basis: Vec<usize> = (n..n + rows).collect();

    // reduced costs of the phase-1 objective (sum of artificials)
    let mut cost = vec![0.0; width];
    for j in (0..n).chain(std::iter::once(rhs)) {
        cost[j] = -tableau.iter().map(|row| row[j]).sum::<f64>();
    }

    let max_iterations = 50 * (n + rows);
    for _ in 0..max_iterations {
        let Some(enter) = (0..n + rows).find(|&j| cost[j] < -PIVOT_EPS) else {
            break;
        };

        let mut leave: Option<(usize, f64)> = None;
        for (r, row) in tableau.iter().enumerate() {
            if row[enter] > PIVOT_EPS {
                let ratio = row[rhs] / row[enter];
                let better = match leave {
                    None => true,
                    Some((best, best_ratio)) => {
                        ratio < best_ratio - PIVOT_EPS
                            || (ratio <= best_ratio + PIVOT_EPS && basis[r] < basis[best])
                    }
                };
                if better {
                    leave = Some((r, ratio));
                }
            }
        }
        // phase 1 is bounded below by zero
        let Some((pivot_row, _)) = leave else {
            break;
        };

        pivot(&mut tableau, &mut cost, pivot_row, enter);
        basis[pivot_row] = enter;
    }

    -cost[rhs] <= FEASIBILITY_TOL
}

fn pivot(tableau: &mut [Vec<f64>], cost: &mut [f64], pivot_row: usize, col: usize) {
    let p = tableau[pivot_row][col];
    tableau[pivot_row].iter_mut().for_each(|x| *x /= p);
    let pivot_vals = tableau[pivot_row].clone();

    for (r, row) in tableau.iter_mut().enumerate() {
        if r == pivot_row {
            continue;
        }
        let factor = row[col];
        if factor != 0.0 {
            row.iter_mut()
                .zip(&pivot_vals)
                .for_each(|(x, &pv)| *x -= factor * pv);
        }
    }
    let factor = cost[col];
    if factor != 0.0 {
        cost.iter_mut()
            .zip(&pivot_vals)
            .for_each(|(x, &pv)| *x -= factor * pv);
    }
}

/// Indices of the hull vertices
///
/// A point is a vertex when it is not a convex combination of the other
/// (distinct) points. Of several identical points only the first is kept.
pub fn hull_vertices(points: &[Vec<f64>]) -> Vec<usize> {
    let mut vertices = Vec::new();
    for (i, p) in points.iter().enumerate() {
        if points[..i].iter().any(|q| q == p) {
            continue;
        }
        let others: Vec<&[f64]> = points
            .iter()
            .filter(|q| *q != p)
            .map(|q| q.as_slice())
            .collect();
        if !in_hull(p, &others) {
            vertices.push(i);
        }
    }
    vertices
}

/// Number of `points` inside the hull of `vertices`
pub fn count_inside(points: &[Vec<f64>], vertices: &[&[f64]]) -> usize {
    points.iter().filter(|p| in_hull(p, vertices)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_with_center() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.5, 0.5],
            vec![1.0, 1.0],
            vec![0.0, 1.0],
        ]
    }

    #[test]
    fn test_in_hull_inside_boundary_outside() {
        let pts = square_with_center();
        let corners: Vec<&[f64]> = [0, 1, 3, 4].iter().map(|&i| pts[i].as_slice()).collect();
        assert!(in_hull(&[0.25, 0.75], &corners));
        assert!(in_hull(&[1.0, 0.5], &corners));
        assert!(!in_hull(&[1.5, 0.5], &corners));
        assert!(!in_hull(&[-0.01, 0.2], &corners));
    }

    #[test]
    fn test_degenerate_hulls() {
        let a = [0.0, 0.0];
        let b = [1.0, 1.0];
        let segment: Vec<&[f64]> = vec![&a, &b];
        assert!(in_hull(&[0.3, 0.3], &segment));
        assert!(!in_hull(&[0.3, 0.4], &segment));
        assert!(in_hull(&[0.0, 0.0], &[&a[..]]));
        assert!(!in_hull(&[0.0, 0.0], &[]));
    }

    #[test]
    fn test_vertices_of_square() {
        assert_eq!(hull_vertices(&square_with_center()), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_duplicate_vertex_kept_once() {
        let pts = vec![
            vec![0.0, 0.0],
            vec![0.0, 0.0],
            vec![2.0, 0.0],
            vec![0.0, 2.0],
        ];
        assert_eq!(hull_vertices(&pts), vec![0, 2, 3]);
    }

    #[test]
    fn test_vertices_in_three_dimensions() {
        let mut pts = vec![
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        pts.push(vec![0.1, 0.1, 0.1]);
        assert_eq!(hull_vertices(&pts), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_normalize_to_unit_box() {
        let pts = vec![vec![10.0, 5.0], vec![20.0, 5.0], vec![15.0, 5.0]];
        let n = normalize(&pts);
        assert_eq!(n, vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.5, 0.0]]);
    }
}

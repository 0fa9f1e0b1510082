//! Offline optimal assignment (maximum-weight bipartite matching).
//!
//! Given the full value matrix of a batch of items against slots, finds the
//! one-to-one assignment with the largest total value. This is the
//! full-information optimum an online policy is measured against.
//!
//! Values are turned into costs `max(V) - v` and solved with the Hungarian
//! method using row/column potentials, O(k² · K) for k = min(rows, cols) and
//! K = max(rows, cols). A rectangular matrix assigns every row of its shorter
//! side; the longer side keeps `K - k` entries unmatched.
//!
//! Ties between equally good assignments are broken by the algorithm (the
//! first column reaching the minimal reduced cost in scan order), not by any
//! application rule.

use crate::error::{Error, Result};
use crate::types::ValueMatrix;

/// An optimal assignment: `(row, col)` pairs sorted by row, and their total
/// value in the original matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Matching {
    pub pairs: Vec<(usize, usize)>,
    pub total: f64,
}

/// Maximum total value of a one-to-one assignment of rows to columns.
pub fn solve(values: &ValueMatrix) -> Result<f64> {
    solve_assignment(values).map(|m| m.total)
}

/// Optimal assignment with the chosen pairs.
pub fn solve_assignment(values: &ValueMatrix) -> Result<Matching> {
    if values.is_empty() {
        return Err(Error::value(format!(
            "cannot match an empty {}x{} value matrix",
            values.rows(),
            values.cols()
        )));
    }

    let max = values.max().unwrap_or(0.0);
    let min = values.min().unwrap_or(0.0);
    // Potentials accumulate up to one spread per row, so that sum must stay
    // finite for the reduced costs to keep ordering.
    let bound = (max - min) * (values.rows().max(values.cols()) + 1) as f64;
    if !bound.is_finite() {
        return Err(Error::value(format!(
            "value spread {} .. {} is too wide to match",
            min, max
        )));
    }
    let transposed = values.rows() > values.cols();
    let oriented = if transposed {
        values.transpose()
    } else {
        values.clone()
    };

    let row_to_col = hungarian_min(oriented.rows(), oriented.cols(), |r, c| {
        max - oriented.get(r, c)
    });

    let mut pairs: Vec<(usize, usize)> = row_to_col
        .into_iter()
        .enumerate()
        .map(|(r, c)| if transposed { (c, r) } else { (r, c) })
        .collect();
    pairs.sort_unstable();

    let total = pairs.iter().map(|&(r, c)| values.get(r, c)).sum();
    Ok(Matching { pairs, total })
}

/// Minimum-cost assignment of every row to a distinct column (`n <= m`).
/// Returns the column chosen for each row.
fn hungarian_min<F>(n: usize, m: usize, cost: F) -> Vec<usize>
where
    F: Fn(usize, usize) -> f64,
{
    debug_assert!(n <= m);
    // 1-based potentials; index 0 is the virtual source column.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    // owner[j] = row matched to column j (1-based, 0 = free).
    let mut owner = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        owner[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }

            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }

        // Augment along the alternating path back to the source.
        loop {
            let j1 = way[j0];
            owner[j0] = owner[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_to_col = vec![0usize; n];
    for j in 1..=m {
        if owner[j] != 0 {
            row_to_col[owner[j] - 1] = j - 1;
        }
    }
    row_to_col
}

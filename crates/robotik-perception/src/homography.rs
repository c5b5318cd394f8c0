//! Planar projective transforms.
//!
//! A [`Homography`] maps points between two planes, here the camera image
//! and the board surface. It is estimated from exactly four point pairs by
//! solving the direct linear transform with `h33 = 1`.
//!
//! # Example
//!
//! ```rust
//! use robotik_perception::homography::Homography;
//!
//! let src = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
//! let dst = [[10.0, 10.0], [30.0, 10.0], [30.0, 30.0], [10.0, 30.0]];
//! let h = Homography::from_points(&src, &dst).unwrap();
//! let p = h.apply([0.5, 0.5]).unwrap();
//! assert!((p[0] - 20.0).abs() < 1e-9 && (p[1] - 20.0).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-12;

/// Row-major 3×3 projective matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Homography(pub [[f64; 3]; 3]);

impl Homography {
    pub fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Estimate the transform taking each `src[i]` to `dst[i]`.
    ///
    /// Returns `None` for degenerate configurations (three collinear points,
    /// repeated points).
    pub fn from_points(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Option<Self> {
        let mut a = [[0.0f64; 9]; 8];
        for (i, (s, d)) in src.iter().zip(dst).enumerate() {
            let [x, y] = *s;
            let [u, v] = *d;
            a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u, u];
            a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v, v];
        }
        let h = solve_augmented(a)?;
        Some(Self([
            [h[0], h[1], h[2]],
            [h[3], h[4], h[5]],
            [h[6], h[7], 1.0],
        ]))
    }

    /// Inverse transform, or `None` if the matrix is singular.
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.0;
        let cof = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };
        let adj = [
            [cof(1, 2, 1, 2), -cof(0, 2, 1, 2), cof(0, 1, 1, 2)],
            [-cof(1, 2, 0, 2), cof(0, 2, 0, 2), -cof(0, 1, 0, 2)],
            [cof(1, 2, 0, 1), -cof(0, 2, 0, 1), cof(0, 1, 0, 1)],
        ];
        let det = m[0][0] * adj[0][0] + m[0][1] * adj[1][0] + m[0][2] * adj[2][0];
        if det.abs() < EPS {
            return None;
        }
        let mut inv = adj.map(|row| row.map(|v| v / det));
        let scale = inv[2][2];
        if scale.abs() > EPS {
            inv = inv.map(|row| row.map(|v| v / scale));
        }
        Some(Self(inv))
    }

    /// Map a point. `None` when it lands on the line at infinity.
    pub fn apply(&self, p: [f64; 2]) -> Option<[f64; 2]> {
        let m = &self.0;
        let w = m[2][0] * p[0] + m[2][1] * p[1] + m[2][2];
        if w.abs() < EPS {
            return None;
        }
        Some([
            (m[0][0] * p[0] + m[0][1] * p[1] + m[0][2]) / w,
            (m[1][0] * p[0] + m[1][1] * p[1] + m[1][2]) / w,
        ])
    }
}

/// Gauss-Jordan elimination with partial pivoting on an 8×9 augmented matrix.
fn solve_augmented(mut a: [[f64; 9]; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < EPS {
            return None;
        }
        a.swap(col, pivot);
        let p = a[col][col];
        for v in a[col].iter_mut() {
            *v /= p;
        }
        for row in 0..8 {
            if row != col {
                let factor = a[row][col];
                if factor != 0.0 {
                    let pivot_row = a[col];
                    for (v, pv) in a[row].iter_mut().zip(pivot_row) {
                        *v -= factor * pv;
                    }
                }
            }
        }
    }
    let mut x = [0.0; 8];
    for (i, row) in a.iter().enumerate() {
        x[i] = row[8];
    }
    Some(x)
}

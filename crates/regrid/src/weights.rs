//! Precomputed bilinear interpolation weights.
//!
//! For a (source grid, target grid) pair the four contributing source
//! corners and their weights are resolved once, then reused for every
//! frame of the time axis. Separable source grids (rows of constant
//! latitude, columns of constant longitude) take a binary-search fast
//! path; genuinely curvilinear sources fall back to a per-point quad
//! search with an iterative inverse-bilinear solve.

use ndarray::{Array2, ArrayView2};

use eval_common::{EvalError, EvalResult};

/// Tolerance for treating a mesh as separable and for hull edge checks.
const AXIS_EPS: f64 = 1e-6;

/// One contributing source node.
#[derive(Debug, Clone, Copy)]
pub struct Corner {
    pub j: usize,
    pub i: usize,
    pub w: f64,
}

/// Interpolation weights for every target cell; `None` marks targets
/// outside the source hull.
#[derive(Debug, Clone)]
pub struct BilinearWeights {
    nx: usize,
    cells: Vec<Option<[Corner; 4]>>,
}

impl BilinearWeights {
    /// Resolve weights for every point of the target meshes.
    pub fn compute(
        src_lats: &Array2<f64>,
        src_lons: &Array2<f64>,
        tgt_lats: &Array2<f64>,
        tgt_lons: &Array2<f64>,
        dataset_name: &str,
    ) -> EvalResult<Self> {
        if tgt_lats.shape() != tgt_lons.shape() {
            return Err(EvalError::GridMismatch {
                stage: "regrid".into(),
                dataset: dataset_name.to_string(),
                reason: "target lat and lon meshes differ in shape".into(),
            });
        }
        let (tny, tnx) = (tgt_lats.shape()[0], tgt_lats.shape()[1]);
        let mut cells = Vec::with_capacity(tny * tnx);

        if is_separable(src_lats, src_lons) {
            let lat_axis: Vec<f64> = src_lats.column(0).to_vec();
            let lon_axis: Vec<f64> = src_lons.row(0).to_vec();
            if lat_axis.windows(2).any(|w| w[1] < w[0])
                || lon_axis.windows(2).any(|w| w[1] < w[0])
            {
                return Err(EvalError::NonMonotonicAxis {
                    dataset: dataset_name.to_string(),
                    axis: "regrid source".into(),
                });
            }
            let cyclic = is_cyclic(&lon_axis);
            for j in 0..tny {
                for i in 0..tnx {
                    cells.push(separable_weights(
                        &lat_axis,
                        &lon_axis,
                        cyclic,
                        tgt_lats[[j, i]],
                        tgt_lons[[j, i]],
                    ));
                }
            }
        } else {
            for j in 0..tny {
                for i in 0..tnx {
                    cells.push(curvilinear_weights(
                        src_lats,
                        src_lons,
                        tgt_lats[[j, i]],
                        tgt_lons[[j, i]],
                    ));
                }
            }
        }

        Ok(Self { nx: tnx, cells })
    }

    /// Interpolate one target cell from a source frame, honoring the
    /// strict mask policy: any masked corner yields `None`.
    pub fn interpolate(
        &self,
        j: usize,
        i: usize,
        frame: &ArrayView2<'_, f64>,
        mask: &ArrayView2<'_, bool>,
    ) -> Option<f64> {
        let corners = self.cells[j * self.nx + i].as_ref()?;
        if corners.iter().any(|c| mask[[c.j, c.i]]) {
            return None;
        }
        Some(corners.iter().map(|c| c.w * frame[[c.j, c.i]]).sum())
    }
}

/// Rows of constant latitude and columns of constant longitude.
fn is_separable(lats: &Array2<f64>, lons: &Array2<f64>) -> bool {
    let (ny, nx) = (lats.shape()[0], lats.shape()[1]);
    for j in 0..ny {
        let first = lats[[j, 0]];
        for i in 1..nx {
            if (lats[[j, i]] - first).abs() > AXIS_EPS {
                return false;
            }
        }
    }
    for i in 0..nx {
        let first = lons[[0, i]];
        for j in 1..ny {
            if (lons[[j, i]] - first).abs() > AXIS_EPS {
                return false;
            }
        }
    }
    true
}

/// Whether a longitude axis wraps the globe within one grid step.
fn is_cyclic(lon_axis: &[f64]) -> bool {
    if lon_axis.len() < 3 {
        return false;
    }
    let span = lon_axis[lon_axis.len() - 1] - lon_axis[0];
    let mean_step = span / (lon_axis.len() - 1) as f64;
    (360.0 - span) <= 1.5 * mean_step + AXIS_EPS
}

/// Bracket `x` on a sorted axis, returning (lower index, fraction).
fn bracket(axis: &[f64], x: f64) -> Option<(usize, f64)> {
    let n = axis.len();
    if n == 1 {
        return ((x - axis[0]).abs() <= AXIS_EPS).then_some((0, 0.0));
    }
    if x < axis[0] - AXIS_EPS || x > axis[n - 1] + AXIS_EPS {
        return None;
    }
    let x = x.clamp(axis[0], axis[n - 1]);
    let mut lo = axis.partition_point(|&v| v <= x);
    if lo > 0 {
        lo -= 1;
    }
    if lo >= n - 1 {
        lo = n - 2;
    }
    let width = axis[lo + 1] - axis[lo];
    let f = if width > 0.0 { (x - axis[lo]) / width } else { 0.0 };
    Some((lo, f))
}

fn separable_weights(
    lat_axis: &[f64],
    lon_axis: &[f64],
    cyclic: bool,
    lat: f64,
    lon: f64,
) -> Option<[Corner; 4]> {
    let (j0, fy) = bracket(lat_axis, lat)?;
    let j1 = (j0 + 1).min(lat_axis.len() - 1);

    let nx = lon_axis.len();
    let (i0, i1, fx) = match bracket(lon_axis, lon) {
        Some((i0, fx)) => (i0, (i0 + 1).min(nx - 1), fx),
        None if cyclic => {
            // Seam interval between the last meridian and the first + 360.
            let first = lon_axis[0];
            let last = lon_axis[nx - 1];
            let lon_adj = if lon < first { lon + 360.0 } else { lon };
            let width = first + 360.0 - last;
            if lon_adj < last - AXIS_EPS || lon_adj > first + 360.0 + AXIS_EPS || width <= 0.0 {
                return None;
            }
            (nx - 1, 0, ((lon_adj - last) / width).clamp(0.0, 1.0))
        }
        None => return None,
    };

    Some([
        Corner {
            j: j0,
            i: i0,
            w: (1.0 - fy) * (1.0 - fx),
        },
        Corner {
            j: j0,
            i: i1,
            w: (1.0 - fy) * fx,
        },
        Corner {
            j: j1,
            i: i0,
            w: fy * (1.0 - fx),
        },
        Corner {
            j: j1,
            i: i1,
            w: fy * fx,
        },
    ])
}

/// Locate the enclosing quadrilateral on a curvilinear mesh and solve for
/// bilinear weights. Targets with no enclosing quad are outside the hull.
fn curvilinear_weights(
    lats: &Array2<f64>,
    lons: &Array2<f64>,
    lat: f64,
    lon: f64,
) -> Option<[Corner; 4]> {
    let (ny, nx) = (lats.shape()[0], lats.shape()[1]);
    if ny < 2 || nx < 2 {
        return None;
    }

    // Nearest node anchors the quad search.
    let mut best = (0usize, 0usize);
    let mut best_d = f64::INFINITY;
    for j in 0..ny {
        for i in 0..nx {
            let d = (lats[[j, i]] - lat).powi(2) + (lons[[j, i]] - lon).powi(2);
            if d < best_d {
                best_d = d;
                best = (j, i);
            }
        }
    }

    let (jn, inn) = best;
    let j_lo = jn.saturating_sub(1);
    let i_lo = inn.saturating_sub(1);
    for j0 in j_lo..=jn.min(ny - 2) {
        for i0 in i_lo..=inn.min(nx - 2) {
            let quad = [
                (lons[[j0, i0]], lats[[j0, i0]]),
                (lons[[j0, i0 + 1]], lats[[j0, i0 + 1]]),
                (lons[[j0 + 1, i0]], lats[[j0 + 1, i0]]),
                (lons[[j0 + 1, i0 + 1]], lats[[j0 + 1, i0 + 1]]),
            ];
            if let Some((fx, fy)) = invert_bilinear((lon, lat), &quad) {
                return Some([
                    Corner {
                        j: j0,
                        i: i0,
                        w: (1.0 - fy) * (1.0 - fx),
                    },
                    Corner {
                        j: j0,
                        i: i0 + 1,
                        w: (1.0 - fy) * fx,
                    },
                    Corner {
                        j: j0 + 1,
                        i: i0,
                        w: fy * (1.0 - fx),
                    },
                    Corner {
                        j: j0 + 1,
                        i: i0 + 1,
                        w: fy * fx,
                    },
                ]);
            }
        }
    }
    None
}

/// Newton solve of the inverse bilinear map. Quad corners are ordered
/// (j0,i0), (j0,i1), (j1,i0), (j1,i1); returns (fx, fy) in [0, 1] when the
/// point lies inside the quad.
fn invert_bilinear(p: (f64, f64), quad: &[(f64, f64); 4]) -> Option<(f64, f64)> {
    let (px, py) = p;
    let [(x00, y00), (x01, y01), (x10, y10), (x11, y11)] = *quad;
    let mut fx = 0.5;
    let mut fy = 0.5;
    for _ in 0..20 {
        let x = (1.0 - fy) * ((1.0 - fx) * x00 + fx * x01) + fy * ((1.0 - fx) * x10 + fx * x11);
        let y = (1.0 - fy) * ((1.0 - fx) * y00 + fx * y01) + fy * ((1.0 - fx) * y10 + fx * y11);
        let rx = x - px;
        let ry = y - py;
        if rx.abs() < 1e-12 && ry.abs() < 1e-12 {
            break;
        }
        let dx_dfx = (1.0 - fy) * (x01 - x00) + fy * (x11 - x10);
        let dx_dfy = (1.0 - fx) * (x10 - x00) + fx * (x11 - x01);
        let dy_dfx = (1.0 - fy) * (y01 - y00) + fy * (y11 - y10);
        let dy_dfy = (1.0 - fx) * (y10 - y00) + fx * (y11 - y01);
        let det = dx_dfx * dy_dfy - dx_dfy * dy_dfx;
        if det.abs() < 1e-14 {
            return None;
        }
        fx -= (rx * dy_dfy - ry * dx_dfy) / det;
        fy -= (ry * dx_dfx - rx * dy_dfx) / det;
        if !(fx.is_finite() && fy.is_finite()) {
            return None;
        }
    }
    let tol = 1e-6;
    if (-tol..=1.0 + tol).contains(&fx) && (-tol..=1.0 + tol).contains(&fy) {
        Some((fx.clamp(0.0, 1.0), fy.clamp(0.0, 1.0)))
    } else {
        None
    }
}

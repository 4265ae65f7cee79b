//! Pressure projection for incompressible flow with a free surface.
//!
//! Solves `A p = -div(u) + c` over Fluid cells with a Jacobi-preconditioned
//! conjugate gradient. Obstacle and out-of-domain neighbors are Neumann;
//! Empty neighbors are Dirichlet `p = 0`, placed at the level-set zero
//! crossing (ghost fluid) when a level set is given.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::MIN_THETA;
use crate::error::NumericalError;
use crate::grid::{Axis, CellFlag, FlagGrid, LevelSet, MacGrid, ScalarGrid};

/// Convergence settings for the pressure solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureSettings {
    /// Max-norm residual tolerance
    pub accuracy: f64,
    pub max_iterations: usize,
}

impl Default for PressureSettings {
    fn default() -> Self {
        Self {
            accuracy: 1e-3,
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Converged,
    MaxIterationsReached,
}

/// Outcome of a pressure solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub status: SolverStatus,
    pub iterations: usize,
    /// Final max-norm residual
    pub residual: f64,
    /// Number of pressure unknowns
    pub unknowns: usize,
}

/// Compute divergence of velocity field on fluid cells (zero elsewhere).
/// div(v) = du/dx + dv/dy + dw/dz
pub fn compute_divergence(flags: &FlagGrid, vel: &MacGrid) -> ScalarGrid {
    let dims = flags.dims();
    let mut div = ScalarGrid::new(dims, 0.0);
    div.data_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, value)| {
            if !flags.is_fluid(idx) {
                return;
            }
            let (i, j, k) = dims.cell_coords(idx);
            let mut sum = 0.0;
            for &axis in dims.active_axes() {
                let (hi_i, hi_j, hi_k) = upper_face(axis, i, j, k);
                let comp = vel.component(axis);
                sum += comp[dims.face_index(axis, hi_i, hi_j, hi_k)]
                    - comp[dims.face_index(axis, i, j, k)];
            }
            *value = sum;
        });
    div
}

#[inline]
fn upper_face(axis: Axis, i: usize, j: usize, k: usize) -> (usize, usize, usize) {
    match axis {
        Axis::X => (i + 1, j, k),
        Axis::Y => (i, j + 1, k),
        Axis::Z => (i, j, k + 1),
    }
}

/// Interface fraction between a fluid cell and an empty neighbor.
#[inline]
fn ghost_theta(phi: Option<&LevelSet>, fluid: usize, empty: usize) -> f64 {
    match phi {
        Some(phi) => {
            let pc = phi.at(fluid);
            let pn = phi.at(empty);
            let denom = pc - pn;
            if pc < 0.0 && denom < 0.0 {
                (pc / denom).clamp(MIN_THETA, 1.0) as f64
            } else {
                1.0
            }
        }
        None => 1.0,
    }
}

/// Matrix-free 7-point Poisson operator over the fluid unknowns.
struct PoissonSystem {
    /// Cell index of each unknown
    cells: Vec<usize>,
    diag: Vec<f64>,
    /// Unknown indices of fluid neighbors (-1 coefficient each)
    neighbors: Vec<[Option<usize>; 6]>,
    /// Some unknown borders an Empty cell (p = 0 anchors the solution)
    has_free_surface: bool,
}

impl PoissonSystem {
    fn build(flags: &FlagGrid, phi: Option<&LevelSet>) -> Self {
        let dims = flags.dims();
        let n = dims.cell_count();

        // Fluid cells with at least one open neighbor become unknowns
        let mut unknown_of = vec![usize::MAX; n];
        let mut cells = Vec::new();
        for idx in 0..n {
            if !flags.is_fluid(idx) {
                continue;
            }
            let (i, j, k) = dims.cell_coords(idx);
            let open = dims
                .neighbors(i, j, k)
                .iter()
                .flatten()
                .any(|&nb| !flags.is_obstacle(nb));
            if open {
                unknown_of[idx] = cells.len();
                cells.push(idx);
            }
        }

        let mut diag = Vec::with_capacity(cells.len());
        let mut neighbors = Vec::with_capacity(cells.len());
        let mut has_free_surface = false;
        for &idx in &cells {
            let (i, j, k) = dims.cell_coords(idx);
            let mut d = 0.0;
            let mut row = [None; 6];
            for (slot, nb) in dims.neighbors(i, j, k).iter().enumerate() {
                let Some(nb) = *nb else { continue };
                match flags.at(nb) {
                    CellFlag::Obstacle => {}
                    CellFlag::Fluid => {
                        d += 1.0;
                        if unknown_of[nb] != usize::MAX {
                            row[slot] = Some(unknown_of[nb]);
                        }
                    }
                    CellFlag::Empty => {
                        d += 1.0 / ghost_theta(phi, idx, nb);
                        has_free_surface = true;
                    }
                }
            }
            diag.push(d);
            neighbors.push(row);
        }

        Self {
            cells,
            diag,
            neighbors,
            has_free_surface,
        }
    }

    fn len(&self) -> usize {
        self.cells.len()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        out.par_iter_mut().enumerate().for_each(|(row, value)| {
            let mut sum = self.diag[row] * x[row];
            for col in self.neighbors[row].iter().flatten() {
                sum -= x[*col];
            }
            *value = sum;
        });
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn max_abs(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |m, v| m.max(v.abs()))
}

/// Jacobi-preconditioned CG. Returns (status, iterations, residual).
fn pcg(
    system: &PoissonSystem,
    b: &[f64],
    x: &mut [f64],
    settings: &PressureSettings,
) -> (SolverStatus, usize, f64) {
    let n = system.len();
    let inv_diag: Vec<f64> = system.diag.iter().map(|&d| 1.0 / d).collect();

    x.fill(0.0);
    let mut r = b.to_vec();
    let mut residual = max_abs(&r);
    if residual < settings.accuracy {
        return (SolverStatus::Converged, 0, residual);
    }

    let mut z: Vec<f64> = r.iter().zip(&inv_diag).map(|(r, m)| r * m).collect();
    let mut p = z.clone();
    let mut ap = vec![0.0; n];
    let mut rz = dot(&r, &z);

    for iter in 1..=settings.max_iterations {
        system.apply(&p, &mut ap);
        let pap = dot(&p, &ap);
        if pap.abs() < f64::MIN_POSITIVE {
            return (SolverStatus::MaxIterationsReached, iter, residual);
        }
        let alpha = rz / pap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }

        residual = max_abs(&r);
        if residual < settings.accuracy {
            return (SolverStatus::Converged, iter, residual);
        }

        for i in 0..n {
            z[i] = r[i] * inv_diag[i];
        }
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
    }

    (SolverStatus::MaxIterationsReached, settings.max_iterations, residual)
}

/// Project `vel` onto (nearly) divergence-free velocities.
///
/// `per_cell_corr` is a uniform divergence source added on every fluid cell
/// (positive values expand the liquid). Liquid with no free surface cannot
/// change volume, so the source is dropped there. On error nothing is written.
///
/// Mutates: `vel` (faces next to fluid), `pressure`.
pub fn solve_pressure(
    vel: &mut MacGrid,
    pressure: &mut ScalarGrid,
    flags: &FlagGrid,
    phi: Option<&LevelSet>,
    per_cell_corr: f32,
    settings: &PressureSettings,
) -> Result<SolveReport, NumericalError> {
    let system = PoissonSystem::build(flags, phi);
    let n = system.len();

    if n == 0 {
        pressure.fill(0.0);
        return Ok(SolveReport {
            status: SolverStatus::Converged,
            iterations: 0,
            residual: 0.0,
            unknowns: 0,
        });
    }

    let per_cell_corr = if system.has_free_surface {
        per_cell_corr
    } else {
        if per_cell_corr != 0.0 {
            log::warn!(
                "liquid has no free surface; ignoring volume correction {:.3e}",
                per_cell_corr
            );
        }
        0.0
    };

    let div = compute_divergence(flags, vel);
    let b: Vec<f64> = system
        .cells
        .iter()
        .map(|&idx| -(div.at(idx) as f64) + per_cell_corr as f64)
        .collect();
    if b.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::NonFinite {
            field: "pressure right-hand side",
        });
    }

    let mut x = vec![0.0; n];
    let (status, iterations, residual) = pcg(&system, &b, &mut x, settings);
    if x.iter().any(|v| !v.is_finite()) || !residual.is_finite() {
        return Err(NumericalError::NonFinite { field: "pressure" });
    }
    if status != SolverStatus::Converged {
        return Err(NumericalError::PressureNotConverged {
            iterations,
            residual,
        });
    }

    pressure.fill(0.0);
    for (row, &idx) in system.cells.iter().enumerate() {
        pressure.data_mut()[idx] = x[row] as f32;
    }
    apply_pressure_gradient(vel, pressure, flags, phi);

    Ok(SolveReport {
        status,
        iterations,
        residual,
        unknowns: n,
    })
}

/// Subtract the pressure gradient on every face between a fluid cell and a
/// fluid or empty cell. Empty cells use the ghost pressure
/// `p_fluid * (1 - 1/theta)`.
pub fn apply_pressure_gradient(
    vel: &mut MacGrid,
    pressure: &ScalarGrid,
    flags: &FlagGrid,
    phi: Option<&LevelSet>,
) {
    let dims = flags.dims();
    let side_pressure = |own: usize, other: usize| -> f32 {
        // Pressure seen on `own`'s side, given `other` is fluid
        match flags.at(own) {
            CellFlag::Fluid => pressure.at(own),
            _ => {
                let theta = ghost_theta(phi, other, own) as f32;
                pressure.at(other) * (1.0 - 1.0 / theta)
            }
        }
    };

    for &axis in dims.active_axes() {
        vel.component_mut(axis)
            .par_iter_mut()
            .enumerate()
            .for_each(|(f, value)| {
                let (i, j, k) = dims.face_coords(axis, f);
                let (Some(lo), Some(hi)) = dims.face_cells(axis, i, j, k) else {
                    return;
                };
                let (flo, fhi) = (flags.at(lo), flags.at(hi));
                if flo == CellFlag::Obstacle || fhi == CellFlag::Obstacle {
                    return;
                }
                if flo != CellFlag::Fluid && fhi != CellFlag::Fluid {
                    return;
                }
                let p_lo = if flo == CellFlag::Fluid {
                    pressure.at(lo)
                } else {
                    side_pressure(lo, hi)
                };
                let p_hi = if fhi == CellFlag::Fluid {
                    pressure.at(hi)
                } else {
                    side_pressure(hi, lo)
                };
                *value -= p_hi - p_lo;
            });
    }
}

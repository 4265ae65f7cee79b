//! Cell-centered and staggered (MAC) grids on a fixed 2D/3D lattice.
//!
//! All coordinates are in grid space: cell `(i, j, k)` covers
//! `[i, i+1) x [j, j+1) x [k, k+1)` and its center sits at `+0.5`.
//! A 2D grid is a grid with `depth == 1`.

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Cell classification driving the pressure solve.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum CellFlag {
    /// Liquid cell, pressure unknown lives here
    Fluid,
    /// Solid obstacle (no flow through its faces)
    Obstacle,
    /// Air (free surface, p = 0)
    #[default]
    Empty,
}

/// Velocity component / lattice axis.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Offset of this component's face nodes relative to the cell origin.
    /// u lives at (i, j+0.5, k+0.5), v at (i+0.5, j, k+0.5), w at (i+0.5, j+0.5, k).
    #[inline]
    pub fn face_offset(self) -> Vec3 {
        match self {
            Axis::X => Vec3::new(0.0, 0.5, 0.5),
            Axis::Y => Vec3::new(0.5, 0.0, 0.5),
            Axis::Z => Vec3::new(0.5, 0.5, 0.0),
        }
    }

    #[inline]
    fn step(self) -> (i32, i32, i32) {
        match self {
            Axis::X => (1, 0, 0),
            Axis::Y => (0, 1, 0),
            Axis::Z => (0, 0, 1),
        }
    }
}

/// Lattice dimensions plus index helpers shared by every grid type.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GridDims {
    /// Number of cells in X direction
    pub width: usize,
    /// Number of cells in Y direction
    pub height: usize,
    /// Number of cells in Z direction (1 for 2D)
    pub depth: usize,
}

impl GridDims {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        assert!(
            width > 0 && height > 0 && depth > 0,
            "grid dimensions must be positive, got {}x{}x{}",
            width,
            height,
            depth
        );
        Self {
            width,
            height,
            depth,
        }
    }

    /// Cubic (3D) or square (2D) domain with `resolution` cells per side.
    pub fn cubic(dim: u32, resolution: usize) -> Self {
        let depth = if dim == 2 { 1 } else { resolution };
        Self::new(resolution, resolution, depth)
    }

    #[inline]
    pub fn is_2d(&self) -> bool {
        self.depth == 1
    }

    #[inline]
    pub fn dim(&self) -> u32 {
        if self.is_2d() {
            2
        } else {
            3
        }
    }

    /// Axes that carry velocity (Z is inactive in 2D).
    #[inline]
    pub fn active_axes(&self) -> &'static [Axis] {
        if self.is_2d() {
            &Axis::ALL[..2]
        } else {
            &Axis::ALL
        }
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Largest side length in cells; one domain unit maps to this many cells.
    #[inline]
    pub fn max_resolution(&self) -> usize {
        self.width.max(self.height).max(self.depth)
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        Vec3::new(self.width as f32, self.height as f32, self.depth as f32)
    }

    // ========== Cell indexing ==========

    #[inline]
    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        k * self.width * self.height + j * self.width + i
    }

    #[inline]
    pub fn cell_coords(&self, idx: usize) -> (usize, usize, usize) {
        let i = idx % self.width;
        let j = (idx / self.width) % self.height;
        let k = idx / (self.width * self.height);
        (i, j, k)
    }

    #[inline]
    pub fn cell_in_bounds(&self, i: i32, j: i32, k: i32) -> bool {
        i >= 0
            && i < self.width as i32
            && j >= 0
            && j < self.height as i32
            && k >= 0
            && k < self.depth as i32
    }

    /// Convert a grid-space position to cell indices (floored).
    #[inline]
    pub fn pos_to_cell(&self, pos: Vec3) -> (i32, i32, i32) {
        (
            pos.x.floor() as i32,
            pos.y.floor() as i32,
            pos.z.floor() as i32,
        )
    }

    /// Index of the cell containing `pos`, if it lies inside the domain.
    #[inline]
    pub fn cell_at(&self, pos: Vec3) -> Option<usize> {
        let (i, j, k) = self.pos_to_cell(pos);
        if self.cell_in_bounds(i, j, k) {
            Some(self.cell_index(i as usize, j as usize, k as usize))
        } else {
            None
        }
    }

    #[inline]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5)
    }

    /// Indices of the (up to) six face-adjacent neighbors of a cell.
    #[inline]
    pub fn neighbors(&self, i: usize, j: usize, k: usize) -> [Option<usize>; 6] {
        let mut out = [None; 6];
        for (slot, axis) in Axis::ALL.iter().enumerate() {
            let (di, dj, dk) = axis.step();
            let (ii, jj, kk) = (i as i32, j as i32, k as i32);
            if self.cell_in_bounds(ii - di, jj - dj, kk - dk) {
                out[2 * slot] = Some(self.cell_index(
                    (ii - di) as usize,
                    (jj - dj) as usize,
                    (kk - dk) as usize,
                ));
            }
            if self.cell_in_bounds(ii + di, jj + dj, kk + dk) {
                out[2 * slot + 1] = Some(self.cell_index(
                    (ii + di) as usize,
                    (jj + dj) as usize,
                    (kk + dk) as usize,
                ));
            }
        }
        out
    }

    // ========== Face indexing ==========

    /// Dimensions of the face lattice carrying one velocity component.
    /// U array has (width+1) x height x depth entries, and so on.
    #[inline]
    pub fn face_dims(&self, axis: Axis) -> (usize, usize, usize) {
        match axis {
            Axis::X => (self.width + 1, self.height, self.depth),
            Axis::Y => (self.width, self.height + 1, self.depth),
            Axis::Z => (self.width, self.height, self.depth + 1),
        }
    }

    #[inline]
    pub fn face_count(&self, axis: Axis) -> usize {
        let (nx, ny, nz) = self.face_dims(axis);
        nx * ny * nz
    }

    #[inline]
    pub fn face_index(&self, axis: Axis, i: usize, j: usize, k: usize) -> usize {
        let (nx, ny, _) = self.face_dims(axis);
        k * nx * ny + j * nx + i
    }

    #[inline]
    pub fn face_coords(&self, axis: Axis, idx: usize) -> (usize, usize, usize) {
        let (nx, ny, _) = self.face_dims(axis);
        (idx % nx, (idx / nx) % ny, idx / (nx * ny))
    }

    /// Grid-space position of a face node.
    #[inline]
    pub fn face_position(&self, axis: Axis, i: usize, j: usize, k: usize) -> Vec3 {
        Vec3::new(i as f32, j as f32, k as f32) + axis.face_offset()
    }

    /// Cells on the lower and upper side of a face (None outside the domain).
    #[inline]
    pub fn face_cells(
        &self,
        axis: Axis,
        i: usize,
        j: usize,
        k: usize,
    ) -> (Option<usize>, Option<usize>) {
        let (di, dj, dk) = axis.step();
        let (ii, jj, kk) = (i as i32, j as i32, k as i32);
        let lower = if self.cell_in_bounds(ii - di, jj - dj, kk - dk) {
            Some(self.cell_index(
                (ii - di) as usize,
                (jj - dj) as usize,
                (kk - dk) as usize,
            ))
        } else {
            None
        };
        let upper = if self.cell_in_bounds(ii, jj, kk) {
            Some(self.cell_index(i, j, k))
        } else {
            None
        };
        (lower, upper)
    }

    /// Same-axis neighbors of a face in the face lattice (for extrapolation).
    #[inline]
    pub fn face_neighbors(&self, axis: Axis, i: usize, j: usize, k: usize) -> [Option<usize>; 6] {
        let (nx, ny, nz) = self.face_dims(axis);
        let mut out = [None; 6];
        let (ii, jj, kk) = (i as i32, j as i32, k as i32);
        let inside = |a: i32, b: i32, c: i32| {
            a >= 0 && b >= 0 && c >= 0 && a < nx as i32 && b < ny as i32 && c < nz as i32
        };
        for (slot, other) in Axis::ALL.iter().enumerate() {
            let (di, dj, dk) = other.step();
            if inside(ii - di, jj - dj, kk - dk) {
                out[2 * slot] = Some(self.face_index(
                    axis,
                    (ii - di) as usize,
                    (jj - dj) as usize,
                    (kk - dk) as usize,
                ));
            }
            if inside(ii + di, jj + dj, kk + dk) {
                out[2 * slot + 1] = Some(self.face_index(
                    axis,
                    (ii + di) as usize,
                    (jj + dj) as usize,
                    (kk + dk) as usize,
                ));
            }
        }
        out
    }

    /// Clamp a position to lie at least `inset` cells inside every domain face.
    pub fn clamp_position(&self, pos: Vec3, inset: f32) -> Vec3 {
        let size = self.size();
        let axis = |x: f32, extent: f32| {
            let lo = inset.min(0.5 * extent);
            x.clamp(lo, (extent - inset).max(lo))
        };
        let mut clamped = Vec3::new(axis(pos.x, size.x), axis(pos.y, size.y), axis(pos.z, size.z));
        if self.is_2d() {
            clamped.z = 0.5;
        }
        clamped
    }
}

/// Trilinear interpolation on a node lattice of shape `(nx, ny, nz)`.
///
/// `coord` is in node-index space; it is clamped onto the lattice so that
/// sampling outside returns the nearest boundary value.
#[inline]
fn trilinear(data: &[f32], shape: (usize, usize, usize), coord: Vec3) -> f32 {
    let (nx, ny, nz) = shape;
    let cx = coord.x.clamp(0.0, (nx - 1) as f32);
    let cy = coord.y.clamp(0.0, (ny - 1) as f32);
    let cz = coord.z.clamp(0.0, (nz - 1) as f32);

    let i0 = (cx.floor() as usize).min(nx.saturating_sub(2));
    let j0 = (cy.floor() as usize).min(ny.saturating_sub(2));
    let k0 = (cz.floor() as usize).min(nz.saturating_sub(2));
    let i1 = (i0 + 1).min(nx - 1);
    let j1 = (j0 + 1).min(ny - 1);
    let k1 = (k0 + 1).min(nz - 1);

    let tx = (cx - i0 as f32).clamp(0.0, 1.0);
    let ty = (cy - j0 as f32).clamp(0.0, 1.0);
    let tz = (cz - k0 as f32).clamp(0.0, 1.0);

    let at = |i: usize, j: usize, k: usize| data[k * nx * ny + j * nx + i];

    let c00 = at(i0, j0, k0) * (1.0 - tx) + at(i1, j0, k0) * tx;
    let c10 = at(i0, j1, k0) * (1.0 - tx) + at(i1, j1, k0) * tx;
    let c01 = at(i0, j0, k1) * (1.0 - tx) + at(i1, j0, k1) * tx;
    let c11 = at(i0, j1, k1) * (1.0 - tx) + at(i1, j1, k1) * tx;

    let c0 = c00 * (1.0 - ty) + c10 * ty;
    let c1 = c01 * (1.0 - ty) + c11 * ty;
    c0 * (1.0 - tz) + c1 * tz
}

/// Min/max of the lattice values a trilinear sample at `coord` blends.
#[inline]
fn trilinear_bounds(data: &[f32], shape: (usize, usize, usize), coord: Vec3) -> (f32, f32) {
    let (nx, ny, nz) = shape;
    let cx = coord.x.clamp(0.0, (nx - 1) as f32);
    let cy = coord.y.clamp(0.0, (ny - 1) as f32);
    let cz = coord.z.clamp(0.0, (nz - 1) as f32);
    let i0 = cx.floor() as usize;
    let j0 = cy.floor() as usize;
    let k0 = cz.floor() as usize;

    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for k in k0..=(k0 + 1).min(nz - 1) {
        for j in j0..=(j0 + 1).min(ny - 1) {
            for i in i0..=(i0 + 1).min(nx - 1) {
                let v = data[k * nx * ny + j * nx + i];
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
    }
    (lo, hi)
}

// ============================================================================
// Flag grid
// ============================================================================

/// Per-cell Fluid / Obstacle / Empty classification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlagGrid {
    dims: GridDims,
    flags: Vec<CellFlag>,
    /// Cell layers of domain wall set by `init_domain`
    wall_layers: usize,
}

impl FlagGrid {
    /// All cells start out Empty.
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            flags: vec![CellFlag::Empty; dims.cell_count()],
            wall_layers: 0,
        }
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    #[inline]
    pub fn at(&self, idx: usize) -> CellFlag {
        self.flags[idx]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> CellFlag {
        self.flags[self.dims.cell_index(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, flag: CellFlag) {
        let idx = self.dims.cell_index(i, j, k);
        self.flags[idx] = flag;
    }

    #[inline]
    pub fn is_fluid(&self, idx: usize) -> bool {
        self.flags[idx] == CellFlag::Fluid
    }

    #[inline]
    pub fn is_obstacle(&self, idx: usize) -> bool {
        self.flags[idx] == CellFlag::Obstacle
    }

    /// Mark the outer `boundary_width + 1` layers of cells as obstacle walls.
    /// The Z walls are skipped for 2D grids.
    pub fn init_domain(&mut self, boundary_width: usize) {
        let dims = self.dims;
        let w = boundary_width;
        self.wall_layers = w + 1;
        for k in 0..dims.depth {
            for j in 0..dims.height {
                for i in 0..dims.width {
                    let wall_x = i <= w || i + 1 + w >= dims.width;
                    let wall_y = j <= w || j + 1 + w >= dims.height;
                    let wall_z = !dims.is_2d() && (k <= w || k + 1 + w >= dims.depth);
                    let idx = dims.cell_index(i, j, k);
                    self.flags[idx] = if wall_x || wall_y || wall_z {
                        CellFlag::Obstacle
                    } else {
                        CellFlag::Empty
                    };
                }
            }
        }
    }

    /// Clamp a position into the cells inside the domain walls, `margin`
    /// cells away from them.
    pub fn clamp_to_interior(&self, pos: Vec3, margin: f32) -> Vec3 {
        self.dims.clamp_position(pos, self.wall_layers as f32 + margin)
    }

    /// Re-derive Fluid/Empty from the level-set sign; obstacles never change.
    pub fn update_from_levelset(&mut self, phi: &ScalarGrid) {
        debug_assert_eq!(self.dims, phi.dims());
        let data = phi.data();
        self.flags
            .par_iter_mut()
            .zip(data.par_iter())
            .for_each(|(flag, &value)| {
                if *flag != CellFlag::Obstacle {
                    *flag = if value < crate::constants::SURFACE_THRESHOLD {
                        CellFlag::Fluid
                    } else {
                        CellFlag::Empty
                    };
                }
            });
    }

    pub fn fluid_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f == CellFlag::Fluid).count()
    }

    /// Whether any cell touching the given face is an obstacle or lies outside the domain.
    #[inline]
    pub fn is_wall_face(&self, axis: Axis, i: usize, j: usize, k: usize) -> bool {
        let (lower, upper) = self.dims.face_cells(axis, i, j, k);
        match (lower, upper) {
            (Some(l), Some(u)) => self.is_obstacle(l) || self.is_obstacle(u),
            _ => true,
        }
    }

    /// Whether at least one cell touching the face is fluid.
    #[inline]
    pub fn is_fluid_face(&self, axis: Axis, i: usize, j: usize, k: usize) -> bool {
        let (lower, upper) = self.dims.face_cells(axis, i, j, k);
        lower.is_some_and(|l| self.is_fluid(l)) || upper.is_some_and(|u| self.is_fluid(u))
    }
}

// ============================================================================
// Scalar grid
// ============================================================================

/// Cell-centered scalar field (level sets, pressure, divergence).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScalarGrid {
    dims: GridDims,
    data: Vec<f32>,
}

/// A level set is a cell-centered scalar grid, negative inside the liquid.
pub type LevelSet = ScalarGrid;

impl ScalarGrid {
    pub fn new(dims: GridDims, value: f32) -> Self {
        Self {
            dims,
            data: vec![value; dims.cell_count()],
        }
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn at(&self, idx: usize) -> f32 {
        self.data[idx]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f32 {
        self.data[self.dims.cell_index(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f32) {
        let idx = self.dims.cell_index(i, j, k);
        self.data[idx] = value;
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn add_const(&mut self, value: f32) {
        self.data.par_iter_mut().for_each(|v| *v += value);
    }

    pub fn copy_from(&mut self, other: &ScalarGrid) {
        debug_assert_eq!(self.dims, other.dims);
        self.data.copy_from_slice(&other.data);
    }

    /// Level-set union: keep the smaller (more inside) value per cell.
    pub fn join(&mut self, other: &ScalarGrid) {
        debug_assert_eq!(self.dims, other.dims);
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, &b)| *a = a.min(b));
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Trilinear sample at a grid-space position (cell centers at +0.5).
    #[inline]
    pub fn sample(&self, pos: Vec3) -> f32 {
        let shape = (self.dims.width, self.dims.height, self.dims.depth);
        trilinear(&self.data, shape, pos - Vec3::splat(0.5))
    }

    #[inline]
    pub(crate) fn sample_bounds(&self, pos: Vec3) -> (f32, f32) {
        let shape = (self.dims.width, self.dims.height, self.dims.depth);
        trilinear_bounds(&self.data, shape, pos - Vec3::splat(0.5))
    }
}

// ============================================================================
// MAC grid
// ============================================================================

/// Staggered velocity field.
///
/// Velocity components are stored on cell faces:
/// - u (X-velocity) on YZ faces at x = i
/// - v (Y-velocity) on XZ faces at y = j
/// - w (Z-velocity) on XY faces at z = k
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MacGrid {
    dims: GridDims,
    /// Size: (width+1) * height * depth
    u: Vec<f32>,
    /// Size: width * (height+1) * depth
    v: Vec<f32>,
    /// Size: width * height * (depth+1)
    w: Vec<f32>,
}

impl MacGrid {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            u: vec![0.0; dims.face_count(Axis::X)],
            v: vec![0.0; dims.face_count(Axis::Y)],
            w: vec![0.0; dims.face_count(Axis::Z)],
        }
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    #[inline]
    pub fn component(&self, axis: Axis) -> &[f32] {
        match axis {
            Axis::X => &self.u,
            Axis::Y => &self.v,
            Axis::Z => &self.w,
        }
    }

    #[inline]
    pub fn component_mut(&mut self, axis: Axis) -> &mut [f32] {
        match axis {
            Axis::X => &mut self.u,
            Axis::Y => &mut self.v,
            Axis::Z => &mut self.w,
        }
    }

    pub fn copy_from(&mut self, other: &MacGrid) {
        debug_assert_eq!(self.dims, other.dims);
        self.u.copy_from_slice(&other.u);
        self.v.copy_from_slice(&other.v);
        self.w.copy_from_slice(&other.w);
    }

    pub fn is_finite(&self) -> bool {
        self.u.iter().chain(&self.v).chain(&self.w).all(|v| v.is_finite())
    }

    /// Trilinear sample of one component at a grid-space position.
    #[inline]
    pub fn sample_component(&self, axis: Axis, pos: Vec3) -> f32 {
        trilinear(
            self.component(axis),
            self.dims.face_dims(axis),
            pos - axis.face_offset(),
        )
    }

    #[inline]
    pub(crate) fn sample_component_bounds(&self, axis: Axis, pos: Vec3) -> (f32, f32) {
        trilinear_bounds(
            self.component(axis),
            self.dims.face_dims(axis),
            pos - axis.face_offset(),
        )
    }

    /// Interpolated velocity at a grid-space position (w is zero in 2D).
    #[inline]
    pub fn sample(&self, pos: Vec3) -> Vec3 {
        let mut vel = Vec3::ZERO;
        for &axis in self.dims.active_axes() {
            vel[axis.index()] = self.sample_component(axis, pos);
        }
        vel
    }

    /// Velocity at a cell center (average of the two faces per axis).
    #[inline]
    pub fn centered(&self, i: usize, j: usize, k: usize) -> Vec3 {
        let mut vel = Vec3::ZERO;
        for &axis in self.dims.active_axes() {
            let (di, dj, dk) = axis.step();
            let comp = self.component(axis);
            let lo = comp[self.dims.face_index(axis, i, j, k)];
            let hi = comp[self.dims.face_index(
                axis,
                i + di as usize,
                j + dj as usize,
                k + dk as usize,
            )];
            vel[axis.index()] = 0.5 * (lo + hi);
        }
        vel
    }

    /// Largest cell-centered speed over the domain.
    pub fn max_magnitude(&self) -> f32 {
        let dims = self.dims;
        (0..dims.cell_count())
            .into_par_iter()
            .map(|idx| {
                let (i, j, k) = dims.cell_coords(idx);
                self.centered(i, j, k).length()
            })
            .reduce(|| 0.0, f32::max)
    }
}

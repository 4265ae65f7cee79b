//! Per-step particle spatial index (counting-sort layout).
//!
//! Particles are bucketed by the cell containing them. `cell_start` has one
//! entry per cell plus a sentinel, so the particles of cell `c` are
//! `order[cell_start[c]..cell_start[c + 1]]`.

use crate::grid::GridDims;
use crate::particle::Particles;

#[derive(Clone, Debug)]
pub struct ParticleIndex {
    dims: GridDims,
    cell_start: Vec<usize>,
    order: Vec<usize>,
}

impl ParticleIndex {
    /// Bucket every particle by cell. Positions outside the domain are
    /// clamped onto the nearest border cell.
    pub fn build(particles: &Particles, dims: GridDims) -> Self {
        let cell_count = dims.cell_count();
        let cells: Vec<usize> = particles
            .list
            .iter()
            .map(|p| {
                let (i, j, k) = dims.pos_to_cell(p.position);
                dims.cell_index(
                    i.clamp(0, dims.width as i32 - 1) as usize,
                    j.clamp(0, dims.height as i32 - 1) as usize,
                    k.clamp(0, dims.depth as i32 - 1) as usize,
                )
            })
            .collect();

        let mut cell_start = vec![0usize; cell_count + 1];
        for &c in &cells {
            cell_start[c + 1] += 1;
        }
        for c in 0..cell_count {
            cell_start[c + 1] += cell_start[c];
        }

        // Stable fill keeps particles of a cell in ascending index order
        let mut cursor = cell_start.clone();
        let mut order = vec![0usize; cells.len()];
        for (p, &c) in cells.iter().enumerate() {
            order[cursor[c]] = p;
            cursor[c] += 1;
        }

        Self {
            dims,
            cell_start,
            order,
        }
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Particle indices stored in one cell.
    #[inline]
    pub fn cell_particles(&self, cell: usize) -> &[usize] {
        &self.order[self.cell_start[cell]..self.cell_start[cell + 1]]
    }

    #[inline]
    pub fn count(&self, cell: usize) -> usize {
        self.cell_start[cell + 1] - self.cell_start[cell]
    }

    /// Visit the particles of every cell within `radius` cells of `(i, j, k)`.
    pub fn for_each_near<F>(&self, i: i32, j: i32, k: i32, radius: i32, mut f: F)
    where
        F: FnMut(usize),
    {
        let dims = self.dims;
        let rz = if dims.is_2d() { 0 } else { radius };
        for kk in (k - rz)..=(k + rz) {
            for jj in (j - radius)..=(j + radius) {
                for ii in (i - radius)..=(i + radius) {
                    if !dims.cell_in_bounds(ii, jj, kk) {
                        continue;
                    }
                    let cell = dims.cell_index(ii as usize, jj as usize, kk as usize);
                    for &p in self.cell_particles(cell) {
                        f(p);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_index_buckets_by_cell() {
        let dims = GridDims::new(4, 4, 1);
        let mut particles = Particles::new();
        particles.spawn_at(Vec3::new(1.5, 1.5, 0.5));
        particles.spawn_at(Vec3::new(3.2, 0.1, 0.5));
        particles.spawn_at(Vec3::new(1.9, 1.1, 0.5));
        particles.spawn_at(Vec3::new(-0.5, 9.0, 0.5));

        let index = ParticleIndex::build(&particles, dims);
        assert_eq!(index.cell_particles(dims.cell_index(1, 1, 0)), &[0, 2]);
        assert_eq!(index.cell_particles(dims.cell_index(3, 0, 0)), &[1]);
        // Out-of-domain particle is clamped into the corner cell
        assert_eq!(index.count(dims.cell_index(0, 3, 0)), 1);
        assert_eq!(index.count(dims.cell_index(2, 2, 0)), 0);
    }

    #[test]
    fn test_for_each_near_visits_neighborhood() {
        let dims = GridDims::new(5, 5, 1);
        let mut particles = Particles::new();
        for j in 0..5 {
            for i in 0..5 {
                particles.spawn_at(Vec3::new(i as f32 + 0.5, j as f32 + 0.5, 0.5));
            }
        }
        let index = ParticleIndex::build(&particles, dims);
        let mut seen = 0;
        index.for_each_near(0, 0, 0, 1, |_| seen += 1);
        assert_eq!(seen, 4);
        seen = 0;
        index.for_each_near(2, 2, 0, 1, |_| seen += 1);
        assert_eq!(seen, 9);
    }
}

//! Particle density control: keep per-cell particle counts inside a band.
//!
//! Runs once per step after the FLIP update. Removal always happens; additions
//! are skipped for the step when they would exceed the global cap.
//!
//! Cells within one particle diameter of the surface are never reseeded and
//! their particles are never thinned out.

use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::grid::{FlagGrid, LevelSet, MacGrid};
use crate::kernels::TransferKernel;
use crate::particle::{Particle, Particles};
use crate::spatial::ParticleIndex;
use crate::transfer::sample_velocity;

/// Attempts at a random in-cell position before falling back to the center.
const PLACEMENT_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensitySettings {
    pub min_per_cell: usize,
    pub max_per_cell: usize,
    /// Particles deeper than this below the surface are removed (0 = no band)
    pub narrow_band: f32,
    /// Depth below the surface treated as the surface layer (see
    /// [`crate::levelset::surface_distance`])
    pub surface_distance: f32,
    pub max_total: usize,
    /// Kernel used to give new particles the grid velocity
    pub kernel: TransferKernel,
}

/// What one `adjust_particle_count` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DensityReport {
    /// Removed for leaving the domain, entering obstacles, leaving the liquid or the band
    pub removed_invalid: usize,
    /// Removed from over-full cells
    pub removed_excess: usize,
    pub added: usize,
    /// Additions were skipped because of the particle cap
    pub capped: bool,
}

impl DensitySettings {
    #[inline]
    fn in_band(&self, phi: f32) -> bool {
        self.narrow_band <= 0.0 || phi >= -self.narrow_band
    }

    #[inline]
    fn at_surface(&self, phi: f32) -> bool {
        phi > -self.surface_distance
    }
}

/// Remove invalid and excess particles, then top up sparse fluid cells.
///
/// A particle is invalid when it is non-finite, outside the domain, inside an
/// obstacle cell, outside the liquid (`phi > 0`) or deeper than the narrow
/// band. Excess particles are the highest-indexed ones of a cell; cells in
/// the surface layer are not thinned. New particles go to fluid cells below the
/// surface layer (and inside the band, when set) at random in-cell positions
/// with `phi < 0`, falling back to the cell center.
///
/// Mutates: `particles`.
pub fn adjust_particle_count<R: Rng>(
    particles: &mut Particles,
    flags: &FlagGrid,
    phi: &LevelSet,
    vel: &MacGrid,
    settings: &DensitySettings,
    rng: &mut R,
) -> DensityReport {
    let dims = flags.dims();
    let mut report = DensityReport::default();

    let before = particles.len();
    particles.list.retain(|p| {
        if !p.position.is_finite() || !p.velocity.is_finite() {
            return false;
        }
        let Some(cell) = dims.cell_at(p.position) else {
            return false;
        };
        if flags.is_obstacle(cell) {
            return false;
        }
        let value = phi.sample(p.position);
        value <= 0.0 && settings.in_band(value)
    });
    report.removed_invalid = before - particles.len();

    let index = ParticleIndex::build(particles, dims);
    let mut keep = vec![true; particles.len()];
    for cell in 0..dims.cell_count() {
        let members = index.cell_particles(cell);
        if members.len() <= settings.max_per_cell || settings.at_surface(phi.at(cell)) {
            continue;
        }
        for &p in &members[settings.max_per_cell..] {
            keep[p] = false;
        }
        report.removed_excess += members.len() - settings.max_per_cell;
    }
    if report.removed_excess > 0 {
        let mut keep_iter = keep.iter();
        particles
            .list
            .retain(|_| keep_iter.next().copied().unwrap_or(true));
    }

    // Deficit per cell, counted before any insertion
    let deficits: Vec<(usize, usize)> = (0..dims.cell_count())
        .filter(|&cell| {
            let value = phi.at(cell);
            flags.is_fluid(cell) && settings.in_band(value) && !settings.at_surface(value)
        })
        .filter_map(|cell| {
            let count = index.count(cell);
            (count < settings.min_per_cell).then(|| (cell, settings.min_per_cell - count))
        })
        .collect();
    let wanted: usize = deficits.iter().map(|&(_, n)| n).sum();
    if wanted == 0 {
        return report;
    }
    if particles.len() + wanted > settings.max_total {
        log::warn!(
            "particle cap {} reached ({} + {} requested); skipping additions this step",
            settings.max_total,
            particles.len(),
            wanted
        );
        report.capped = true;
        return report;
    }

    particles.list.reserve(wanted);
    for (cell, missing) in deficits {
        let (i, j, k) = dims.cell_coords(cell);
        let corner = Vec3::new(i as f32, j as f32, k as f32);
        let center = dims.cell_center(i, j, k);
        for _ in 0..missing {
            let position = (0..PLACEMENT_ATTEMPTS)
                .map(|_| {
                    let mut pos = corner + Vec3::new(rng.gen(), rng.gen(), rng.gen());
                    if dims.is_2d() {
                        pos.z = 0.5;
                    }
                    pos
                })
                .find(|&pos| {
                    let value = phi.sample(pos);
                    value < 0.0 && settings.in_band(value) && dims.cell_at(pos) == Some(cell)
                })
                .unwrap_or(center);
            let velocity = sample_velocity(vel, position, settings.kernel);
            particles.list.push(Particle::new(position, velocity));
        }
        report.added += missing;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellFlag, GridDims};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(narrow_band: f32) -> DensitySettings {
        DensitySettings {
            min_per_cell: 4,
            max_per_cell: 8,
            narrow_band,
            surface_distance: 1.5,
            max_total: 1_000_000,
            kernel: TransferKernel::DLinear,
        }
    }

    /// Pool of liquid below `level` in a walled 2D box.
    fn pool(level: f32) -> (FlagGrid, LevelSet) {
        let dims = GridDims::new(16, 16, 1);
        let mut flags = FlagGrid::new(dims);
        flags.init_domain(0);
        let mut phi = LevelSet::new(dims, 0.0);
        for j in 0..16 {
            for i in 0..16 {
                phi.set(i, j, 0, j as f32 + 0.5 - level);
            }
        }
        flags.update_from_levelset(&phi);
        (flags, phi)
    }

    fn counts(particles: &Particles, dims: GridDims) -> ParticleIndex {
        ParticleIndex::build(particles, dims)
    }

    #[test]
    fn test_fills_empty_fluid_cells_to_minimum() {
        let (flags, phi) = pool(8.0);
        let vel = MacGrid::new(flags.dims());
        let mut particles = Particles::new();
        let mut rng = StdRng::seed_from_u64(3);

        let report = adjust_particle_count(&mut particles, &flags, &phi, &vel, &settings(0.0), &mut rng);
        assert!(report.added > 0);
        let index = counts(&particles, flags.dims());
        for cell in 0..flags.dims().cell_count() {
            let n = index.count(cell);
            match flags.at(cell) {
                CellFlag::Fluid if phi.at(cell) <= -1.5 => {
                    assert!((4..=8).contains(&n), "cell {} has {}", cell, n)
                }
                CellFlag::Fluid => assert_eq!(n, 0, "surface cell {} was reseeded", cell),
                _ => assert_eq!(n, 0, "non-fluid cell {} got particles", cell),
            }
        }
        for p in &particles.list {
            assert!(phi.sample(p.position) < 0.0, "particle in air at {:?}", p.position);
            assert_eq!(p.position.z, 0.5);
        }
    }

    #[test]
    fn test_removes_air_obstacle_and_excess() {
        let (flags, phi) = pool(8.0);
        let dims = flags.dims();
        let vel = MacGrid::new(dims);
        let mut particles = Particles::new();
        // air, obstacle wall, outside the domain
        particles.spawn_at(Vec3::new(5.5, 12.5, 0.5));
        particles.spawn_at(Vec3::new(0.5, 3.5, 0.5));
        particles.spawn_at(Vec3::new(-3.0, 3.5, 0.5));
        // 12 particles crowded into one liquid cell
        for n in 0..12 {
            particles.spawn_at(Vec3::new(5.1 + 0.06 * n as f32, 3.5, 0.5));
        }
        let mut rng = StdRng::seed_from_u64(5);
        let report = adjust_particle_count(&mut particles, &flags, &phi, &vel, &settings(0.0), &mut rng);
        assert_eq!(report.removed_invalid, 3);
        assert_eq!(report.removed_excess, 4);
        let cell = dims.cell_index(5, 3, 0);
        assert_eq!(counts(&particles, dims).count(cell), 8);
    }

    #[test]
    fn test_surface_layer_is_not_thinned() {
        let (flags, phi) = pool(8.0);
        let dims = flags.dims();
        let vel = MacGrid::new(dims);
        let mut particles = Particles::new();
        // phi = -0.5 at row 7: inside the surface layer
        for n in 0..12 {
            particles.spawn_at(Vec3::new(5.1 + 0.06 * n as f32, 7.5, 0.5));
        }
        let mut rng = StdRng::seed_from_u64(4);
        let report = adjust_particle_count(&mut particles, &flags, &phi, &vel, &settings(0.0), &mut rng);
        assert_eq!(report.removed_excess, 0);
        assert_eq!(counts(&particles, dims).count(dims.cell_index(5, 7, 0)), 12);
    }

    #[test]
    fn test_band_limits_depth() {
        let (flags, phi) = pool(10.0);
        let dims = flags.dims();
        let vel = MacGrid::new(dims);
        let mut particles = Particles::new();
        particles.spawn_at(Vec3::new(6.5, 2.5, 0.5)); // phi = -7.5
        let mut rng = StdRng::seed_from_u64(9);
        let report = adjust_particle_count(&mut particles, &flags, &phi, &vel, &settings(3.0), &mut rng);
        assert_eq!(report.removed_invalid, 1);

        let index = counts(&particles, dims);
        assert_eq!(index.count(dims.cell_index(6, 2, 0)), 0, "deep cells stay empty");
        assert!(index.count(dims.cell_index(6, 8, 0)) >= 4, "band cells are filled");
        for p in &particles.list {
            assert!(phi.sample(p.position) >= -3.0 - 1e-4, "particle below band at {:?}", p.position);
        }
    }

    #[test]
    fn test_cap_skips_additions_but_removes() {
        let (flags, phi) = pool(8.0);
        let vel = MacGrid::new(flags.dims());
        let mut particles = Particles::new();
        particles.spawn_at(Vec3::new(5.5, 12.5, 0.5));
        let mut capped = settings(0.0);
        capped.max_total = 10;
        let mut rng = StdRng::seed_from_u64(1);
        let report = adjust_particle_count(&mut particles, &flags, &phi, &vel, &capped, &mut rng);
        assert!(report.capped);
        assert_eq!(report.added, 0);
        assert_eq!(report.removed_invalid, 1);
        assert!(particles.is_empty());
    }

    #[test]
    fn test_new_particles_take_grid_velocity() {
        let (flags, phi) = pool(8.0);
        let dims = flags.dims();
        let mut vel = MacGrid::new(dims);
        vel.component_mut(crate::grid::Axis::X).fill(0.25);
        let mut particles = Particles::new();
        let mut rng = StdRng::seed_from_u64(2);
        adjust_particle_count(&mut particles, &flags, &phi, &vel, &settings(0.0), &mut rng);
        assert!(!particles.is_empty());
        for p in &particles.list {
            assert!((p.velocity.x - 0.25).abs() < 1e-5, "{:?}", p.velocity);
        }
    }
}

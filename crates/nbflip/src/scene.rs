//! Scene description: walls, initial liquid, obstacles, initial velocity.
//!
//! Shapes are given in domain units (see [`Shape::to_grid`]).

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::grid::{CellFlag, FlagGrid, GridDims, LevelSet, MacGrid};
use crate::serde_utils::vec3;
use crate::shapes::Shape;

/// Region whose faces start with a fixed velocity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityRegion {
    pub shape: Shape,
    /// Velocity in domain units per time unit
    #[serde(with = "vec3")]
    pub velocity: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Extra wall layers beyond the outermost cell layer
    pub boundary_width: usize,
    /// Union of these shapes is the initial liquid
    pub fluid: Vec<Shape>,
    pub obstacles: Vec<Shape>,
    pub initial_velocity: Option<VelocityRegion>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self::drop_into_pool()
    }
}

/// Named scene presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenePreset {
    DropIntoPool,
    BreakingDam,
}

impl SceneConfig {
    /// Basin filled to 20% height plus a falling drop.
    pub fn drop_into_pool() -> Self {
        let drop_center = Vec3::new(0.5, 0.8, 0.5);
        let drop_radius = 0.075;
        let velocity_radius = 0.125;
        Self {
            boundary_width: 0,
            fluid: vec![
                Shape::Box {
                    min: Vec3::ZERO,
                    max: Vec3::new(1.0, 0.2, 1.0),
                },
                Shape::Sphere {
                    center: drop_center,
                    radius: drop_radius,
                },
            ],
            obstacles: Vec::new(),
            initial_velocity: Some(VelocityRegion {
                shape: Shape::Sphere {
                    center: drop_center,
                    radius: velocity_radius,
                },
                velocity: Vec3::new(0.0, -0.001, 0.0),
            }),
        }
    }

    /// Liquid column released next to a thin obstacle wall.
    pub fn breaking_dam() -> Self {
        Self {
            boundary_width: 0,
            fluid: vec![Shape::Box {
                min: Vec3::ZERO,
                max: Vec3::new(0.4, 0.6, 1.0),
            }],
            obstacles: vec![Shape::Box {
                min: Vec3::new(0.7, 0.0, 0.5),
                max: Vec3::new(0.8, 1.0, 0.8),
            }],
            initial_velocity: None,
        }
    }

    /// Walls, obstacles and the initial liquid level set for the given lattice.
    ///
    /// Obstacles are applied before the fluid flags so they are never marked fluid.
    pub fn build(&self, dims: GridDims) -> (FlagGrid, LevelSet) {
        let mut flags = FlagGrid::new(dims);
        flags.init_domain(self.boundary_width);

        let mut phi = LevelSet::new(dims, dims.max_resolution() as f32);
        for shape in &self.fluid {
            phi.join(&shape.to_grid(dims).compute_levelset(dims));
        }

        for shape in &self.obstacles {
            shape.to_grid(dims).apply_flag(&mut flags, CellFlag::Obstacle);
        }
        flags.update_from_levelset(&phi);
        (flags, phi)
    }

    /// Apply the initial velocity region, scaled to grid units.
    pub fn apply_initial_velocity(&self, vel: &mut MacGrid) {
        if let Some(region) = &self.initial_velocity {
            let dims = vel.dims();
            let value = region.velocity * dims.max_resolution() as f32;
            region.shape.to_grid(dims).apply_velocity(vel, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Axis;
    use crate::measure::fluid_volume;

    #[test]
    fn test_drop_into_pool_volume() {
        let dims = GridDims::cubic(2, 64);
        let (flags, phi) = SceneConfig::drop_into_pool().build(dims);
        let volume = fluid_volume(&flags);
        // 62 x 12 basin cells plus a drop of radius 4.8
        assert!((800..=850).contains(&volume), "initial volume {}", volume);
        assert!(phi.get(32, 51, 0) < 0.0, "drop center should be liquid");
        assert!(phi.get(32, 30, 0) > 0.0, "gap should be air");
    }

    #[test]
    fn test_breaking_dam_obstacle_is_not_fluid() {
        let dims = GridDims::cubic(2, 32);
        let (flags, _) = SceneConfig::breaking_dam().build(dims);
        assert_eq!(flags.get(24, 10, 0), CellFlag::Obstacle);
        assert_eq!(flags.get(5, 5, 0), CellFlag::Fluid);
        assert_eq!(flags.get(20, 5, 0), CellFlag::Empty);
    }

    #[test]
    fn test_initial_velocity_scaled_to_grid() {
        let dims = GridDims::cubic(2, 64);
        let mut vel = MacGrid::new(dims);
        SceneConfig::drop_into_pool().apply_initial_velocity(&mut vel);
        let v = vel.component(Axis::Y)[dims.face_index(Axis::Y, 32, 51, 0)];
        assert!((v + 0.064).abs() < 1e-6, "v = {}", v);
    }

    #[test]
    fn test_scene_json_roundtrip_keeps_shapes() {
        let scene = SceneConfig::breaking_dam();
        let json = serde_json::to_string(&scene).unwrap();
        assert!(json.contains("\"type\":\"box\""), "{}", json);
        let back: SceneConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scene);
    }
}

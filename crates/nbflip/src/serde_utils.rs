//! Serde helpers for glam vectors in config files.
//!
//! Vectors are written as `[x, y, z]` arrays; objects with `x`/`y`/`z`
//! fields are accepted on input as well.

use glam::Vec3;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde proxy for Vec3
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Vec3Def {
    Array([f32; 3]),
    Object { x: f32, y: f32, z: f32 },
}

impl From<Vec3Def> for Vec3 {
    fn from(def: Vec3Def) -> Self {
        match def {
            Vec3Def::Array([x, y, z]) => Vec3::new(x, y, z),
            Vec3Def::Object { x, y, z } => Vec3::new(x, y, z),
        }
    }
}

pub fn serialize_vec3<S>(v: &Vec3, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    Vec3Def::Array(v.to_array()).serialize(s)
}

pub fn deserialize_vec3<'de, D>(d: D) -> Result<Vec3, D::Error>
where
    D: Deserializer<'de>,
{
    Vec3Def::deserialize(d).map(Vec3::from)
}

/// `with = "vec3"` module form for struct fields.
pub mod vec3 {
    pub use super::deserialize_vec3 as deserialize;
    pub use super::serialize_vec3 as serialize;
}

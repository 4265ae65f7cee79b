//! Per-frame records and particle snapshots.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Mode;
use crate::error::{SimError, SimResult};
use crate::particle::Particles;

/// Summary written once a frame has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub mode: Mode,
    /// Index of the completed frame
    pub frame: u32,
    /// Simulated time since start
    pub time: f64,
    pub steps: u32,
    /// Steps that had to be retried with half the step size
    pub retries: u32,
    /// Fluid volume in cells
    pub volume: usize,
    pub energy: f64,
    pub particles: usize,
    pub max_velocity: f32,
    /// Largest pressure iteration count of the frame
    pub pressure_iterations: usize,
}

/// Receives frame records from [`crate::Solver::run`].
pub trait FrameSink {
    fn record(&mut self, record: &FrameRecord, particles: &Particles) -> SimResult<()>;
}

/// Collect records in memory.
impl FrameSink for Vec<FrameRecord> {
    fn record(&mut self, record: &FrameRecord, _particles: &Particles) -> SimResult<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// JSON-lines writer for frame records.
pub struct StatsWriter<W: Write> {
    out: W,
    path: PathBuf,
}

impl StatsWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> SimResult<Self> {
        let file = File::create(path).map_err(|e| SimError::io(path, e))?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }
}

impl<W: Write> StatsWriter<W> {
    /// Wrap any writer; `label` names it in I/O errors.
    pub fn new(out: W, label: impl Into<PathBuf>) -> Self {
        Self {
            out,
            path: label.into(),
        }
    }

    pub fn write(&mut self, record: &FrameRecord) -> SimResult<()> {
        serde_json::to_writer(&mut self.out, record)?;
        writeln!(self.out).map_err(|e| SimError::io(&self.path, e))
    }

    pub fn flush(&mut self) -> SimResult<()> {
        self.out.flush().map_err(|e| SimError::io(&self.path, e))
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Particle positions and velocities at the end of a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleSnapshot {
    pub frame: u32,
    pub particles: Particles,
}

impl ParticleSnapshot {
    pub fn save_json(&self, path: &Path) -> SimResult<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json).map_err(|e| SimError::io(path, e))
    }

    pub fn load_json(path: &Path) -> SimResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Output sink used by the binary: JSON-lines stats plus optional snapshots
/// every `snapshot_every` frames.
pub struct FileSink {
    stats: Option<StatsWriter<BufWriter<File>>>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: u32,
}

impl FileSink {
    pub fn new(
        stats_path: Option<&Path>,
        snapshot_dir: Option<&Path>,
        snapshot_every: u32,
    ) -> SimResult<Self> {
        let stats = stats_path
            .map(StatsWriter::<BufWriter<File>>::create)
            .transpose()?;
        if let Some(dir) = snapshot_dir {
            std::fs::create_dir_all(dir).map_err(|e| SimError::io(dir, e))?;
        }
        Ok(Self {
            stats,
            snapshot_dir: snapshot_dir.map(Path::to_path_buf),
            snapshot_every,
        })
    }

    pub fn finish(&mut self) -> SimResult<()> {
        match &mut self.stats {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl FrameSink for FileSink {
    fn record(&mut self, record: &FrameRecord, particles: &Particles) -> SimResult<()> {
        if let Some(writer) = &mut self.stats {
            writer.write(record)?;
        }
        if let Some(dir) = &self.snapshot_dir {
            if self.snapshot_every > 0 && record.frame % self.snapshot_every == 0 {
                let path = dir.join(format!("particles_{:04}.json", record.frame));
                ParticleSnapshot {
                    frame: record.frame,
                    particles: particles.clone(),
                }
                .save_json(&path)?;
                log::debug!("wrote {}", path.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(frame: u32) -> FrameRecord {
        FrameRecord {
            mode: Mode::Nbflip,
            frame,
            time: 2.0 * (frame + 1) as f64,
            steps: 3,
            retries: 0,
            volume: 812,
            energy: -12.5,
            particles: 2400,
            max_velocity: 0.4,
            pressure_iterations: 57,
        }
    }

    #[test]
    fn test_json_lines_output() {
        let mut writer = StatsWriter::new(Vec::new(), "memory");
        writer.write(&record(0)).unwrap();
        writer.write(&record(1)).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: FrameRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back, record(1));
        assert!(lines[0].contains("\"mode\":\"nbflip\""), "{}", lines[0]);
    }

    #[test]
    fn test_file_sink_writes_stats_and_snapshots() {
        let dir = std::env::temp_dir().join(format!("nbflip_sink_{}", std::process::id()));
        let stats_path = dir.join("stats.jsonl");
        let snapshots = dir.join("snapshots");
        std::fs::create_dir_all(&dir).unwrap();

        let mut particles = Particles::new();
        particles.spawn(glam::Vec3::new(3.5, 2.25, 0.5), glam::Vec3::new(0.0, -0.1, 0.0));
        let mut sink = FileSink::new(Some(&stats_path), Some(&snapshots), 2).unwrap();
        for frame in 0..3 {
            sink.record(&record(frame), &particles).unwrap();
        }
        sink.finish().unwrap();

        let text = std::fs::read_to_string(&stats_path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!snapshots.join("particles_0001.json").exists());
        let snapshot = ParticleSnapshot::load_json(&snapshots.join("particles_0002.json")).unwrap();
        assert_eq!(snapshot.frame, 2);
        assert_eq!(snapshot.particles.list, particles.list);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

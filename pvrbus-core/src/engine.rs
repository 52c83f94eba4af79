//! Interface to the projection engine
//!
//! The engine itself lives outside this crate. Daemons hand it volume
//! sources and camera projections and get back one image buffer per camera;
//! both calls are synchronous and may be slow.
//!
//! [`VolumeSet`] is the one place that dispatches on [`VolumeSource`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PvrbusError, Result};

/// Row-major homogeneous transform
pub type Matrix4 = [[f64; 4]; 4];

/// Identity transform
pub const IDENTITY: Matrix4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Status code for rejected volume sources
pub const CODE_BAD_VOLUME: u32 = 1;

/// Status code for a pose list that does not match the loaded volumes
pub const CODE_POSE_MISMATCH: u32 = 3;

/// Detector geometry of one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsic {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub pixel_size: f64,
    pub source_to_detector_distance: f64,
}

/// One camera to render from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraProjection {
    pub intrinsic: CameraIntrinsic,
    /// World from device transform
    pub extrinsic: Matrix4,
}

/// CT volume stored as a NIfTI file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NiftiSource {
    /// Absolute, or relative to the patient data directory
    pub path: PathBuf,
    pub world_from_anatomical: Matrix4,
    #[serde(default)]
    pub use_thresholding: bool,
    #[serde(default)]
    pub use_cached: bool,
    #[serde(default)]
    pub save_cache: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub segmentation: bool,
}

/// Triangle mesh with a material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    pub material: String,
    pub density: f64,
}

/// Volume voxelized from meshes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSource {
    pub meshes: Vec<Mesh>,
    pub voxel_size: f64,
    pub world_from_anatomical: Matrix4,
}

/// Where a volume comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeSource {
    Nifti(NiftiSource),
    Mesh(MeshSource),
    /// Legacy instrument model; no longer loadable
    Instrument { name: String },
}

/// The external projection engine
pub trait ProjectionEngine {
    /// Loaded volume handle
    type Volume;

    /// Load a NIfTI volume; `path` is already resolved
    fn load_nifti(&mut self, path: &Path, source: &NiftiSource) -> Result<Self::Volume>;

    /// Voxelize meshes into a volume
    fn load_mesh(&mut self, source: &MeshSource) -> Result<Self::Volume>;

    /// Render every volume at its pose from every camera
    fn render(
        &mut self,
        cameras: &[CameraProjection],
        volumes: &[(&Self::Volume, Matrix4)],
    ) -> Result<Vec<Bytes>>;
}

/// Volumes loaded into an engine, with their current poses
#[derive(Debug)]
pub struct VolumeSet<V> {
    volumes: Vec<(V, Matrix4)>,
}

fn resolve(path: &Path, patient_data_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        patient_data_dir.join(path)
    }
}

impl<V> VolumeSet<V> {
    /// Load every source, failing on the first rejected one
    pub fn load<E>(engine: &mut E, sources: &[VolumeSource], patient_data_dir: &Path) -> Result<Self>
    where
        E: ProjectionEngine<Volume = V>,
    {
        let mut volumes = Vec::with_capacity(sources.len());
        for source in sources {
            let loaded = match source {
                VolumeSource::Nifti(nifti) => {
                    let path = resolve(&nifti.path, patient_data_dir);
                    debug!(path = %path.display(), "loading nifti volume");
                    (engine.load_nifti(&path, nifti)?, nifti.world_from_anatomical)
                }
                VolumeSource::Mesh(mesh) => {
                    debug!(meshes = mesh.meshes.len(), "loading mesh volume");
                    (engine.load_mesh(mesh)?, mesh.world_from_anatomical)
                }
                VolumeSource::Instrument { name } => {
                    return Err(PvrbusError::protocol(
                        CODE_BAD_VOLUME,
                        format!("Instruments deprecated, use meshes instead ({})", name),
                    ));
                }
            };
            volumes.push(loaded);
        }
        Ok(Self { volumes })
    }

    /// Number of loaded volumes
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether no volume is loaded
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Replace the volume poses
    ///
    /// An empty list keeps the current poses; any other length must match
    /// the number of volumes.
    pub fn set_poses(&mut self, poses: &[Matrix4]) -> Result<()> {
        if poses.is_empty() {
            return Ok(());
        }
        if poses.len() != self.volumes.len() {
            return Err(PvrbusError::protocol(
                CODE_POSE_MISMATCH,
                format!(
                    "volumes_world_from_anatomical length mismatch: {} poses for {} volumes",
                    poses.len(),
                    self.volumes.len()
                ),
            ));
        }
        for ((_, pose), new) in self.volumes.iter_mut().zip(poses) {
            *pose = *new;
        }
        Ok(())
    }

    /// Current pose of each volume
    pub fn poses(&self) -> Vec<Matrix4> {
        self.volumes.iter().map(|(_, pose)| *pose).collect()
    }

    /// Render all volumes from `cameras`, one image per camera
    pub fn render<E>(&self, engine: &mut E, cameras: &[CameraProjection]) -> Result<Vec<Bytes>>
    where
        E: ProjectionEngine<Volume = V>,
    {
        let volumes: Vec<(&V, Matrix4)> = self.volumes.iter().map(|(v, pose)| (v, *pose)).collect();
        engine.render(cameras, &volumes)
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use dtm_3d::{
    backend::{GeometryBackend, PoissonBackend},
    builder::build_point_cloud_checked,
    io::obj::{write_obj, ObjError},
    transforms::rotation_matrix_from_xyz,
    Geometry3dError,
};
use dtm_dnn::{DepthPredictor, DnnError};
use dtm_image::{
    io::{decode_intensity_grid, read_intensity_grid, LoaderConfig},
    ImageError, IntensityGrid,
};
use dtm_viz::{render_heightmap, FigureConfig, Heightmap, VizError};
use serde::{Deserialize, Serialize};

/// An error type for the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The input path has no file name to derive the output names from.
    #[error("Invalid input path: {0}")]
    InvalidInputPath(PathBuf),

    /// Error loading the input image.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error running the depth predictor.
    #[error(transparent)]
    Dnn(#[from] DnnError),

    /// Error building or reconstructing the geometry.
    #[error(transparent)]
    Geometry(#[from] Geometry3dError),

    /// Error writing the mesh.
    #[error(transparent)]
    Obj(#[from] ObjError),

    /// Error rendering the heightmap.
    #[error(transparent)]
    Viz(#[from] VizError),

    /// Error reading the configuration file.
    #[error("Failed to parse the pipeline configuration. {0}")]
    Config(#[from] serde_json::Error),

    /// Error accessing the file system.
    #[error("Failed to access the file system. {0}")]
    Io(#[from] std::io::Error),
}

fn default_orientation() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

fn default_rotation() -> [f64; 3] {
    [std::f64::consts::PI, 0.0, 0.0]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// The parameters of every stage of the pipeline.
///
/// Every field has a default, so a JSON file only needs the values it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// The size the input images are loaded at.
    pub loader: LoaderConfig,
    /// The column the x coordinates are mirrored around. Defaults to the grid width.
    pub mirror_width: Option<usize>,
    /// Normal estimation and surface reconstruction parameters.
    pub geometry: PoissonBackend,
    /// Every normal is flipped to face this direction.
    pub orientation: [f64; 3],
    /// Euler angles about x, y and z of the rotation applied to the mesh.
    pub rotation: [f64; 3],
    /// The heightmap figure.
    pub figure: FigureConfig,
    /// Where the meshes are written.
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            mirror_width: None,
            geometry: PoissonBackend::default(),
            orientation: default_orientation(),
            rotation: default_rotation(),
            figure: FigureConfig::default(),
            output_dir: default_output_dir(),
        }
    }
}

impl PipelineConfig {
    /// Read a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// What a pipeline run produced.
#[derive(Debug)]
pub struct PipelineOutput {
    /// The rendered elevation grid.
    pub heightmap: Heightmap,
    /// The written mesh.
    pub mesh_path: PathBuf,
    /// The number of points of the reconstructed point cloud.
    pub num_points: usize,
    /// The number of vertices of the cleaned mesh.
    pub num_vertices: usize,
    /// The number of triangles of the cleaned mesh.
    pub num_triangles: usize,
}

/// Turns an image into a terrain mesh and a heightmap figure.
///
/// The predictor is shared and never mutated, so one pipeline can serve
/// several threads.
pub struct Pipeline {
    predictor: Arc<dyn DepthPredictor>,
    geometry: Box<dyn GeometryBackend>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline with the geometry backend described by the configuration.
    pub fn new(predictor: Arc<dyn DepthPredictor>, config: PipelineConfig) -> Self {
        Self {
            predictor,
            geometry: Box::new(config.geometry),
            config,
        }
    }

    /// Replace the geometry backend.
    pub fn with_geometry(mut self, geometry: Box<dyn GeometryBackend>) -> Self {
        self.geometry = geometry;
        self
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline on an image file.
    ///
    /// The mesh is written to `<output_dir>/<file stem>.obj`, overwriting any
    /// previous file of the same name.
    ///
    /// # Arguments
    ///
    /// * `image_path` - The path to the input image.
    ///
    /// # Returns
    ///
    /// The heightmap, the mesh location and the sizes of the intermediate products.
    pub fn run(&self, image_path: impl AsRef<Path>) -> Result<PipelineOutput, PipelineError> {
        let image_path = image_path.as_ref();
        let stem = file_stem(image_path)?;
        let intensity = read_intensity_grid(image_path, &self.config.loader)?;
        self.run_grid(&intensity, &stem)
    }

    /// Run the pipeline on an encoded image held in memory.
    ///
    /// # Arguments
    ///
    /// * `bytes` - The encoded image.
    /// * `file_name` - The name the image was uploaded with, used to name the mesh.
    pub fn run_bytes(&self, bytes: &[u8], file_name: &str) -> Result<PipelineOutput, PipelineError> {
        let stem = file_stem(Path::new(file_name))?;
        let intensity = decode_intensity_grid(bytes, &self.config.loader)?;
        self.run_grid(&intensity, &stem)
    }

    /// Run the pipeline on an intensity grid.
    ///
    /// # Arguments
    ///
    /// * `intensity` - The input image with values in `[0, 1]`.
    /// * `stem` - The file name of the mesh without extension.
    pub fn run_grid(
        &self,
        intensity: &IntensityGrid,
        stem: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let start = Instant::now();

        let size = self.config.loader.size;
        intensity.ensure_size(size)?;

        let depth = self.predictor.predict(intensity)?;
        depth.ensure_size(size)?;
        log::debug!("Predicted a {} depth grid", depth.size());

        // the network predicts depth below the highest point, flip it to an elevation
        let dtm = depth.invert_from_max();

        let mirror_width = self.config.mirror_width.unwrap_or(dtm.width());
        let mut pointcloud = build_point_cloud_checked(&dtm, intensity, size, mirror_width)?;
        let num_points = pointcloud.len();

        self.geometry
            .estimate_normals(&mut pointcloud, &self.config.orientation)?;
        log::debug!("Estimated normals for {} points", num_points);

        let (mut mesh, _densities) = self.geometry.reconstruct_surface(pointcloud)?;
        log::debug!(
            "Reconstructed a mesh with {} vertices and {} triangles",
            mesh.num_vertices(),
            mesh.num_triangles()
        );

        let rotation = rotation_matrix_from_xyz(self.config.rotation);
        mesh.rotate(&rotation, &[0.0, 0.0, 0.0]);
        mesh.compute_vertex_normals();
        self.geometry.clean(&mut mesh);
        log::debug!(
            "Cleaned mesh has {} vertices and {} triangles",
            mesh.num_vertices(),
            mesh.num_triangles()
        );

        std::fs::create_dir_all(&self.config.output_dir)?;
        let mesh_path = self.config.output_dir.join(format!("{stem}.obj"));
        write_obj(&mesh_path, &mesh)?;

        let heightmap = render_heightmap(&dtm, &self.config.figure)?;

        log::info!(
            "Processed {} in {:?}: {} points, {} vertices, {} triangles",
            stem,
            start.elapsed(),
            num_points,
            mesh.num_vertices(),
            mesh.num_triangles()
        );

        Ok(PipelineOutput {
            heightmap,
            mesh_path,
            num_points,
            num_vertices: mesh.num_vertices(),
            num_triangles: mesh.num_triangles(),
        })
    }
}

fn file_stem(path: &Path) -> Result<String, PipelineError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| PipelineError::InvalidInputPath(path.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dtm_3d::{io::obj::read_obj, mesh::TriangleMesh, pointcloud::PointCloud};
    use dtm_image::{DepthGrid, Grid, ImageSize};
    use std::sync::Mutex;

    // predicts the intensity scaled by a constant
    struct ScaledPredictor(f32);

    impl DepthPredictor for ScaledPredictor {
        fn predict(&self, image: &IntensityGrid) -> Result<DepthGrid, DnnError> {
            Ok(Grid::from_fn(image.size(), |row, col| {
                image.get(row, col).copied().unwrap_or(0.0) * self.0
            }))
        }
    }

    // predicts a grid of the wrong size
    struct CroppingPredictor;

    impl DepthPredictor for CroppingPredictor {
        fn predict(&self, _image: &IntensityGrid) -> Result<DepthGrid, DnnError> {
            Ok(Grid::from_size_val([4, 4].into(), 1.0))
        }
    }

    #[derive(Default)]
    struct Recorded {
        calls: Vec<&'static str>,
        direction: Option<[f64; 3]>,
        points: Vec<[f64; 3]>,
        colors: Vec<[f64; 3]>,
    }

    // records the calls and returns a single triangle
    #[derive(Default)]
    struct RecordingBackend {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl GeometryBackend for RecordingBackend {
        fn estimate_normals(
            &self,
            pointcloud: &mut PointCloud,
            direction: &[f64; 3],
        ) -> Result<(), Geometry3dError> {
            if let Ok(mut recorded) = self.recorded.lock() {
                recorded.calls.push("estimate_normals");
                recorded.direction = Some(*direction);
                recorded.points = pointcloud.points().to_vec();
                recorded.colors = pointcloud.colors().unwrap_or_default().to_vec();
            }
            pointcloud.set_normals(vec![[0.0, 0.0, 1.0]; pointcloud.len()]);
            Ok(())
        }

        fn reconstruct_surface(
            &self,
            pointcloud: PointCloud,
        ) -> Result<(TriangleMesh, Vec<f64>), Geometry3dError> {
            if let Ok(mut recorded) = self.recorded.lock() {
                recorded.calls.push("reconstruct_surface");
            }
            assert!(pointcloud.has_normals());
            let mesh = TriangleMesh::new(
                vec![[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]],
                vec![[0, 1, 2]],
            );
            Ok((mesh, vec![1.0; 3]))
        }

        fn clean(&self, mesh: &mut TriangleMesh) {
            if let Ok(mut recorded) = self.recorded.lock() {
                recorded.calls.push("clean");
            }
            // rotated by pi about x before the cleanup, with normals
            assert_relative_eq!(mesh.vertices()[2][1], -1.0, epsilon = 1e-9);
            assert_relative_eq!(mesh.vertices()[2][2], -1.0, epsilon = 1e-9);
            assert!(mesh.has_vertex_normals());
            assert_relative_eq!(mesh.vertex_normals()[0][2], -1.0, epsilon = 1e-9);
        }
    }

    // keeps the point colours and delegates to the default backend
    struct ColorKeepingBackend {
        inner: PoissonBackend,
        colors: Arc<Mutex<Vec<[f64; 3]>>>,
    }

    impl GeometryBackend for ColorKeepingBackend {
        fn estimate_normals(
            &self,
            pointcloud: &mut PointCloud,
            direction: &[f64; 3],
        ) -> Result<(), Geometry3dError> {
            if let Ok(mut colors) = self.colors.lock() {
                *colors = pointcloud.colors().unwrap_or_default().to_vec();
            }
            self.inner.estimate_normals(pointcloud, direction)
        }

        fn reconstruct_surface(
            &self,
            pointcloud: PointCloud,
        ) -> Result<(TriangleMesh, Vec<f64>), Geometry3dError> {
            self.inner.reconstruct_surface(pointcloud)
        }

        fn clean(&self, mesh: &mut TriangleMesh) {
            self.inner.clean(mesh);
        }
    }

    fn write_gray_png(
        dir: &Path,
        name: &str,
        size: u32,
        value: u8,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let path = dir.join(name);
        image::GrayImage::from_pixel(size, size, image::Luma([value])).save(&path)?;
        Ok(path)
    }

    fn small_config(output_dir: &Path, size: usize) -> PipelineConfig {
        PipelineConfig {
            loader: LoaderConfig {
                size: ImageSize {
                    width: size,
                    height: size,
                },
                resize: false,
            },
            output_dir: output_dir.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pipeline_stage_order() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let input = write_gray_png(tmp_dir.path(), "crater.png", 8, 128)?;

        let backend = RecordingBackend::default();
        let recorded = backend.recorded.clone();

        let pipeline = Pipeline::new(
            Arc::new(ScaledPredictor(10.0)),
            small_config(tmp_dir.path(), 8),
        )
        .with_geometry(Box::new(backend));
        let output = pipeline.run(&input)?;

        let recorded = recorded.lock().map_err(|e| e.to_string())?;
        assert_eq!(
            recorded.calls,
            vec!["estimate_normals", "reconstruct_surface", "clean"]
        );
        assert_eq!(recorded.direction, Some([0.0, 0.0, 1.0]));

        // uniform intensity gives a flat terrain at zero after the inversion
        assert_eq!(recorded.points.len(), 64);
        assert_eq!(recorded.points[0], [8.0, 0.0, 0.0]);
        assert_eq!(recorded.points[9], [7.0, 1.0, 0.0]);
        for color in &recorded.colors {
            assert_relative_eq!(color[0], 128.0 / 255.0, epsilon = 1e-6);
        }

        assert_eq!(output.num_points, 64);
        assert_eq!(output.num_vertices, 3);
        assert_eq!(output.num_triangles, 1);
        assert_eq!(output.mesh_path, tmp_dir.path().join("crater.obj"));

        let mesh = read_obj(&output.mesh_path)?;
        assert_eq!(mesh.num_triangles(), 1);
        Ok(())
    }

    #[test]
    fn test_pipeline_end_to_end_gray_image() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let input = write_gray_png(tmp_dir.path(), "gray.png", 512, 128)?;

        let mut config = PipelineConfig {
            output_dir: tmp_dir.path().to_owned(),
            ..Default::default()
        };
        config.geometry.poisson.depth = 5;

        let colors = Arc::new(Mutex::new(Vec::new()));
        let backend = ColorKeepingBackend {
            inner: config.geometry,
            colors: colors.clone(),
        };
        let pipeline = Pipeline::new(Arc::new(ScaledPredictor(100.0)), config)
            .with_geometry(Box::new(backend));
        let output = pipeline.run(&input)?;

        assert_eq!(output.num_points, 512 * 512);

        let colors = colors.lock().map_err(|e| e.to_string())?;
        assert_eq!(colors.len(), 512 * 512);
        assert!(colors.iter().all(|c| *c == colors[0]));
        for channel in colors[0] {
            assert_relative_eq!(channel, 128.0 / 255.0, epsilon = 1e-6);
        }
        assert_eq!(output.heightmap.image.dimensions(), (640, 480));
        assert_relative_eq!(output.heightmap.vmin, 0.0);
        assert_relative_eq!(output.heightmap.vmax, 0.0);
        assert!(output.mesh_path.exists());

        let mesh = read_obj(&output.mesh_path)?;
        assert_eq!(mesh.num_vertices(), output.num_vertices);
        assert_eq!(mesh.num_triangles(), output.num_triangles);
        Ok(())
    }

    #[test]
    fn test_pipeline_terrain_heightmap_range() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let backend = RecordingBackend::default();
        let pipeline = Pipeline::new(
            Arc::new(ScaledPredictor(700.0)),
            small_config(tmp_dir.path(), 16),
        )
        .with_geometry(Box::new(backend));

        let intensity = Grid::from_fn([16, 16].into(), |row, _| row as f32 / 15.0);
        let output = pipeline.run_grid(&intensity, "ramp")?;

        // depth 700 at the last row becomes elevation 0, the first row 700
        assert_relative_eq!(output.heightmap.vmin, 0.0);
        assert_relative_eq!(output.heightmap.vmax, 700.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_pipeline_rejects_wrong_size() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let input = write_gray_png(tmp_dir.path(), "small.png", 100, 10)?;

        let config = PipelineConfig {
            loader: LoaderConfig {
                resize: false,
                ..Default::default()
            },
            output_dir: tmp_dir.path().to_owned(),
            ..Default::default()
        };
        let pipeline = Pipeline::new(Arc::new(ScaledPredictor(1.0)), config);
        let res = pipeline.run(&input);
        assert!(matches!(
            res,
            Err(PipelineError::Image(ImageError::ShapeMismatch { .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_pipeline_rejects_predictor_size() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let pipeline = Pipeline::new(Arc::new(CroppingPredictor), small_config(tmp_dir.path(), 8))
            .with_geometry(Box::new(RecordingBackend::default()));
        let intensity = Grid::from_size_val([8, 8].into(), 0.5);
        let res = pipeline.run_grid(&intensity, "cropped");
        assert!(matches!(
            res,
            Err(PipelineError::Image(ImageError::ShapeMismatch { .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_pipeline_rejects_grid_of_other_size() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let backend = RecordingBackend::default();
        let recorded = backend.recorded.clone();
        let config = PipelineConfig {
            output_dir: tmp_dir.path().to_owned(),
            ..Default::default()
        };
        let pipeline =
            Pipeline::new(Arc::new(ScaledPredictor(1.0)), config).with_geometry(Box::new(backend));

        let intensity = Grid::from_size_val([8, 8].into(), 0.5);
        let res = pipeline.run_grid(&intensity, "tiny");
        assert!(matches!(
            res,
            Err(PipelineError::Image(ImageError::ShapeMismatch { .. }))
        ));

        // nothing reaches the geometry stage or the output directory
        let recorded = recorded.lock().map_err(|e| e.to_string())?;
        assert!(recorded.calls.is_empty());
        assert!(!tmp_dir.path().join("tiny.obj").exists());
        Ok(())
    }

    #[test]
    fn test_pipeline_missing_file() {
        let pipeline = Pipeline::new(Arc::new(ScaledPredictor(1.0)), PipelineConfig::default());
        let res = pipeline.run("does/not/exist.png");
        assert!(matches!(
            res,
            Err(PipelineError::Image(ImageError::FileDoesNotExist(_)))
        ));
    }

    #[test]
    fn test_file_stem() {
        assert!(matches!(file_stem(Path::new("a/b/crater.png")), Ok(s) if s == "crater"));
        assert!(matches!(
            file_stem(Path::new("")),
            Err(PipelineError::InvalidInputPath(_))
        ));
    }

    #[test]
    fn test_config_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"mirror_width": 256, "geometry": {"poisson": {"depth": 6}}, "figure": {"width": 320}}"#,
        )?;

        let config = PipelineConfig::from_json_file(&path)?;
        assert_eq!(config.mirror_width, Some(256));
        assert_eq!(config.geometry.poisson.depth, 6);
        assert_eq!(config.geometry.normals.knn, 30);
        assert_eq!(config.figure.width, 320);
        assert_eq!(config.figure.height, 480);
        assert_eq!(config.orientation, [0.0, 0.0, 1.0]);
        assert_relative_eq!(config.rotation[0], std::f64::consts::PI);
        assert!(config.loader.resize);
        Ok(())
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use dtm::pipeline::{Pipeline, PipelineError};
use serde::Serialize;
use tokio::sync::Semaphore;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Mars DTM Estimation</title>
</head>
<body>
<h1>Mars DTM Estimation</h1>
<p>This demo predicts a DTM from an image of the martian surface. Then, by using a surface
reconstruction algorithm, the 3D model is generated and it can also be downloaded.</p>
<form id="upload">
  <input type="file" name="image" accept="image/*" required>
  <button type="submit">Submit</button>
</form>
<div id="result"></div>
<div id="viewer"></div>
<h2>Examples</h2>
<ul id="examples"></ul>
<script type="importmap">
{
  "imports": {
    "three": "https://cdn.jsdelivr.net/npm/three@0.160.0/build/three.module.js",
    "three/addons/": "https://cdn.jsdelivr.net/npm/three@0.160.0/examples/jsm/"
  }
}
</script>
<script type="module">
import * as THREE from "three";
import { OBJLoader } from "three/addons/loaders/OBJLoader.js";
import { OrbitControls } from "three/addons/controls/OrbitControls.js";

let renderer = null;

function showMesh(url) {
  if (renderer) {
    renderer.setAnimationLoop(null);
    renderer.dispose();
  }
  const [width, height] = [640, 480];
  renderer = new THREE.WebGLRenderer({ antialias: true });
  renderer.setSize(width, height);
  document.getElementById("viewer").replaceChildren(renderer.domElement);

  const scene = new THREE.Scene();
  scene.background = new THREE.Color(0x202020);
  scene.add(new THREE.HemisphereLight(0xffffff, 0x404040, 2));
  const camera = new THREE.PerspectiveCamera(45, width / height, 0.1, 1e5);
  const controls = new OrbitControls(camera, renderer.domElement);

  new OBJLoader().load(url, (object) => {
    object.traverse((child) => {
      if (child.isMesh) {
        child.material = new THREE.MeshStandardMaterial({
          vertexColors: child.geometry.hasAttribute("color"),
          side: THREE.DoubleSide,
        });
      }
    });
    const box = new THREE.Box3().setFromObject(object);
    const extent = box.getSize(new THREE.Vector3()).length();
    object.position.sub(box.getCenter(new THREE.Vector3()));
    scene.add(object);
    camera.position.set(0, -0.8 * extent, 0.8 * extent);
    camera.near = extent / 100;
    camera.far = extent * 10;
    camera.updateProjectionMatrix();
  });

  const current = renderer;
  current.setAnimationLoop(() => {
    controls.update();
    current.render(scene, camera);
  });
}

async function predict(body) {
  const result = document.getElementById("result");
  result.textContent = "Processing...";
  const response = await fetch("/api/v0/predict", { method: "POST", body });
  const data = await response.json();
  if (!response.ok) {
    result.textContent = data.error;
    return;
  }
  // outputs keep their names across requests
  const version = Date.now();
  result.innerHTML = `<img src="${data.heightmap}?v=${version}" alt="DTM">` +
    `<p><a href="${data.mesh}" download>Download the 3D model</a> ` +
    `(${data.num_vertices} vertices, ${data.num_triangles} triangles)</p>`;
  showMesh(`${data.mesh}?v=${version}`);
}
document.getElementById("upload").addEventListener("submit", (event) => {
  event.preventDefault();
  predict(new FormData(event.target));
});
fetch("/api/v0/examples").then((r) => r.json()).then((data) => {
  const list = document.getElementById("examples");
  for (const name of data.examples) {
    const item = document.createElement("li");
    const link = document.createElement("a");
    link.href = "#";
    link.textContent = name;
    link.addEventListener("click", async (event) => {
      event.preventDefault();
      const blob = await (await fetch(`/api/v0/examples/${name}`)).blob();
      const form = new FormData();
      form.append("image", blob, name);
      predict(form);
    });
    item.appendChild(link);
    list.appendChild(item);
  }
});
</script>
</body>
</html>
"##;

/// The state shared by the request handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    workers: Arc<Semaphore>,
    output_dir: PathBuf,
    gallery_dir: PathBuf,
}

impl AppState {
    /// Create the state with at most `workers` pipelines running at once.
    pub fn new(pipeline: Pipeline, gallery_dir: PathBuf, workers: usize) -> Self {
        let output_dir = pipeline.config().output_dir.clone();
        Self {
            pipeline: Arc::new(pipeline),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            output_dir,
            gallery_dir,
        }
    }
}

/// Build the application routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/v0/predict", post(predict))
        .route("/api/v0/outputs/:file", get(output_file))
        .route("/api/v0/examples", get(list_examples))
        .route("/api/v0/examples/:file", get(example_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// An error returned to the client as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl ToString) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn not_found(message: impl ToString) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.to_string(),
        }
    }

    fn internal(message: impl ToString) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Image(_) | PipelineError::InvalidInputPath(_) => Self::bad_request(e),
            _ => Self::internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("{}", self.message);
        } else {
            log::warn!("{}", self.message);
        }
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    heightmap: String,
    mesh: String,
    num_points: usize,
    num_vertices: usize,
    num_triangles: usize,
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::bad_request)?
    {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = upload_file_name(field.file_name().unwrap_or_default());
        let bytes = field.bytes().await.map_err(ApiError::bad_request)?;
        upload = Some((file_name, bytes));
        break;
    }
    let (file_name, bytes) = upload.ok_or_else(|| ApiError::bad_request("Missing image field"))?;

    log::info!("Received {} ({} bytes)", file_name, bytes.len());

    // queue on the semaphore, the pipeline itself runs on a blocking thread
    let permit = state
        .workers
        .clone()
        .acquire_owned()
        .await
        .map_err(ApiError::internal)?;

    let pipeline = state.pipeline.clone();
    let output_dir = state.output_dir.clone();
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let output = pipeline.run_bytes(&bytes, &file_name)?;

        let stem = output
            .mesh_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_owned)
            .ok_or_else(|| ApiError::internal("Invalid mesh path"))?;
        let heightmap_name = format!("{stem}.png");
        output
            .heightmap
            .save_png(output_dir.join(&heightmap_name))
            .map_err(ApiError::internal)?;

        Ok(Json(PredictResponse {
            heightmap: format!("/api/v0/outputs/{heightmap_name}"),
            mesh: format!("/api/v0/outputs/{stem}.obj"),
            num_points: output.num_points,
            num_vertices: output.num_vertices,
            num_triangles: output.num_triangles,
        }))
    })
    .await
    .map_err(ApiError::internal)?
}

async fn output_file(
    State(state): State<AppState>,
    axum::extract::Path(file): axum::extract::Path<String>,
) -> Result<Response, ApiError> {
    serve_file(&state.output_dir, &file, &["png", "obj"]).await
}

async fn example_file(
    State(state): State<AppState>,
    axum::extract::Path(file): axum::extract::Path<String>,
) -> Result<Response, ApiError> {
    serve_file(&state.gallery_dir, &file, &IMAGE_EXTENSIONS).await
}

async fn list_examples(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "examples": gallery_images(&state.gallery_dir) }))
}

// the last path component without leading dots, so the outputs named after it can be served
fn upload_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let base = base.trim_start_matches('.');
    let has_stem = Path::new(base)
        .file_stem()
        .is_some_and(|stem| !stem.is_empty());
    if has_stem {
        base.to_string()
    } else {
        String::from("upload.png")
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

// sorted names of the images directly inside the gallery directory
fn gallery_images(dir: &Path) -> Vec<String> {
    let mut names = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
        .filter(|name| {
            extension_of(name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        })
        .collect::<Vec<_>>();
    names.sort();
    names
}

async fn serve_file(dir: &Path, file: &str, extensions: &[&str]) -> Result<Response, ApiError> {
    if file.is_empty() || file.contains(['/', '\\']) || file.starts_with('.') {
        return Err(ApiError::bad_request(format!("Invalid file name {file:?}")));
    }

    let content_type = match extension_of(file) {
        Some(ext) if extensions.contains(&ext.as_str()) => match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "tif" | "tiff" => "image/tiff",
            "bmp" => "image/bmp",
            _ => "model/obj",
        },
        _ => return Err(ApiError::not_found(format!("No such file {file}"))),
    };

    let bytes = match tokio::fs::read(dir.join(file)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("No such file {file}")))
        }
        Err(e) => return Err(ApiError::internal(e)),
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

mod app;

use std::path::PathBuf;
use std::sync::Arc;

use argh::FromArgs;
use dtm::{
    dnn::GlpDepthPredictorBuilder,
    pipeline::{Pipeline, PipelineConfig},
};

/// Serve the Mars DTM estimation demo
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the trained GLPDepth weights
    #[argh(option, short = 'w', default = "PathBuf::from(\"pretrained/best_model.ckpt\")")]
    weights: PathBuf,

    /// address to listen on
    #[argh(option, default = "String::from(\"0.0.0.0\")")]
    host: String,

    /// port to listen on
    #[argh(option, short = 'p', default = "8080")]
    port: u16,

    /// directory the meshes and heightmaps are written to
    #[argh(option, short = 'o')]
    output_dir: Option<PathBuf>,

    /// directory with the example images
    #[argh(option, short = 'g', default = "PathBuf::from(\"gallery\")")]
    gallery_dir: PathBuf,

    /// number of requests processed at the same time
    #[argh(option, default = "1")]
    workers: usize,

    /// path to a JSON pipeline configuration
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    std::fs::create_dir_all(&config.output_dir)?;

    log::info!("Loading the model from {}", args.weights.display());
    let predictor = GlpDepthPredictorBuilder::new(&args.weights).build()?;
    let pipeline = Pipeline::new(Arc::new(predictor), config);

    let state = app::AppState::new(pipeline, args.gallery_dir, args.workers);
    let router = app::router(state);

    let addr = format!("{}:{}", args.host, args.port);
    log::info!("Listening on: http://{}", addr);
    log::info!("Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facerank::{
    catalog::ClassCatalog,
    config,
    prediction::{self, PredictResponse},
    routes, FaceClassifier, Pipeline,
};
use log::info;

#[derive(Parser)]
#[command(name = "facerank")]
#[command(version, about = "Face identity classification over HTTP")]
struct Cli {
    /// Config file (defaults to the installed config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the models and serve the HTTP API
    Serve {
        /// Address to listen on, overrides the config
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Classify a single image and print the predictions as JSON
    Predict {
        /// Image file to classify
        image: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => serve(&cfg, bind),
        Commands::Predict { image } => predict(&cfg, &image),
        Commands::Config => print_config(&cfg),
    }
}

fn load_models(cfg: &config::Config) -> Result<(Pipeline, ClassCatalog)> {
    let catalog = ClassCatalog::load(&cfg.class_names).context("Failed to load class names")?;
    info!("Loaded {} classes from {}", catalog.names().len(), cfg.class_names.display());

    let pipeline = Pipeline::new(cfg.pipeline_options())
        .context("Failed to initialize face classification pipeline")?;
    info!("Models loaded");

    Ok((pipeline, catalog))
}

fn serve(cfg: &config::Config, bind: Option<String>) -> Result<()> {
    let (pipeline, catalog) = load_models(cfg)?;
    let addr = bind.unwrap_or_else(|| cfg.bind.clone());
    let state = routes::AppState::new(pipeline, catalog, cfg.top_k);
    let app = routes::app(state, cfg.max_upload_bytes);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {}", addr))?;
        info!("Listening on {}", listener.local_addr()?);

        axum::serve(listener, app).await.context("HTTP server failed")
    })
}

fn predict(cfg: &config::Config, image_path: &Path) -> Result<()> {
    let (mut pipeline, catalog) = load_models(cfg)?;

    let img = image::open(image_path)
        .with_context(|| format!("reading image {}", image_path.display()))?;
    let outcome = pipeline.classify(&img)?;
    info!(
        "Face score {:.3} at {:?}",
        outcome.detection.score, outcome.detection.bbox
    );

    let predictions = prediction::rank(&catalog, &outcome.probabilities, cfg.top_k)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&PredictResponse::success(predictions))?
    );
    Ok(())
}

fn print_config(cfg: &config::Config) -> Result<()> {
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}

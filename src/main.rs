use anyhow::Context;
use clap::{Parser, Subcommand};
use motscan::common::types::{media_type_for_extension, ImagePayload, VehicleRegistry};
use motscan::config::Config;
use motscan::dvla::DvlaClient;
use motscan::pipeline::ExtractionPipeline;
use motscan::server::{start_server, AppState};
use motscan::validation::registration;
use motscan::{logging, models, storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "motscan")]
#[command(about = "Ensemble vision-model extraction of MOT reminder data from screenshots")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract MOT data from a single screenshot and print the result
    Extract {
        /// Screenshot image file (.jpg, .png, .webp, .bmp, .tiff)
        image: PathBuf,
        /// Pretty-print the JSON result
        #[arg(long)]
        pretty: bool,
    },
    /// Run the HTTP API server
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check a UK registration offline, optionally against the DVLA
    ValidateReg {
        registration: String,
        /// Also look the registration up in the DVLA registry
        #[arg(long)]
        lookup: bool,
    },
}

fn build_pipeline(config: &Config) -> (ExtractionPipeline, Arc<dyn VehicleRegistry>) {
    let mut clients = Vec::new();
    for name in &config.models.enabled {
        match models::create_model(name, &config.models) {
            Some(client) => clients.push(client),
            None => warn!("backend '{name}' not constructed"),
        }
    }
    info!(backends = clients.len(), "vision backends initialized");

    let registry: Arc<dyn VehicleRegistry> = Arc::new(DvlaClient::from_config(&config.dvla));
    let pipeline = ExtractionPipeline::new(config, clients, Arc::clone(&registry));
    (pipeline, registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config);

    match cli.command {
        Commands::Extract { image, pretty } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read image '{}'", image.display()))?;
            let media_type = image
                .extension()
                .and_then(|e| e.to_str())
                .and_then(media_type_for_extension)
                .context("unsupported image extension")?;

            let payload = ImagePayload::new(bytes, media_type);
            let digest = payload.digest();

            let (pipeline, _registry) = build_pipeline(&config);
            let result = pipeline.process(payload).await?;

            let results_dir = Path::new(&config.storage.results_dir);
            match storage::write_result(results_dir, &digest, &result) {
                Ok(path) => info!("result saved to {}", path.display()),
                Err(e) => warn!(error = %e, "failed to persist result"),
            }

            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{json}");
        }
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }

            let (pipeline, registry) = build_pipeline(&config);
            let state = Arc::new(AppState {
                pipeline,
                registry,
                config,
            });

            if let Err(e) = start_server(state).await {
                anyhow::bail!("server failed: {e}");
            }
        }
        Commands::ValidateReg {
            registration: plate,
            lookup,
        } => {
            let check = registration::check(&plate);
            println!("{}", serde_json::to_string_pretty(&check)?);

            if lookup && check.is_valid {
                let registry = DvlaClient::from_config(&config.dvla);
                match registry.lookup(&check.normalized).await {
                    Ok(motscan::common::types::RegistryLookup::Found(record)) => {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    }
                    Ok(motscan::common::types::RegistryLookup::NotFound) => {
                        println!("no DVLA record for {}", check.normalized);
                    }
                    Err(e) => {
                        warn!(error = %e, "DVLA lookup failed");
                        println!("DVLA lookup unavailable: {e}");
                    }
                }
            }
        }
    }
    Ok(())
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use visinspect::io::{CsvWriter, ImageArchiver};
use visinspect::server::{self, InspectionService};
use visinspect::{Controller, InspectionConfig, InspectionResult};

#[derive(Parser)]
#[command(name = "visinspect")]
#[command(about = "Automated visual defect inspection")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect a single image and print the verdict
    Inspect {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Known-good image for template comparison
        #[arg(long, value_name = "IMAGE")]
        reference: Option<PathBuf>,

        /// JSON configuration file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Append the result to a CSV file and archive images under this directory
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the trigger and REST listeners until Ctrl-C
    Serve {
        /// JSON configuration file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> InspectionConfig {
    let Some(path) = path else {
        return InspectionConfig::default();
    };
    match InspectionConfig::load(path) {
        Ok(config) => {
            info!(path = %path.display(), "configuration loaded");
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load configuration, using defaults");
            InspectionConfig::default()
        }
    }
}

fn print_summary(image: &Path, result: &InspectionResult) {
    println!("Image:      {}", image.display());
    println!("Judgment:   {}", result.judgment());
    if !result.success {
        println!("Error:      {}", result.error_message);
        return;
    }
    println!("Defects:    {}", result.defects.len());
    for (defect_type, count) in result.defect_counts_by_type() {
        println!("  {defect_type:<14} {count}");
    }
    println!(
        "Time:       {:.2} ms (preprocess {:.2} ms, detect {:.2} ms)",
        result.total_time_ms, result.preprocessing_time_ms, result.detection_time_ms
    );
    for (i, defect) in result.defects.iter().enumerate() {
        println!(
            "  #{:<3} {:<14} {:>6.2}%  at ({}, {}) {}x{}",
            i + 1,
            defect.defect_type,
            defect.confidence * 100.0,
            defect.bbox.x,
            defect.bbox.y,
            defect.bbox.width,
            defect.bbox.height
        );
    }
}

fn run_inspect(
    image_path: &Path,
    reference: Option<&Path>,
    config: &InspectionConfig,
    output_dir: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let controller = Controller::from_config(config).context("Failed to build controller")?;
    if let Some(reference) = reference {
        let image = image::open(reference)
            .with_context(|| format!("Failed to load reference image {:?}", reference))?;
        controller.set_reference_image(Some(image));
    }

    let image = image::open(image_path)
        .with_context(|| format!("Failed to load image {:?}", image_path))?;
    let result = controller.inspect(&image);

    if let Some(dir) = output_dir {
        let source = image_path.display().to_string();
        CsvWriter::new(config.output.include_defect_details)
            .append_result(dir.join("results.csv"), &result, &source)?;
        let saved = ImageArchiver::new(dir.join("images"), "inspect").save(&result)?;
        info!(files = saved.len(), "images archived");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result.summary())?);
    } else {
        print_summary(image_path, &result);
    }

    if !result.success {
        anyhow::bail!("inspection failed: {}", result.error_message);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Command::Inspect {
            image,
            reference,
            config,
            output_dir,
            json,
        } => {
            let config = load_config(config.as_deref());
            tokio::task::spawn_blocking(move || {
                run_inspect(&image, reference.as_deref(), &config, output_dir.as_deref(), json)
            })
            .await??;
        }
        Command::Serve { config } => {
            let config = load_config(config.as_deref());
            let service = InspectionService::from_config(&config)?;
            info!(
                trigger_port = config.server.trigger_port,
                rest_port = config.server.rest_port,
                "visinspect v{}",
                server::VERSION
            );
            server::serve(Arc::new(service), shutdown_signal()).await?;
        }
    }

    Ok(())
}

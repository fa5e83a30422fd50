//! Federated X-Ray Diagnosis CLI
//!
//! Runs the centralized model and every available hospital model on one
//! chest X-ray and prints their predictions side by side.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use xray_fed::backend::{backend_name, default_device, DefaultBackend};
use xray_fed::inference::{
    render_report, ModelRegistry, ModelSlot, Predictor, RegistryConfig, SkipReason,
};
use xray_fed::model::{load_classifier, save_classifier, MedicalClassifierConfig};
use xray_fed::utils::logging::{init_logging, LogConfig};
use xray_fed::{AppConfig, XrayError};

/// Federated Chest X-Ray Diagnosis
///
/// Compare a centrally-trained pneumonia classifier against independently
/// trained hospital models on a single X-ray.
#[derive(Parser, Debug)]
#[command(name = "xray-fed")]
#[command(version)]
#[command(about = "Compare centralized and per-hospital X-ray classifiers", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Directory holding central_model.pth and client_<n>_model.pth
    #[arg(long, env = "XRAY_FED_MODELS_DIR", global = true)]
    models_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every available model on one X-ray image
    Predict {
        /// Path to the X-ray (jpg, jpeg or png)
        #[arg(short, long)]
        image: PathBuf,

        /// Only load these slots (central, client_1 .. client_5)
        #[arg(long, value_delimiter = ',')]
        slots: Option<Vec<ModelSlot>>,

        /// Print the report as JSON instead of a grid
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List model slots and whether their checkpoints load
    Models,

    /// Convert a PyTorch checkpoint into a Burn record (.mpk)
    Convert {
        /// PyTorch checkpoint (.pth / .pt)
        #[arg(short, long)]
        input: PathBuf,

        /// Output path; the .mpk extension is added
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(models_dir) = cli.models_dir {
        config.registry.models_dir = models_dir;
    }

    let json_output = matches!(cli.command, Commands::Predict { json: true, .. });
    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if json_output {
        LogConfig::quiet()
    } else {
        LogConfig::default().with_level(config.log_level())
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Predict { image, slots, json } => {
            if let Some(slots) = slots {
                config.registry.slots = slots;
                config.validate()?;
            }
            if !json {
                print_banner();
            }
            cmd_predict(&config.registry, &image, json)?;
        }

        Commands::Models => {
            print_banner();
            cmd_models(&config.registry)?;
        }

        Commands::Convert { input, output } => {
            cmd_convert(&input, &output)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   Federated Medical Diagnosis                                ║
 ║   Centralized model vs. individual hospital models           ║
 ╚══════════════════════════════════════════════════════════════╝
 "#
        .cyan()
    );
}

fn load_registry(config: &RegistryConfig) -> Result<ModelRegistry<DefaultBackend>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("  {spinner:.green} {msg}")?);
    spinner.set_message(format!("Loading models from {}...", config.models_dir.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let registry = ModelRegistry::load(config, &default_device());

    spinner.finish_and_clear();
    Ok(registry)
}

fn cmd_predict(config: &RegistryConfig, image: &Path, json: bool) -> Result<()> {
    info!("Running diagnosis");
    info!("  Image:  {}", image.display());
    info!("  Models: {}", config.models_dir.display());

    if !image.exists() {
        bail!("Image not found: {}", image.display());
    }

    let predictor = Predictor::<DefaultBackend>::new(default_device());
    let input = predictor.preprocess_file(image)?;

    let registry = load_registry(config)?;

    let report = match predictor.diagnose(&registry, input) {
        Ok(report) => report,
        Err(e @ XrayError::NoModels(_)) => {
            eprintln!(
                "{} train the models first and place their checkpoints in that directory",
                "Hint:".yellow()
            );
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| image.display().to_string());
    let report = report.with_image(name);

    if json {
        println!("{}", report.to_json_pretty()?);
    } else {
        println!("{}", render_report(&report));
    }

    Ok(())
}

fn cmd_models(config: &RegistryConfig) -> Result<()> {
    let registry = load_registry(config)?;

    println!("{}", "Model Slots:".cyan().bold());
    println!("  Directory: {}", config.models_dir.display());
    println!("  Backend:   {}", backend_name());
    println!();

    for status in registry.status() {
        let state = match (status.loaded, &status.reason) {
            (true, _) => "loaded".green(),
            (false, Some(reason @ SkipReason::Unreadable(_))) => reason.to_string().red(),
            (false, Some(reason)) => reason.to_string().yellow(),
            (false, None) => "not loaded".yellow(),
        };
        let path = status
            .path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "  {:20} {:10} {:40} {}",
            status.name,
            status.slot.to_string(),
            path,
            state
        );
    }

    println!();
    println!("  {} of {} models available", registry.len(), registry.slots().len());

    Ok(())
}

fn cmd_convert(input: &Path, output: &Path) -> Result<()> {
    info!("Converting {} -> {}", input.display(), output.display());

    let device = default_device();
    let config = MedicalClassifierConfig::new();

    let model = load_classifier::<DefaultBackend>(input, &config, &device)?;
    let written = save_classifier(&model, output)?;

    println!(
        "{} {} -> {}",
        "Converted".green().bold(),
        input.display(),
        written.display()
    );

    Ok(())
}

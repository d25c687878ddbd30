//! durian - analyze images and manage the local prediction history

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;

use durian_scan::config::AppConfig;
use durian_scan::ui::{self, Ui};
use durian_scan::{
    catalog, DetectionService, InferenceEngine, PredictionStore, SqlitePredictionStore,
};

#[derive(Parser, Debug)]
#[command(name = "durian", version, about = "Durian detection and prediction history")]
struct Args {
    /// Path to the prediction SQLite DB (overrides config)
    #[arg(long, value_name = "PATH")]
    db: Option<String>,

    /// Inference backend to load the model on (overrides config)
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run detection on image files and save the predictions
    Analyze {
        #[arg(required = true, value_name = "IMAGE")]
        images: Vec<PathBuf>,
        /// Print predictions as JSON
        #[arg(long)]
        json: bool,
    },
    /// List saved predictions, newest first
    History {
        #[arg(long)]
        json: bool,
    },
    /// Show one prediction in detail
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Aggregate statistics over the history
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Delete one prediction and its detections
    Delete { id: String },
    /// Delete every saved prediction
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Manage model files
    Models {
        #[command(subcommand)]
        action: ModelsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ModelsCommand {
    /// List installed .onnx/.tflite models
    List,
    /// Copy a model file into the models directory
    Install { path: PathBuf },
    /// Remove a model file from the models directory
    Remove { name: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = Ui::from_args(
        Some(&args.ui),
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );

    let mut cfg = AppConfig::load().context("failed to load configuration")?;
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    if let Some(backend) = args.backend {
        cfg.model.backend = backend;
    }

    if let Command::Models { action } = &args.command {
        return run_models(action, &cfg);
    }

    let store = {
        let _stage = ui.stage("Open prediction store");
        SqlitePredictionStore::open(&cfg.db_path)
            .with_context(|| format!("failed to open {}", cfg.db_path))?
    };
    let service = DetectionService::new(InferenceEngine::default(), cfg.postprocessor(), store);

    let result = run(&args.command, &cfg, &service, &ui);
    service.close()?;
    result
}

fn run<S: PredictionStore>(
    command: &Command,
    cfg: &AppConfig,
    service: &DetectionService<S>,
    ui: &Ui,
) -> Result<()> {
    match command {
        Command::Analyze { images, json } => {
            {
                let _stage = ui.stage("Load model");
                service.load_model(cfg.model_info(), &cfg.model.backend)?;
            }
            let mut predictions = Vec::new();
            for path in images {
                let prediction = {
                    let _stage = ui.stage(&format!("Analyze {}", path.display()));
                    service
                        .analyze_file(path)
                        .with_context(|| format!("failed to analyze {}", path.display()))?
                };
                if !json {
                    print!("{}", ui::format_prediction_detail(&prediction));
                }
                predictions.push(prediction);
            }
            if *json {
                println!("{}", serde_json::to_string_pretty(&predictions)?);
            }
        }
        Command::History { json } => {
            let history = service.history()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else if history.is_empty() {
                println!("No predictions yet.");
            } else {
                for p in &history {
                    println!("{}", ui::format_prediction_line(p));
                }
            }
        }
        Command::Show { id, json } => {
            let prediction = service.prediction(id)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&prediction)?);
            } else {
                print!("{}", ui::format_prediction_detail(&prediction));
            }
        }
        Command::Stats { json } => {
            let stats = service.statistics()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", ui::format_statistics(&stats));
            }
        }
        Command::Delete { id } => {
            if service.delete_prediction(id)? {
                println!("Deleted prediction {}", id);
            } else {
                println!("No prediction with id {}", id);
            }
        }
        Command::Clear { yes } => {
            if !yes {
                return Err(anyhow!("refusing to clear history without --yes"));
            }
            service.clear_history()?;
            println!("History cleared.");
        }
        Command::Models { action } => run_models(action, cfg)?,
    }
    Ok(())
}

fn run_models(action: &ModelsCommand, cfg: &AppConfig) -> Result<()> {
    match action {
        ModelsCommand::List => {
            let models = catalog::list_models(&cfg.models_dir)?;
            if models.is_empty() {
                println!("No models in {}", cfg.models_dir.display());
            }
            for path in models {
                println!("{}", path.display());
            }
        }
        ModelsCommand::Install { path } => {
            let dest = catalog::install_model(path, &cfg.models_dir)?;
            println!("Installed {}", dest.display());
        }
        ModelsCommand::Remove { name } => {
            if catalog::remove_model(&cfg.models_dir, name)? {
                println!("Removed {}", name);
            } else {
                println!("{} not found in {}", name, cfg.models_dir.display());
            }
        }
    }
    Ok(())
}

//! modelforge command line: train, serve predictions and manage stored
//! models without an HTTP host.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use modelforge::api::{ApiRequest, ApiService, InputData};
use modelforge::config::{BackendKind, ConfigManager};
use modelforge::data::CsvConnector;
use modelforge::export::ExportFormat;
use modelforge::ml::{Algorithm, ParamMap};
use modelforge::registry::{FineTuneOptions, LogProgressCallback, ModelRegistry, TrainRequest};
use modelforge::runtime::CancelFlag;
use modelforge::types::ModelPatch;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "modelforge")]
#[command(about = "Train, version, export and serve tabular ML models")]
#[command(version)]
struct Cli {
    /// TOML configuration file; MODELFORGE__* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Training backend, overriding the configuration
    #[arg(short, long, global = true)]
    backend: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call an endpoint with a JSON body from a file ("-" for stdin)
    Invoke {
        /// Endpoint path, e.g. /train
        path: String,
        body: PathBuf,
    },

    /// Train a model from a CSV file
    TrainCsv {
        #[arg(long)]
        csv: PathBuf,

        /// Comma-separated feature columns
        #[arg(short, long, value_delimiter = ',', required = true)]
        features: Vec<String>,

        /// Target column; repeat for several targets
        #[arg(short, long, required = true)]
        target: Vec<String>,

        #[arg(short, long, default_value = "Random Forest")]
        algorithm: String,

        #[arg(long)]
        model_id: Option<String>,

        #[arg(long)]
        name: Option<String>,

        /// Hyperparameter as key=value; repeatable
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Predict with a stored model; input is a JSON inputData file
    Predict {
        #[arg(short, long)]
        model: String,

        #[arg(short, long)]
        input: PathBuf,
    },

    /// Re-train a stored model with adjusted hyperparameters
    FineTune {
        model: String,

        #[arg(long)]
        epochs: Option<u32>,

        #[arg(long)]
        learning_rate: Option<f64>,

        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Register the result of an executed notebook
    Import {
        model: String,

        #[arg(long, default_value = "dataset")]
        dataset_name: String,
    },

    /// Inspect and manage stored models
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Inspect and switch model versions
    Versions {
        #[command(subcommand)]
        action: VersionAction,
    },

    /// Print the hyperparameter schema of one or all algorithms
    Schema { algorithm: Option<String> },

    /// Write the effective configuration as TOML
    ConfigInit {
        #[arg(default_value = "modelforge.toml")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    List,
    Show { id: String },
    Delete { id: String },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        dataset_name: Option<String>,
        #[arg(long = "type")]
        model_type: Option<String>,
    },
    Export {
        id: String,
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Output file; defaults to the suggested file name
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum VersionAction {
    List { id: String },
    Activate { id: String, version: String },
}

fn parse_params(pairs: &[String]) -> Result<ParamMap> {
    let mut params = ParamMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Hyperparameter '{}' is not key=value", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        params.insert(key.trim().to_string(), value);
    }
    Ok(params)
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let manager = ConfigManager::new();
    manager.load_layered(cli.config.as_deref())?;
    if let Some(backend) = &cli.backend {
        let kind: BackendKind = backend.parse()?;
        manager.update(|c| c.backend.kind = kind)?;
    }
    let config = manager.get();

    if let Commands::ConfigInit { path } = &cli.command {
        manager.save_to_file(path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    if let Commands::Schema { algorithm } = &cli.command {
        let algorithms = match algorithm {
            Some(name) => vec![Algorithm::from_name(name)?],
            None => Algorithm::all(),
        };
        let schema: serde_json::Map<String, Value> = algorithms
            .into_iter()
            .map(|a| Ok((a.name().to_string(), serde_json::to_value(a.schema())?)))
            .collect::<Result<_>>()?;
        return print_json(&schema);
    }

    let registry = Arc::new(ModelRegistry::from_config(&config)?);
    let cancel = CancelFlag::new();

    match cli.command {
        Commands::Invoke { path, body } => {
            let service = ApiService::new(registry);
            let response = service.handle_with_cancel(&ApiRequest::post(&path, read_input(&body)?), &cancel);
            println!("{}", response.body);
            if response.status != 200 {
                bail!("{} answered with status {}", path, response.status);
            }
        }
        Commands::TrainCsv {
            csv,
            features,
            target,
            algorithm,
            model_id,
            name,
            params,
        } => {
            let request = TrainRequest {
                model_id,
                name,
                dataset_name: csv
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "dataset".to_string()),
                dataset: CsvConnector::load_dataset(&csv)?,
                features,
                targets: target,
                algorithm: Algorithm::from_name(&algorithm)?,
                hyperparameters: parse_params(&params)?,
            };
            let record = registry.train_model(request, &mut LogProgressCallback, &cancel)?;
            println!("{} {} accuracy={:.4}", record.id, record.algorithm, record.accuracy);
        }
        Commands::Predict { model, input } => {
            let record = registry.get_model(&model)?;
            let input: InputData = serde_json::from_str(&read_input(&input)?).context("Invalid inputData")?;
            let rows = input.into_rows(&record.features)?;
            print_json(&registry.predict_with_model(&model, &rows, &cancel)?)?;
        }
        Commands::FineTune {
            model,
            epochs,
            learning_rate,
            params,
        } => {
            let options = FineTuneOptions {
                epochs,
                learning_rate,
                hyperparameters: parse_params(&params)?,
            };
            let record = registry.fine_tune_model(&model, &options, &cancel)?;
            println!("{} {} accuracy={:.4}", record.id, record.versions.len(), record.accuracy);
        }
        Commands::Import { model, dataset_name } => {
            let record = registry.import_model(&model, &dataset_name)?;
            println!("{} {} accuracy={:.4}", record.id, record.algorithm, record.accuracy);
        }
        Commands::Models { action } => match action {
            ModelAction::List => {
                for record in registry.list_models()? {
                    println!(
                        "{}\t{}\t{}\t{:.4}\t{}",
                        record.id, record.name, record.algorithm, record.accuracy, record.created
                    );
                }
            }
            ModelAction::Show { id } => print_json(&registry.get_model(&id)?)?,
            ModelAction::Delete { id } => {
                registry.delete_model(&id)?;
                println!("Deleted {}", id);
            }
            ModelAction::Update {
                id,
                name,
                dataset_name,
                model_type,
            } => {
                let patch = ModelPatch {
                    name,
                    dataset_name,
                    model_type,
                };
                print_json(&registry.update_model(&id, &patch)?)?;
            }
            ModelAction::Export { id, format, output } => {
                let format: ExportFormat = format.parse()?;
                let exported = registry.download_model(&id, format)?;
                let path = output.unwrap_or_else(|| PathBuf::from(&exported.file_name));
                std::fs::write(&path, &exported.content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Wrote {} ({})", path.display(), exported.content_type);
            }
        },
        Commands::Versions { action } => match action {
            VersionAction::List { id } => {
                for version in registry.list_versions(&id)? {
                    println!(
                        "{}\t{}\t{}\t{:.4}{}",
                        version.name,
                        version.created,
                        version.algorithm,
                        version.accuracy,
                        if version.is_active { "\tactive" } else { "" }
                    );
                }
            }
            VersionAction::Activate { id, version } => {
                let record = registry.activate_version(&id, &version)?;
                println!("{} now at {} (accuracy {:.4})", record.id, version, record.accuracy);
            }
        },
        Commands::Schema { .. } | Commands::ConfigInit { .. } => {}
    }

    Ok(())
}

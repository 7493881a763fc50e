//! pet-transfer - 犬猫分類の転移学習 CLI
//!
//! prepare → train → predict / analyze の順に使います。

#![recursion_limit = "256"]
use anyhow::Result;
use clap::{Parser, Subcommand};
use pet_transfer::analysis::{least_confident, standard_queries, RankOrder, RankQuery, RankedImages, RankedSelection};
use pet_transfer::dataset::{extract_archive, split_dataset, SplitSettings};
use pet_transfer::AppConfig;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "pet-transfer", version, about = "Cats vs. dogs transfer learning")]
struct Cli {
    /// 設定ファイル（JSON）
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    InitConfig,
    /// Extract the dataset archive (optional) and split it into train/val folders
    Prepare {
        /// gzip-compressed tar archive of the raw images
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Directory to extract the archive into
        #[arg(long, default_value = "raw")]
        extract_to: PathBuf,
    },
    /// Train the classification head on top of the backbone
    Train {
        /// Output model path (defaults to model.model_path in the config)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Classify a single image
    Predict {
        image: PathBuf,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Run the model over the validation set and rank its predictions
    Analyze {
        #[arg(long)]
        model: Option<PathBuf>,
        /// Only rank images predicted as this class (otherwise the standard query set)
        #[arg(long)]
        label: Option<String>,
        /// Rank by lowest confidence instead of highest
        #[arg(long, requires = "label")]
        lowest: bool,
        /// Only include wrong predictions
        #[arg(long, requires = "label")]
        only_errors: bool,
        #[arg(long)]
        limit: Option<usize>,
        /// Export the prediction table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Export the ranked selections (with image paths) as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pet_transfer=info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::InitConfig = cli.command {
        AppConfig::default().save(&cli.config)?;
        info!(path = %cli.config.display(), "default config written");
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config);
    config.log_summary();

    match cli.command {
        Commands::InitConfig => Ok(()),
        Commands::Prepare { archive, extract_to } => prepare(&config, archive.as_deref(), &extract_to),
        Commands::Train { output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            train(&config, &output)
        }
        Commands::Predict { image, model } => {
            let model = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            predict(&config, &model, &image)
        }
        Commands::Analyze {
            model,
            label,
            lowest,
            only_errors,
            limit,
            csv,
            json,
        } => {
            let model = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            let options = AnalyzeOptions {
                label,
                order: if lowest { RankOrder::Lowest } else { RankOrder::Highest },
                only_errors,
                limit: limit.unwrap_or(config.analysis.top_n),
                csv,
                json,
            };
            analyze(&config, &model, &options)
        }
    }
}

fn prepare(config: &AppConfig, archive: Option<&Path>, extract_to: &Path) -> Result<()> {
    let source = match archive {
        Some(archive) => extract_archive(archive, extract_to)?,
        None => PathBuf::from(&config.data.raw_dir),
    };

    let summary = split_dataset(
        &source,
        Path::new(&config.data.data_dir),
        &SplitSettings::from(&config.data),
    )?;

    println!(
        "{} {} train / {} val images in {}",
        if summary.reused_existing { "Existing split:" } else { "Split:" },
        summary.total_train(),
        summary.total_val(),
        config.data.data_dir
    );
    for (class_name, split) in &summary.per_class {
        println!("  {:<10} train {:>6}  val {:>6}", class_name, split.train, split.val);
    }
    Ok(())
}

struct AnalyzeOptions {
    label: Option<String>,
    order: RankOrder,
    only_errors: bool,
    limit: usize,
    csv: Option<PathBuf>,
    json: Option<PathBuf>,
}

#[cfg(feature = "ml")]
fn train(config: &AppConfig, output: &Path) -> Result<()> {
    let report = pet_transfer::ml::train_model(config, output)?;
    println!(
        "Trained {} epochs on {} images ({} validation), {} parameters",
        report.num_epochs, report.train_samples, report.val_samples, report.num_params
    );
    println!("Model saved to {}", report.model_path.display());
    Ok(())
}

#[cfg(feature = "ml")]
fn load_engine(
    config: &AppConfig,
    model: &Path,
) -> Result<pet_transfer::ml::InferenceEngine<burn_wgpu::Wgpu>> {
    let device = pet_transfer::ml::select_device(&config.device_type);
    let engine = pet_transfer::ml::InferenceEngine::load(model, device)?;
    engine.config().log_info();
    Ok(engine)
}

#[cfg(feature = "ml")]
fn predict(config: &AppConfig, model: &Path, image: &Path) -> Result<()> {
    let engine = load_engine(config, model)?;
    let result = engine.predict_image(image)?;

    println!("{}: {} ({:.4})", image.display(), result.label, result.confidence());
    for (i, p) in result.probabilities.iter().enumerate() {
        let name = engine.config().class_index_to_label(i).unwrap_or("?");
        println!("  {:<10} {:.4}", name, p);
    }
    Ok(())
}

#[cfg(feature = "ml")]
fn analyze(config: &AppConfig, model: &Path, options: &AnalyzeOptions) -> Result<()> {
    use pet_transfer::analysis::ConfusionMatrix;
    use pet_transfer::dataset::ImageFolderDataset;

    let engine = load_engine(config, model)?;
    let class_names = engine.config().class_labels.clone();
    let dataset = ImageFolderDataset::from_directory_with_order(&config.data.val_dir(), &class_names)?;
    if dataset.is_empty() {
        anyhow::bail!("no validation images in {}", config.data.val_dir().display());
    }

    let table = engine.prediction_table(&dataset, config.analysis.batch_size)?;
    let matrix = ConfusionMatrix::from_table(&table, class_names.len());
    println!("Validation accuracy: {:.2}% ({} images)", matrix.accuracy() * 100.0, table.len());
    print!("{}", matrix.render(&class_names));
    print!("{}", matrix.class_report(&class_names));

    if let Some(path) = &options.csv {
        table.write_csv(path)?;
        info!(path = %path.display(), "prediction table written");
    }

    let selections: Vec<RankedSelection> = match &options.label {
        Some(label) => {
            let target = engine
                .config()
                .label_to_index(label)
                .ok_or_else(|| anyhow::anyhow!("unknown label '{}' (classes: {})", label, class_names.join(", ")))?;
            vec![RankQuery::new(target, options.order, options.only_errors, options.limit)
                .select(&table, &class_names[target])]
        }
        None => {
            let mut selections: Vec<RankedSelection> = standard_queries(class_names.len(), options.limit)
                .into_iter()
                .map(|query| query.select(&table, &class_names[query.target_label]))
                .collect();
            selections.push(least_confident(&table, options.limit));
            selections
        }
    };

    let selections: Vec<RankedImages> = selections
        .iter()
        .map(|selection| selection.with_paths(|index| dataset.item(index).map(|item| item.path.clone())))
        .collect();

    for selection in &selections {
        println!("\n{}", selection.message);
        if selection.images.is_empty() {
            println!("  (none)");
        }
        for (rank, image) in selection.images.iter().enumerate() {
            println!(
                "  {:>3}. {:.4}  predicted {:<8} actual {:<8} {}",
                rank + 1,
                image.record.confidence,
                class_names[image.record.predicted_label],
                class_names[image.record.true_label],
                image.path.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
            );
        }
    }

    if let Some(path) = &options.json {
        std::fs::write(path, serde_json::to_string_pretty(&selections)?)?;
        info!(path = %path.display(), "ranked selections written");
    }
    Ok(())
}

#[cfg(not(feature = "ml"))]
fn train(_config: &AppConfig, _output: &Path) -> Result<()> {
    anyhow::bail!("built without the `ml` feature")
}

#[cfg(not(feature = "ml"))]
fn predict(_config: &AppConfig, _model: &Path, _image: &Path) -> Result<()> {
    anyhow::bail!("built without the `ml` feature")
}

#[cfg(not(feature = "ml"))]
fn analyze(_config: &AppConfig, _model: &Path, _options: &AnalyzeOptions) -> Result<()> {
    anyhow::bail!("built without the `ml` feature")
}

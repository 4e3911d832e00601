//! Keiba CLI - Command-line interface for horse race win predictions

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use keiba::config::PipelineConfig;
use keiba::data::FeedCredentials;
use keiba::pipeline::{Operation, Pipeline, PipelineOutcome, TrainOutcome};
use keiba::RacePrediction;

#[derive(Parser)]
#[command(name = "keiba")]
#[command(author, version, about = "Horse race win probability CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// First race date to ingest (YYYYMMDD)
    #[arg(long, global = true, default_value = "20240101")]
    from_date: String,

    /// Last race date to ingest (YYYYMMDD)
    #[arg(long, global = true, default_value = "20241231")]
    to_date: String,

    /// Model directory [default: $KEIBA_MODEL_DIR or models]
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Data directory holding race_results.csv [default: $KEIBA_DATA_DIR or data]
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Race to predict (defaults to the first race in the range)
    #[arg(long, global = true)]
    race_id: Option<String>,

    /// Data feed software id
    #[arg(long, global = true, default_value = "")]
    software_id: String,

    /// Data feed user id
    #[arg(long, global = true, default_value = "")]
    user_id: String,

    /// Number of trees in the forest
    #[arg(long, global = true)]
    trees: Option<usize>,

    /// Random seed for bootstrap sampling
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Train a model on the date range and save it
    Train,
    /// Predict a race with the saved model
    Predict,
    /// Train, then predict (default)
    All,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Table,
    Json,
}

impl From<Commands> for Operation {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Train => Operation::Train,
            Commands::Predict => Operation::Predict,
            Commands::All => Operation::All,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays clean
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    let operation: Operation = cli.command.unwrap_or(Commands::All).into();
    let config = build_config(&cli);

    if cli.format == OutputFormat::Table {
        println!("{}", "Keiba CLI v0.1.0".cyan().bold());
        println!();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(match operation {
        Operation::Predict => "Predicting...",
        _ => "Training model...",
    });

    let pipeline = Pipeline::from_config(config);
    let outcome = pipeline.run(operation);
    pb.finish_and_clear();
    let outcome = outcome.context("Pipeline run failed")?;

    match cli.format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Table => match &outcome {
            PipelineOutcome::Trained(train) => print_training(train),
            PipelineOutcome::Predicted(prediction) => print_prediction(prediction),
            PipelineOutcome::Both { train, prediction } => {
                print_training(train);
                print_prediction(prediction);
            }
        },
    }

    Ok(())
}

/// Defaults, then environment, then command-line flags
fn build_config(cli: &Cli) -> PipelineConfig {
    let mut config = PipelineConfig::from_env();
    config.from_date = cli.from_date.clone();
    config.to_date = cli.to_date.clone();
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    config.race_id = cli.race_id.clone();
    config.credentials = FeedCredentials {
        software_id: cli.software_id.clone(),
        user_id: cli.user_id.clone(),
    };
    if let Some(trees) = cli.trees {
        config.hyperparameters.forest.n_trees = trees;
    }
    if let Some(seed) = cli.seed {
        config.hyperparameters.forest.seed = seed;
    }
    config
}

fn print_json(outcome: &PipelineOutcome) -> Result<()> {
    let value = match outcome {
        PipelineOutcome::Trained(train) => serde_json::json!({ "training": training_json(train) }),
        PipelineOutcome::Predicted(prediction) => serde_json::json!({ "prediction": prediction }),
        PipelineOutcome::Both { train, prediction } => serde_json::json!({
            "training": training_json(train),
            "prediction": prediction,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn training_json(train: &TrainOutcome) -> serde_json::Value {
    serde_json::json!({
        "artifact_path": train.artifact_path,
        "summary": train.summary,
        "excluded_records": train.report.excluded,
    })
}

fn print_training(train: &TrainOutcome) {
    let summary = &train.summary;

    println!("{}", "学習結果 (Training Summary):".yellow().bold());
    println!("{}", "-".repeat(50));
    println!("  Samples:  {} ({} winners)", summary.samples, summary.positives);
    println!("  Races:    {}", summary.races);
    println!("  Features: {}", summary.features);
    println!("  Trees:    {}", summary.trees);
    if let (Some(from), Some(to)) = (summary.trained_from, summary.trained_to) {
        println!("  Range:    {} - {}", from, to);
    }
    match &summary.cv_auc {
        Some(cv) => println!(
            "  CV ROC-AUC: {:.4} ± {:.4} ({} folds)",
            cv.auc_mean, cv.auc_std, cv.folds
        ),
        None => println!("  CV ROC-AUC: {}", "- (insufficient data)".dimmed()),
    }
    if train.report.excluded > 0 {
        println!(
            "  {}: {} records excluded during validation",
            "Warning".yellow(),
            train.report.excluded
        );
    }
    println!("{}: {}", "Saved".green(), train.artifact_path.display());
    println!();
}

fn print_prediction(prediction: &RacePrediction) {
    println!(
        "{}: {} ({})",
        "Predicting".green(),
        prediction.race_id,
        prediction.race_date.format("%Y-%m-%d")
    );
    println!();

    println!("{}", "勝率予想 (Win Probabilities):".yellow().bold());
    println!(
        "{:>4} {:>4} {:<14} {:<8} {:>7} {:>4} {:>8}",
        "順位", "馬番", "馬名", "騎手", "オッズ", "人気", "勝率"
    );
    println!("{}", "-".repeat(60));

    for runner in &prediction.runners {
        let name = runner.horse_name.as_deref().unwrap_or(&runner.horse_id);
        let prob = format!("{:.1}%", runner.win_probability * 100.0);
        let prob = if runner.prediction_rank == 1 {
            prob.green().bold()
        } else {
            prob.normal()
        };
        println!(
            "{:>4} {:>4} {:<14} {:<8} {:>7.1} {:>4} {:>8}",
            runner.prediction_rank,
            runner.horse_num,
            truncate_name(name, 14),
            runner.jockey_id,
            runner.win_odds,
            runner.popularity,
            prob
        );
    }
    println!();

    let picks = prediction.marked_picks();
    if !picks.is_empty() {
        println!("{}", "印 (Picks):".yellow().bold());
        for (mark, runner) in picks {
            println!(
                "  {} {:>2} {} ({:.1}%)",
                mark,
                runner.horse_num,
                runner.horse_name.as_deref().unwrap_or(&runner.horse_id),
                runner.win_probability * 100.0
            );
        }
        println!();
    }
}

/// Truncate name to fit display width
fn truncate_name(name: &str, max_len: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= max_len {
        name.to_string()
    } else {
        chars[..max_len - 1].iter().collect::<String>() + "…"
    }
}

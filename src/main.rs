use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use mnist_zoo::{
    Evaluation, ExperimentConfig, Misclassification, TrainingHistory, compile, evaluate,
    find_misclassifications, fit, mnist, zoo,
};

/// Train and compare MNIST classifier definitions.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the model variants.
    List,
    /// Print the layer table of a variant.
    Summary {
        /// Variant name, see `list`.
        model: String,
    },
    /// Train a variant on MNIST and evaluate it on the test split.
    Train(TrainArgs),
}

#[derive(Debug, Args)]
struct TrainArgs {
    /// JSON experiment config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    /// Directory with the four MNIST IDX files.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    max_epochs: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Output directory for reports.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Number of misclassified test images to report.
    #[arg(long)]
    misclassified: Option<usize>,
    /// Also write the trained parameters.
    #[arg(long)]
    save_model: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    model: &'a str,
    history: &'a TrainingHistory,
    test: Evaluation,
    misclassified: Vec<Misclassification<'a>>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::List => {
            for def in zoo::all() {
                println!("{:<20}{:>12} params", def.name, def.param_count()?);
            }
        }
        Command::Summary { model } => {
            let def = zoo::by_name(&model)
                .with_context(|| format!("unknown model {model:?}; see `mnist-zoo list`"))?;
            print!("{}", def.summary()?);
        }
        Command::Train(args) => train(args)?,
    }
    Ok(())
}

fn train(args: TrainArgs) -> anyhow::Result<()> {
    let mut cfg = match &args.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ExperimentConfig::default(),
    };
    if let Some(model) = args.model {
        cfg.model = model;
    }
    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir;
    }
    if let Some(n) = args.max_epochs {
        cfg.fit.max_epochs = n;
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }
    if let Some(out) = args.out {
        cfg.output_dir = out;
    }
    if let Some(n) = args.misclassified {
        cfg.misclassified_limit = n;
    }

    let Some(def) = zoo::by_name(&cfg.model) else {
        bail!("unknown model {:?}; see `mnist-zoo list`", cfg.model);
    };
    log::info!("\n{}", def.summary()?);
    let mut model = compile(&def, cfg.seed).with_context(|| format!("compiling {}", def.name))?;

    let (train_raw, test_raw) = mnist::load(&cfg.data_dir)
        .with_context(|| format!("loading MNIST from {}", cfg.data_dir.display()))?;
    let train_set = train_raw.into_dataset()?;
    let test_set = test_raw.into_dataset()?;

    let history = fit(&mut model, &train_set, &cfg.fit)?;
    let test = evaluate(&model, &test_set)?;
    log::info!(
        "test loss {:.4}, test accuracy {:.4}",
        test.loss,
        test.accuracy
    );

    let misclassified: Vec<_> =
        find_misclassifications(&model, &test_set, cfg.misclassified_limit)?.collect();

    let out_dir = cfg.output_dir.join(&def.name);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let report = Report {
        model: &def.name,
        history: &history,
        test,
        misclassified,
    };
    let report_path = out_dir.join("report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("writing {}", report_path.display()))?;
    log::info!("wrote {}", report_path.display());

    if args.save_model {
        let model_path = out_dir.join("model.json");
        model.save_json(&model_path)?;
        log::info!("wrote {}", model_path.display());
    }
    Ok(())
}

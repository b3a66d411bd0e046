//! `vouch` command-line interface.

mod classifier;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vouch_core::{Aggregator, CategorySet, Difficulty, EvaluationBundle, Prediction, ProbeKind};
use vouch_runtime::{
    EvaluationContext, Evaluator, FewShotExample, ProbeSelection, ProviderRegistry, RuntimeConfig,
};

use crate::classifier::GatewayClassifier;

#[derive(Parser, Debug)]
#[command(name = "vouch", version, about = "Label-free evaluation of LLM classifications")]
struct Cli {
    /// Runtime configuration (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG wins when set
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Re-classify one text across temperatures
    Stability {
        /// Item file with `text` and `categories`
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate labeled examples for one category
    Generate {
        /// Category list file
        #[arg(long)]
        categories: PathBuf,
        #[arg(long)]
        category: String,
        #[arg(long)]
        num_examples: Option<usize>,
        /// Comma-separated subset of easy,medium,hard
        #[arg(long, value_delimiter = ',')]
        difficulty: Vec<Difficulty>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate examples for one category and score the classifier on them
    Synthetic {
        #[arg(long)]
        categories: PathBuf,
        #[arg(long)]
        category: String,
        #[arg(long)]
        num_examples: Option<usize>,
        #[arg(long, value_delimiter = ',')]
        difficulty: Vec<Difficulty>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Ask the judge panel to review a prediction
    Judge {
        /// Item file with `text`, `categories` and `prediction`
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the selected probes on a prediction and decide
    Evaluate {
        #[arg(long)]
        input: PathBuf,
        /// Probes to run; all when omitted
        #[arg(long, value_delimiter = ',')]
        probes: Vec<ProbeArg>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Decide from saved reports without calling any model
    Aggregate {
        /// Evaluation bundle file
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Validate the configuration and print it with defaults filled in
    CheckConfig,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProbeArg {
    Stability,
    Synthetic,
    Judge,
}

impl From<ProbeArg> for ProbeKind {
    fn from(arg: ProbeArg) -> Self {
        match arg {
            ProbeArg::Stability => ProbeKind::Stability,
            ProbeArg::Synthetic => ProbeKind::Synthetic,
            ProbeArg::Judge => ProbeKind::Judge,
        }
    }
}

/// One item to evaluate, read from JSON or YAML.
#[derive(Debug, Deserialize)]
struct ItemInput {
    text: String,
    categories: CategorySet,
    #[serde(default)]
    prediction: Option<Prediction>,
    #[serde(default)]
    field_name: Option<String>,
    #[serde(default)]
    few_shot_examples: Vec<FewShotExample>,
    #[serde(default)]
    feedback: Option<String>,
}

impl ItemInput {
    fn prediction(&self) -> Result<&Prediction> {
        self.prediction
            .as_ref()
            .context("input has no `prediction` to evaluate")
    }

    fn context(&self, config: &RuntimeConfig) -> EvaluationContext {
        let mut ctx = EvaluationContext::new()
            .with_classifier_model(config.classifier.model.clone())
            .with_classifier_temperature(config.classifier.temperature)
            .with_few_shot_examples(self.few_shot_examples.clone());
        if let Some(field) = &self.field_name {
            ctx = ctx.with_field_name(field.clone());
        }
        if let Some(feedback) = &self.feedback {
            ctx = ctx.with_feedback(feedback.clone());
        }
        ctx
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::CheckConfig => {
            let registry = ProviderRegistry::with_defaults();
            registry
                .validate(&config.provider.provider_type, &config.provider.options)
                .context("provider options are invalid")?;
            print!("{}", config.to_yaml()?);
        }
        Commands::Aggregate { bundle, out } => {
            let bundle: EvaluationBundle = read_document(&bundle)?;
            let decision = Aggregator::new().decide(&bundle);
            emit(out.as_deref(), &decision)?;
        }
        Commands::Stability { input, out } => {
            let item = read_item(&input)?;
            let evaluator = build_evaluator(config)?;
            let ctx = cancel_on_ctrl_c(item.context(evaluator.config()));
            let stability = &evaluator.config().stability;
            let report = evaluator
                .stability_probe()
                .evaluate(
                    &item.text,
                    &item.categories,
                    &ctx,
                    &stability.temperatures,
                    stability.runs_per_temperature,
                )
                .await
                .context("stability probe failed")?;
            emit(out.as_deref(), &report)?;
        }
        Commands::Generate {
            categories,
            category,
            num_examples,
            difficulty,
            out,
        } => {
            let categories: CategorySet = read_document(&categories)?;
            let evaluator = build_evaluator(config)?;
            let (num_examples, levels) = synthetic_plan(evaluator.config(), num_examples, difficulty);
            let target = categories
                .resolve(&category)
                .with_context(|| format!("category '{}' is not in the category list", category))?;
            let ctx = cancel_on_ctrl_c(EvaluationContext::new());
            let examples = evaluator
                .synthetic_validator()
                .generate(target, num_examples, &levels, &ctx)
                .await
                .context("example generation failed")?;
            emit(out.as_deref(), &examples)?;
        }
        Commands::Synthetic {
            categories,
            category,
            num_examples,
            difficulty,
            out,
        } => {
            let categories: CategorySet = read_document(&categories)?;
            let evaluator = build_evaluator(config)?;
            let (num_examples, levels) = synthetic_plan(evaluator.config(), num_examples, difficulty);
            let ctx = cancel_on_ctrl_c(
                EvaluationContext::new()
                    .with_classifier_model(evaluator.config().classifier.model.clone())
                    .with_classifier_temperature(evaluator.config().classifier.temperature),
            );
            let report = evaluator
                .synthetic_validator()
                .run(&category, &categories, &ctx, num_examples, &levels)
                .await
                .context("synthetic validation failed")?;
            emit(out.as_deref(), &report)?;
        }
        Commands::Judge { input, out } => {
            let item = read_item(&input)?;
            let prediction = item.prediction()?;
            let evaluator = build_evaluator(config)?;
            let ctx = cancel_on_ctrl_c(item.context(evaluator.config()));
            let report = evaluator
                .judge_panel()
                .evaluate(
                    &item.text,
                    prediction,
                    &item.categories,
                    &ctx,
                    &evaluator.config().judges,
                )
                .await
                .context("judge panel failed")?;
            emit(out.as_deref(), &report)?;
        }
        Commands::Evaluate { input, probes, out } => {
            let item = read_item(&input)?;
            let prediction = item.prediction()?;
            let selection = if probes.is_empty() {
                ProbeSelection::all()
            } else {
                let kinds: Vec<ProbeKind> = probes.into_iter().map(ProbeKind::from).collect();
                ProbeSelection::only(&kinds)
            };
            let evaluator = build_evaluator(config)?;
            let ctx = cancel_on_ctrl_c(item.context(evaluator.config()));
            let outcome = evaluator
                .evaluate(&item.text, &item.categories, prediction, &ctx, selection)
                .await
                .context("evaluation failed")?;

            let usage = evaluator.usage();
            tracing::info!(
                total_tokens = usage.total_tokens(),
                calls = usage.total_calls(),
                "Token usage"
            );
            emit(out.as_deref(), &outcome)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn build_evaluator(config: RuntimeConfig) -> Result<Evaluator> {
    let registry = ProviderRegistry::with_defaults();
    let gateway = registry
        .create(&config.provider.provider_type, &config.provider.options)
        .with_context(|| format!("cannot create '{}' provider", config.provider.provider_type))?;
    let classifier = GatewayClassifier::new(
        gateway.clone(),
        config.classifier.clone(),
        config.call_timeout,
    );

    Evaluator::builder()
        .config(config)
        .gateway(gateway)
        .classifier(Arc::new(classifier))
        .build()
        .context("invalid configuration")
}

fn synthetic_plan(
    config: &RuntimeConfig,
    num_examples: Option<usize>,
    difficulty: Vec<Difficulty>,
) -> (usize, Vec<Difficulty>) {
    let levels = if difficulty.is_empty() {
        config.synthetic.difficulty_levels.clone()
    } else {
        difficulty
    };
    (num_examples.unwrap_or(config.synthetic.num_examples), levels)
}

/// Cancel the evaluation on Ctrl-C; nothing partial is printed.
fn cancel_on_ctrl_c(ctx: EvaluationContext) -> EvaluationContext {
    let token = ctx.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling evaluation");
            token.cancel();
        }
    });
    ctx
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("invalid YAML in {}", path.display()))
    }
}

fn emit<T: Serialize>(out: Option<&Path>, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", json)?;
        }
    }
    Ok(())
}

/// Read an item file, rejecting empty text before any model is called.
fn read_item(path: &Path) -> Result<ItemInput> {
    let item: ItemInput = read_document(path)?;
    if item.text.trim().is_empty() {
        bail!("input text in {} is empty", path.display());
    }
    Ok(item)
}

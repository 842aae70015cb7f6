// ========================================================================================
//
//                      COMMAND-LINE DRIVER: LATENTREC
//
// ========================================================================================
//
// Loads a tab-separated event file, fits a latent-factor model and optionally scores a
// query file with it. Models live only for the duration of one invocation.

use clap::{Args, Parser, Subcommand};
use latentrec::data::{EventTable, ScoreDomain};
use latentrec::io::{load_events, load_queries, write_predictions};
use latentrec::metrics::{DescriptiveStatistics, Metrics, ScorePredictionErrors};
use latentrec::model::{LatentFactorModel, ModelConfig, RegularizationScale};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(
    name = "latentrec",
    version,
    about = "Fit latent-factor score predictors to event data",
    long_about = "Fits bias terms plus low-rank latent factors to observed event scores \
                  with BFGS, and predicts scores for arbitrary identifier tuples."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model and optionally predict scores for a query file
    Fit(FitArgs),

    /// Print descriptive statistics of the scores in an event file
    Describe {
        /// Event TSV: identifier columns followed by the score
        events: PathBuf,

        /// Number of identifier columns per event
        #[arg(long, default_value = "2")]
        otypes: usize,
    },
}

#[derive(Args)]
struct FitArgs {
    /// Event TSV: identifier columns followed by the score
    events: PathBuf,

    /// Number of identifier columns per event
    #[arg(long, default_value = "2")]
    otypes: usize,

    /// Factor rank
    #[arg(long, default_value = "2")]
    k: usize,

    /// Regularization strength
    #[arg(long, default_value = "0.01")]
    c: f64,

    /// Lower bound of the score domain
    #[arg(long)]
    score_min: f64,

    /// Upper bound of the score domain
    #[arg(long)]
    score_max: f64,

    /// Gradient-norm tolerance for BFGS
    #[arg(long, default_value = "1e-6")]
    tolerance: f64,

    /// Maximum number of BFGS iterations
    #[arg(long, default_value = "1000")]
    max_iter: usize,

    /// Divide the regularization strength by the number of events
    #[arg(long)]
    per_event_penalty: bool,

    /// Seed for the factor initialization
    #[arg(long, default_value = "24301")]
    seed: u64,

    /// Clamp predictions into the score domain
    #[arg(long)]
    clip: bool,

    /// Query TSV with identifier columns to score after fitting
    #[arg(long, requires = "output")]
    queries: Option<PathBuf>,

    /// Where to write predictions for --queries
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fit(args) => fit_command(&args),
        Commands::Describe { events, otypes } => describe_command(&events, otypes),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn fit_command(args: &FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let regularization = if args.per_event_penalty {
        RegularizationScale::PerEvent
    } else {
        RegularizationScale::Constant
    };
    let config = ModelConfig::new(args.k, args.c)?
        .with_tolerance(args.tolerance)
        .with_max_iterations(args.max_iter)
        .with_regularization(regularization)
        .with_seed(args.seed)
        .with_clip_to_domain(args.clip);
    let mut model = LatentFactorModel::with_config(config)?;

    let raw = load_events(&args.events, args.otypes)?;
    let domain = ScoreDomain::new(args.score_min, args.score_max)?;
    let table = EventTable::ingest(args.otypes, &raw.events, &raw.scores, domain)?;

    let report = model.fit(&table)?.clone();
    let mut report_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(std::io::stdout());
    report_writer.serialize(&report)?;
    report_writer.flush()?;

    let fitted = model.predict_batch(&raw.events)?;
    let errors = ScorePredictionErrors::new(table.scores(), fitted.view())?;
    print_metrics(&errors);

    if let (Some(queries_path), Some(output_path)) = (&args.queries, &args.output) {
        let queries = load_queries(queries_path, args.otypes)?;
        let predictions = model.predict_batch(&queries)?;
        write_predictions(output_path, &queries, &predictions.to_vec())?;
        println!(
            "Wrote {} predictions to {}",
            predictions.len(),
            output_path.display()
        );
    }

    Ok(())
}

fn describe_command(events_path: &Path, n_otypes: usize) -> Result<(), Box<dyn std::error::Error>> {
    let raw = load_events(events_path, n_otypes)?;
    let scores = ndarray::Array1::from_vec(raw.scores.clone());
    print_metrics(&DescriptiveStatistics::with_name(scores.view(), "score")?);

    // The observed range is the tightest domain that admits every score.
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let table = EventTable::ingest(n_otypes, &raw.events, &raw.scores, ScoreDomain::new(min, max)?)?;
    for otype in 0..n_otypes {
        let counts = table.event_counts(otype)?.mapv(|c| c as f64);
        let name = format!("events_per_object_type{otype}");
        print_metrics(&DescriptiveStatistics::with_name(counts.view(), &name)?);
    }
    Ok(())
}

fn print_metrics(metrics: &dyn Metrics) {
    for (name, value) in metrics.fullnames().iter().zip(metrics.values()) {
        println!("{name}\t{value:.6}");
    }
}

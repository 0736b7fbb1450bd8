use clap::{Args, Parser, Subcommand, ValueHint};
use disagg_config::tracing::{flush_chrome_trace, init_tracing};
use disagg_config::ExperimentConfig;
use disagg_nn::ExperimentRunner;
use std::error::Error;
use std::path::PathBuf;
use tracing::info;

type DynError = Box<dyn Error>;

type Result<T> = std::result::Result<T, DynError>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Train and evaluate hierarchical disaggregation models"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train every level pair and supplement portion, checkpointing the best epoch
    Train(TrainArgs),

    /// Reload checkpoints and write de-normalised test losses as CSV
    Infer(InferArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Experiment configuration (JSON)
    #[arg(value_hint = ValueHint::FilePath)]
    config: PathBuf,
}

#[derive(Args)]
struct InferArgs {
    /// Experiment configuration (JSON)
    #[arg(value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Override the CSV destination from the configuration
    #[arg(long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

fn main() {
    let result = try_main();
    flush_chrome_trace();
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;
    match &cli.command {
        Command::Train(args) => {
            let runner = ExperimentRunner::new(ExperimentConfig::load(&args.config)?)?;
            for report in runner.train()? {
                info!(
                    coarse = %report.coarse,
                    fine = %report.fine,
                    portion = report.portion,
                    epochs = report.epochs_run,
                    best_val_loss = report.best_val_loss,
                    stopped_early = report.stopped_early,
                    checkpoint = %report.checkpoint.display(),
                    "variant trained"
                );
            }
            Ok(())
        }
        Command::Infer(args) => {
            let runner = ExperimentRunner::new(infer_config(args)?)?;
            let table = runner.infer_to_csv()?;
            print!("{}", table.to_csv());
            Ok(())
        }
    }
}

fn infer_config(args: &InferArgs) -> Result<ExperimentConfig> {
    let mut config = ExperimentConfig::load(&args.config)?;
    if let Some(output) = &args.output {
        config.output_path = output.clone();
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_rejects_the_output_flag() {
        assert!(Cli::try_parse_from(["disagg", "train", "exp.json"]).is_ok());
        assert!(Cli::try_parse_from(["disagg", "train", "exp.json", "--output", "out.csv"]).is_err());
    }

    #[test]
    fn infer_accepts_an_output_override() {
        let cli = Cli::try_parse_from(["disagg", "infer", "exp.json", "--output", "out.csv"]).unwrap();
        match cli.command {
            Command::Infer(args) => {
                assert_eq!(args.config, PathBuf::from("exp.json"));
                assert_eq!(args.output, Some(PathBuf::from("out.csv")));
            }
            Command::Train(_) => panic!("expected the infer subcommand"),
        }
    }
}

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use chrono::NaiveDate;
use clap::Parser;
use stanza::renderer::console::Console;
use stanza::renderer::Renderer;
use tracing::{debug, info};

use furlong::batch::{BatchOptions, Engine};
use furlong::data::RaceStore;
use furlong::model;
use furlong::report;

#[derive(Debug, clap::Parser, Clone)]
struct Args {
    /// directory to source the race data from
    dir: Option<PathBuf>,

    /// first date to predict (defaults to the earliest date in the dataset)
    #[clap(short = 'f', long)]
    from: Option<NaiveDate>,

    /// last date to predict (defaults to the latest date in the dataset)
    #[clap(short = 't', long)]
    to: Option<NaiveDate>,

    /// number of worker threads
    #[clap(short = 'w', long, default_value_t = 4)]
    workers: usize,

    /// seed for the train/held-out partition, for reproducible runs
    #[clap(long)]
    rand_seed: Option<u64>,

    /// file to write the CSV report to
    #[clap(short = 'o', long)]
    output: Option<PathBuf>,

    /// log warnings and errors only
    #[clap(short = 'q', long)]
    quiet: bool,

    /// log detailed diagnostics
    #[clap(short = 'v', long)]
    verbose: bool,
}
impl Args {
    fn validate(&self) -> anyhow::Result<()> {
        self.dir
            .as_ref()
            .ok_or(anyhow!("data directory must be specified"))?;
        if self.workers == 0 {
            return Err(anyhow!("at least one worker is required"));
        }
        if self.quiet && self.verbose {
            return Err(anyhow!("quiet and verbose are mutually exclusive"));
        }
        Ok(())
    }
}

fn filter_level(args: &Args) -> &'static str {
    if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    args.validate()?;
    if env::var("RUST_BACKTRACE").is_err() {
        env::set_var("RUST_BACKTRACE", "full")
    }
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", filter_level(&args))
    }
    tracing_subscriber::fmt::init();
    debug!("args: {args:?}");

    let races = Arc::new(RaceStore::read_from_dir(args.dir.unwrap())?);
    if races.is_empty() {
        return Err(anyhow!("no race files found").into());
    }
    info!("loaded {} races", races.len());

    let date_from = args.from.or(races.earliest_date()).unwrap();
    let date_to = args.to.or(races.latest_date()).unwrap();
    let rand_seed = args
        .rand_seed
        .unwrap_or_else(|| SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64);

    let engine = Engine::new(races, model::default_fitters(), rand_seed);
    let summary = engine.process_dates(&BatchOptions {
        workers: args.workers,
        date_from,
        date_to,
    })?;
    info!(
        "{} predictions, {} failures",
        summary.predictions.len(),
        summary.failures
    );

    if let Some(output) = &args.output {
        report::write_csv(output, &summary.predictions)?;
        info!("report written to {}", output.display());
    }
    println!(
        "{}",
        Console::default().render(&report::summary_table(&summary.predictions))
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from([&["predict", "data"], extra].concat())
    }

    #[test]
    fn quiet_and_verbose_adjust_the_default_filter() {
        assert_eq!("info", filter_level(&args(&[])));
        assert_eq!("warn", filter_level(&args(&["-q"])));
        assert_eq!("debug", filter_level(&args(&["-v"])));
    }

    #[test]
    fn quiet_with_verbose_is_rejected() {
        assert!(args(&["-q"]).validate().is_ok());
        assert!(args(&["-v"]).validate().is_ok());
        assert!(args(&["-q", "-v"]).validate().is_err());
    }
}

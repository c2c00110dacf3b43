//! Reweight a finished run into evidence, information, and a posterior.

use anyhow::bail;
use clap::Parser;
use log::warn;
use std::path::PathBuf;

use rdnest::models::{Rosenbrock, SpikeSlab, StraightLine};
use rdnest::{postprocess, PostprocessOptions};

#[derive(Parser)]
#[command(
    name = "postprocess",
    about = "Compute evidence and a resampled posterior from a finished run."
)]
struct Args {
    /// Likelihood temperature
    #[arg(short = 't', long = "temperature", default_value_t = 1.0)]
    temperature: f64,

    /// ABC mode: flatten the likelihood above a mass quantile
    #[arg(short = 'a', long = "abc")]
    abc: bool,

    /// Fraction of particles discarded in ABC mode
    #[arg(short = 'f', long = "abc-fraction", default_value_t = 0.8)]
    abc_fraction: f64,

    /// Model the run used: spike_slab, rosenbrock, or straight_line
    #[arg(short, long, default_value = "spike_slab")]
    model: String,

    /// Output directory holding the run's database
    #[arg(long, default_value = "output")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let args = Args::parse();
    if args.abc && args.temperature != 1.0 {
        warn!("Temperature option has no effect in ABC mode.");
    }
    if !args.abc && args.abc_fraction != 0.8 {
        warn!("abc_fraction only has an effect in ABC mode.");
    }

    let options = PostprocessOptions {
        temperature: args.temperature,
        abc: args.abc,
        abc_fraction: args.abc_fraction,
    };

    let results = match args.model.as_str() {
        "spike_slab" => postprocess::<SpikeSlab, _>(&args.output, &options)?,
        "rosenbrock" => postprocess::<Rosenbrock, _>(&args.output, &options)?,
        "straight_line" => {
            postprocess::<StraightLine, _>(&args.output, &options)?
        }
        other => bail!("unknown model '{}'", other),
    };

    println!("logz = {:.12}", results.logz);
    println!("info = {:.12} nats", results.info);
    println!("ess  = {:.12}", results.ess);
    Ok(())
}

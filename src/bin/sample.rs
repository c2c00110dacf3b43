//! Run the sampler on one of the built-in models.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};

use rdnest::models::{Rosenbrock, SpikeSlab, StraightLine};
use rdnest::{clear_output_dir, Database, Model, Options, Sampler};

#[derive(Parser)]
#[command(
    name = "sample",
    about = "Run the Diffusive Nested Sampler on a built-in model."
)]
struct Args {
    /// Path to the YAML options file
    #[arg(short, long, default_value = "options.yaml")]
    options: PathBuf,

    /// Model to sample: spike_slab, rosenbrock, or straight_line
    #[arg(short, long, default_value = "spike_slab")]
    model: String,

    /// Output directory for the run's database
    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// Data file of (x, y) rows for the straight_line model
    #[arg(long)]
    data: Option<PathBuf>,
}

fn run<M: Model>(options: Options, output: &Path) -> anyhow::Result<()> {
    let database = Database::create(output)?;
    let mut sampler = Sampler::<M>::new(options, database)?;
    sampler.run()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let args = Args::parse();
    let options = Options::load(&args.options)
        .with_context(|| format!("loading {}", args.options.display()))?;
    clear_output_dir(&args.output)?;

    match args.model.as_str() {
        "spike_slab" => run::<SpikeSlab>(options, &args.output),
        "rosenbrock" => run::<Rosenbrock>(options, &args.output),
        "straight_line" => {
            let data = args
                .data
                .context("--data <file> is required for straight_line")?;
            StraightLine::load_data(&data)?;
            run::<StraightLine>(options, &args.output)
        }
        other => bail!("unknown model '{}'", other),
    }
}

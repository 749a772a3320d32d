use clap::{Parser, Subcommand};

use ertcore::algorithm::temporal::TimeQuery;
use ertcore::data::survey::{DEFAULT_RHOA_MAX, DEFAULT_RHOA_MIN, FilterParams};
use erttl::data::dataset::TimelapseDataset;
use erttl::error::Result;

#[derive(Parser)]
#[command(name = "erttl", version, about = "Time-lapse ERT dataset management")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a dataset summary.
    Info {
        /// Data container path, `*` patterns merge several surveys.
        path: String,
    },
    /// List the time axis with column indices.
    Times {
        path: String,
    },
    /// Remove timesteps and/or high-geometric-factor quadrupoles.
    Filter {
        path: String,
        /// First timestep to keep (index or timestamp).
        #[arg(long)]
        tmin: Option<String>,
        /// End of the kept range, exclusive (index or timestamp).
        #[arg(long)]
        tmax: Option<String>,
        /// Keep only quadrupoles with |k| below this factor.
        #[arg(long)]
        kmax: Option<f64>,
        /// Base name to save under (default: overwrite in place).
        #[arg(long)]
        out: Option<String>,
    },
    /// Report how many readings fall outside the given bounds.
    Mask {
        path: String,
        #[arg(long, default_value_t = DEFAULT_RHOA_MIN)]
        rmin: f64,
        #[arg(long, default_value_t = DEFAULT_RHOA_MAX)]
        rmax: f64,
        /// Maximum relative error to accept.
        #[arg(long)]
        emax: Option<f64>,
    },
}

/// Integer arguments address columns directly, anything else is a
/// timestamp.
fn parse_query(text: &str) -> TimeQuery {
    match text.parse::<usize>() {
        Ok(index) => TimeQuery::Index(index),
        Err(_) => TimeQuery::Text(text.to_string()),
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Info { path } => {
            let dataset = TimelapseDataset::load(&path)?;
            println!("{dataset}");
            println!(
                "masked entries: {} of {}",
                dataset.survey().n_masked(),
                dataset.survey().values().len()
            );
        }
        Command::Times { path } => {
            let dataset = TimelapseDataset::load(&path)?;
            for (index, time) in dataset.survey().times().iter().enumerate() {
                println!("{index:4}  {time}");
            }
        }
        Command::Filter { path, tmin, tmax, kmax, out } => {
            let mut dataset = TimelapseDataset::load(&path)?;
            let params = FilterParams {
                tmin: tmin.as_deref().map(parse_query),
                tmax: tmax.as_deref().map(parse_query),
                kmax,
                ..Default::default()
            };
            dataset.filter(&params)?;
            println!("{dataset}");
            dataset.save(out.as_deref())?;
        }
        Command::Mask { path, rmin, rmax, emax } => {
            let mut dataset = TimelapseDataset::load(&path)?;
            dataset.mask(rmin, rmax, emax);
            println!(
                "masked entries: {} of {}",
                dataset.survey().n_masked(),
                dataset.survey().values().len()
            );
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

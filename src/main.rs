use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use dpclone::SamplerSettings;

#[derive(Debug, Parser)]
#[clap(name = "dpclone")]
#[clap(
    about = "Infer tumor clonal population structure from allele counts with a Dirichlet process mixture.",
    long_about = None
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a fresh analysis on a tab-delimited counts file.
    #[clap(arg_required_else_help = true)]
    Run {
        /// input path for the counts file
        #[clap(short, long, value_parser, required = true)]
        input: PathBuf,

        /// directory holding the persistent analysis state
        #[clap(short, long, value_parser, required = true)]
        out_dir: PathBuf,

        /// number of Gibbs iterations
        #[clap(short, long, value_parser, default_value_t = 10_000)]
        num_iters: u64,

        /// iterations to discard before recording
        #[clap(short, long, value_parser, default_value_t = 0)]
        burnin: u64,

        /// record every thin-th post-burn-in iteration
        #[clap(short, long, value_parser, default_value_t = 1)]
        thin: u64,

        /// chain generator seed
        #[clap(short, long, value_parser, default_value_t = 0)]
        seed: u64,
    },

    /// Continue a checkpointed analysis.
    #[clap(arg_required_else_help = true)]
    Restart {
        /// directory holding the persistent analysis state
        #[clap(short, long, value_parser, required = true)]
        out_dir: PathBuf,

        /// number of further Gibbs iterations
        #[clap(short, long, value_parser, required = true)]
        num_iters: u64,
    },

    /// Write posterior summary tables from an analysis.
    #[clap(arg_required_else_help = true)]
    Write {
        /// directory holding the persistent analysis state
        #[clap(short, long, value_parser, required = true)]
        analysis_dir: PathBuf,

        /// directory receiving the summary tables
        #[clap(short, long, value_parser, required = true)]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Cli::parse();
    match args.command {
        Commands::Run {
            input,
            out_dir,
            num_iters,
            burnin,
            thin,
            seed,
        } => {
            let settings = SamplerSettings {
                burnin,
                thin,
                seed,
                ..SamplerSettings::default()
            };
            dpclone::run(&input, &out_dir, num_iters, settings)?;
        }
        Commands::Restart { out_dir, num_iters } => {
            dpclone::restart(&out_dir, num_iters)?;
        }
        Commands::Write {
            analysis_dir,
            out_dir,
        } => {
            dpclone::write_results(&analysis_dir, &out_dir)?;
        }
    }
    Ok(())
}

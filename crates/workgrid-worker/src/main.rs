//! The stock workgrid worker binary.
//!
//! Serves the coordination primitives and task lifecycle with an empty
//! function registry. Deployments that run tasks embed `workgrid_worker`
//! as a library, register their functions, and use this file as the
//! template for their own binary.

use clap::Parser;
use tracing::{debug, level_filters::LevelFilter};

use workgrid_worker::args::Args;
use workgrid_worker::registry::TaskRegistry;
use workgrid_worker::{runner, server};

fn main() {
    let registry = TaskRegistry::new();
    // Task children re-enter this binary; nothing below runs for them.
    if runner::run_if_task_child(&registry) {
        return;
    }

    let args = Args::parse();
    enable_logging(&args);
    debug!("{args:?}");

    let config = match args.worker_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = server::serve(config, &registry) {
        eprintln!("worker failed: {e}");
        std::process::exit(1);
    }
}

fn enable_logging(args: &Args) {
    let level = if args.quiet {
        LevelFilter::ERROR
    } else {
        match args.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

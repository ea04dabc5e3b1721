//! clusterenv - conda environments and SLURM jobs for GPU clusters.

mod commands;
mod logging;

use camino::Utf8Path;
use clap::Parser;
use clusterenv_cli::error::EXIT_VALIDATION;
use clusterenv_cli::{Args, CliError, Config, ConfigError};
use clusterenv_conda::SearchRoots;
use clusterenv_conda::locate::{expand_home, home_dir};
use clusterenv_parsers::SystemRunner;
use commands::App;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // --help and --version also arrive here
            let code = if err.use_stderr() { EXIT_VALIDATION } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    logging::init(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    let roots = search_roots(&config);
    tracing::debug!("conda search roots: {:?}", roots.roots());

    let app = App::new(config, roots, SystemRunner)?;
    app.run(args.command, &mut std::io::stdout()).await
}

fn load_config(explicit: Option<&Utf8Path>) -> Result<Config, ConfigError> {
    match explicit {
        // A file named on the command line has to exist.
        Some(path) if !path.exists() => Err(ConfigError::Io {
            path: path.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        }),
        Some(path) => Config::load(path),
        None => match Config::default_path() {
            Some(path) => Config::load(&path),
            None => Ok(Config::default()),
        },
    }
}

fn search_roots(config: &Config) -> SearchRoots {
    let roots = SearchRoots::from_env();
    let home = home_dir();
    match config
        .conda_root
        .as_ref()
        .and_then(|root| expand_home(root.as_str(), home.as_deref()))
    {
        Some(root) => roots.with_priority(root),
        None => roots,
    }
}

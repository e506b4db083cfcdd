use clap::Parser;
use kibertas::cli::error::CliError;
use kibertas::cli::{Cli, run};
use kibertas::http::tls::install_rustls_default_crypto_provider;
use kibertas::logging::{effective_level, try_init};
use std::process::ExitCode;
use tracing::{debug, error};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = try_init(effective_level(cli.log_level, cli.debug)) {
        eprintln!("Failed to initialize logging: {err}");
        return CliError::from(err).into();
    }
    if cli.debug {
        debug!("debug mode enabled");
    }

    debug!("Installing default rustls crypto provider");
    install_rustls_default_crypto_provider();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("error: {err}");
            err.into()
        }
    }
}

//! CLI intake for the server binary.
//!
//! The binary takes either no arguments (configuration comes from
//! `config.ini` in the working directory) or exactly four positionals
//! overriding the listen endpoint and thread count. Validation of the
//! argument count lives in `config::ServerConfig::resolve` so both forms
//! share one error path.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "facestream",
    version,
    about = "UltraFace MJPEG inference server"
)]
pub struct Cli {
    /// Optional positional overrides: <address> <port> <working_dir> <threads>
    pub overrides: Vec<String>,
}

/// Parse the command line, keeping argument errors on the exit-1 path.
///
/// Help and version requests print and exit 0 here; real argument errors
/// surface as `Err` so `main` reports them like any other startup failure.
pub fn parse_args() -> anyhow::Result<Cli> {
    match Cli::try_parse() {
        Ok(cli) => Ok(cli),
        Err(err) if err.use_stderr() => Err(anyhow::anyhow!(err.to_string())),
        Err(err) => err.exit(),
    }
}

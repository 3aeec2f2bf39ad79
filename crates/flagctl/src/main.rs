use anyhow::{Context, Result};
use clap::Parser;
use flagctl::{App, Cli, FlagctlConfig};
use flagstack::FlagError;
use serde_json::json;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = FlagctlConfig::resolve(cli.config.clone(), cli.state.clone())
        .context("failed to load flagctl configuration")?;
    let app = App::open(&config).context("failed to open flag state")?;

    match app.execute(&cli.command, &cli.actor()) {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => match e.downcast_ref::<FlagError>() {
            // Engine errors are reported on stdout as structured JSON.
            Some(flag_err) => {
                let body = json!({
                    "status": flag_err.status_code(),
                    "error": flag_err.to_structured(),
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
                std::process::exit(if flag_err.is_retryable() { 75 } else { 1 });
            }
            None => Err(e),
        },
    }
}

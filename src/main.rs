#![allow(clippy::result_large_err)]

use anyhow::Context;
use steward::config::StewardConfig;
use steward::telemetry;

enum CliCommand {
    Run { config_path: Option<String> },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args()? {
        CliCommand::Run { config_path } => {
            let config = StewardConfig::load_from(config_path.as_deref())
                .context("failed to load configuration")?;

            let app = steward::app::StewardApp::initialise(config)
                .context("failed to construct application")?;

            app.run().await.context("application runtime error")
        }
        CliCommand::Help => {
            print_help();
            Ok(())
        }
    }
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(value);
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run { config_path })
}

fn print_help() {
    println!(
        "\
Usage: steward [OPTIONS]

Options:
  -c, --config <PATH>    Path to the steward configuration file
  -h, --help             Print this help message
"
    );
}

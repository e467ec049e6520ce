use clap::Parser;
use std::io::Write;
use toutsurmoneau::config::cli::{prompt, prompt_password};
use toutsurmoneau::config::{Command, OutputFormat};
use toutsurmoneau::core::client::providers;
use toutsurmoneau::core::WaterPortal;
use toutsurmoneau::domain::model::ConsumptionSnapshot;
use toutsurmoneau::utils::{logger, validation::Validate};
use toutsurmoneau::{CliConfig, ClientOptions, SuezClient, TsmeError};

#[tokio::main]
async fn main() {
    let mut config = CliConfig::parse();

    logger::init_cli_logger(config.verbose);
    tracing::debug!("CLI command: {:?}", config.command);

    if let Err(e) = run(&mut config).await {
        tracing::error!(
            "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
            format!("{:?}", config.command).to_lowercase(),
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(e.exit_code().max(1));
    }
}

async fn run(config: &mut CliConfig) -> Result<(), TsmeError> {
    config.validate()?;

    if config.command == Command::Providers {
        println!("Available providers are: {:?}", providers());
        return Ok(());
    }

    if config.command.needs_credentials() {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stderr();
        if config.username.is_none() {
            config.username = prompt(&mut input, &mut output, "Username", None)?;
        }
        if config.password.is_none() {
            config.password = prompt_password("Password", None)?;
        }
    }

    let username = config
        .username
        .clone()
        .ok_or_else(|| TsmeError::MissingConfigError {
            field: "username".to_string(),
        })?;
    let password = config
        .password
        .clone()
        .ok_or_else(|| TsmeError::MissingConfigError {
            field: "password".to_string(),
        })?;

    let options = ClientOptions {
        base_url: config.base_url.clone(),
        timeout: config.timeout.map(std::time::Duration::from_secs),
    };
    let client = SuezClient::new(
        username,
        password,
        config.counter_id.clone(),
        config.provider.clone(),
        &options,
    )?;

    match config.command {
        Command::Check => {
            println!("Checking credentials....");
            let passed = client.check_credentials().await?;
            println!("{}", if passed { "Pass!" } else { "Error" });
        }
        Command::Show => {
            eprintln!("Getting updates....");
            let snapshot = client.update().await?;
            print_snapshot(&snapshot, config.format)?;
        }
        Command::Providers => unreachable!("handled above"),
    }
    Ok(())
}

fn print_snapshot(snapshot: &ConsumptionSnapshot, format: OutputFormat) -> Result<(), TsmeError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, snapshot)?;
            writeln!(out)?;
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            writer.write_record(["period", "label", "delta", "total"])?;
            let periods = [
                ("this_month", &snapshot.this_month),
                ("prev_month", &snapshot.prev_month),
                ("history", &snapshot.history),
            ];
            for (period, rows) in periods {
                for (label, consumption) in rows {
                    let delta = consumption.delta.to_string();
                    let total = consumption.total.to_string();
                    writer.write_record([period, label.as_str(), delta.as_str(), total.as_str()])?;
                }
            }
            writer.flush()?;
        }
        OutputFormat::Text => {
            writeln!(out, "counter_id={}", snapshot.counter_id)?;
            writeln!(out, "last_known={}", snapshot.last_known)?;
            writeln!(
                out,
                "last=(delta={}, total={}) uptodate={}",
                snapshot.last.delta, snapshot.last.total, snapshot.uptodate
            )?;
            for (name, rows) in [
                ("this_month", &snapshot.this_month),
                ("prev_month", &snapshot.prev_month),
                ("history", &snapshot.history),
            ] {
                writeln!(out, "{}:", name)?;
                for (label, consumption) in rows {
                    writeln!(out, "  {:<16} {:>10.3} {:>12.3}", label, consumption.delta, consumption.total)?;
                }
            }
            writeln!(out, "this_year_overall={}", snapshot.this_year_overall)?;
            writeln!(out, "last_year_overall={}", snapshot.last_year_overall)?;
            writeln!(out, "highest_monthly={}", snapshot.highest_monthly)?;
            writeln!(out, "{}", snapshot.attribution)?;
        }
    }
    Ok(())
}

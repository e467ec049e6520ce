use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use toutsurmoneau::config::cli::{prompt, prompt_password};
use toutsurmoneau::config::flow::{FlowResult, FormInput, SchemaField, SuezConfigFlow, SuezOptionsFlow};
use toutsurmoneau::core::StatePublisher;
use toutsurmoneau::domain::model::CONF_PASSWORD;
use toutsurmoneau::utils::{logger, validation::Validate};
use toutsurmoneau::{
    BridgeConfig, ConfigEntries, HomeAssistantClient, Integration, LocalStorage, LogPublisher,
    TsmeError,
};

#[derive(Parser)]
#[command(name = "tsme-bridge")]
#[command(about = "Publish Tout sur mon eau readings to Home Assistant")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "tsme-bridge.toml")]
    config: String,

    /// Log states instead of sending them to Home Assistant
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<BridgeCommand>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum BridgeCommand {
    /// Poll the portal and publish sensors until interrupted (default)
    Run {
        /// Poll once, publish, and exit
        #[arg(long)]
        once: bool,
    },
    /// Create the config entry interactively
    Configure,
    /// Change the options of the config entry interactively
    Options,
    /// Delete the config entry
    Remove,
    /// List config entries
    Status,
}

type Store = ConfigEntries<LocalStorage>;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match BridgeConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    logger::init_daemon_logger(&config.logging.level, config.logging.json);

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(1);
    }

    let command = args.command.unwrap_or(BridgeCommand::Run { once: false });
    if let Err(e) = dispatch(&config, command, args.dry_run).await {
        tracing::error!(
            "❌ tsme-bridge failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(e.exit_code().max(1));
    }
}

async fn dispatch(config: &BridgeConfig, command: BridgeCommand, dry_run: bool) -> Result<(), TsmeError> {
    let storage = LocalStorage::new(".".to_string());
    let mut store = ConfigEntries::load(storage, config.storage.entries_path.clone()).await?;

    match command {
        BridgeCommand::Run { once } => {
            if dry_run || config.home_assistant.is_none() {
                if !dry_run {
                    tracing::warn!("No [home_assistant] section, states only go to the log");
                }
                run(config, &mut store, Arc::new(LogPublisher), once).await
            } else {
                let ha = config
                    .home_assistant
                    .as_ref()
                    .ok_or_else(|| TsmeError::MissingConfigError {
                        field: "home_assistant".to_string(),
                    })?;
                let publisher = HomeAssistantClient::new(
                    &ha.url,
                    ha.token.clone(),
                    ha.timeout_seconds.map(std::time::Duration::from_secs),
                )?;
                run(config, &mut store, Arc::new(publisher), once).await
            }
        }
        BridgeCommand::Configure => configure(config, &mut store).await,
        BridgeCommand::Options => options(&mut store).await,
        BridgeCommand::Remove => {
            let ids: Vec<String> = store.entries().iter().map(|e| e.entry_id.clone()).collect();
            for entry_id in ids {
                let entry = store.remove(&entry_id).await?;
                println!("Removed {} ({})", entry.entry_id, entry.title);
            }
            Ok(())
        }
        BridgeCommand::Status => {
            if store.entries().is_empty() {
                println!("No config entry; run 'tsme-bridge configure'");
            }
            for entry in store.entries() {
                let config = entry.entry_config()?;
                println!(
                    "{}  {}  counter={}  user={}  provider={}  options={}",
                    entry.entry_id,
                    entry.title,
                    config.counter_id.as_deref().unwrap_or("-"),
                    config.username,
                    config.provider.as_deref().unwrap_or("toutsurmoneau"),
                    entry.options.len()
                );
            }
            Ok(())
        }
    }
}

/// Imports `[account]` through the config flow when nothing is configured yet.
async fn import_account(config: &BridgeConfig, store: &mut Store) -> Result<(), TsmeError> {
    let Some(input) = config.account_input() else {
        return Ok(());
    };
    if !store.entries().is_empty() {
        return Ok(());
    }
    tracing::info!("Importing [account] from the configuration file");
    let mut flow = SuezConfigFlow::new(config.client_options());
    let result = flow.step_user(store, Some(input)).await?;
    match &result {
        FlowResult::CreateEntry { .. } => {
            if let Some(entry) = flow.into_entry(&result) {
                store.add(entry).await?;
            }
            Ok(())
        }
        FlowResult::ShowForm { errors, .. } => Err(TsmeError::config(format!(
            "cannot import [account]: {}",
            errors.values().cloned().collect::<Vec<_>>().join(", ")
        ))),
        FlowResult::Abort { reason } => {
            tracing::info!("Import aborted: {}", reason);
            Ok(())
        }
    }
}

async fn run<H: StatePublisher + 'static>(
    config: &BridgeConfig,
    store: &mut Store,
    publisher: Arc<H>,
    once: bool,
) -> Result<(), TsmeError> {
    import_account(config, store).await?;
    if store.entries().is_empty() {
        return Err(TsmeError::EntryNotFoundError {
            entry_id: "toutsurmoneau".to_string(),
        });
    }

    let mut integration =
        Integration::new(publisher, config.client_options()).with_update_interval(config.update_interval());
    let mut events = store.subscribe();
    for entry in store.entries() {
        if let Err(e) = integration.setup_entry(entry).await {
            tracing::error!("❌ Cannot set up entry {}: {}", entry.entry_id, e);
        }
    }
    tracing::info!("✅ {} entry(ies) loaded", store.entries().len());

    if once {
        integration.shutdown().await;
        return Ok(());
    }

    #[cfg(unix)]
    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

    loop {
        #[cfg(unix)]
        let reload = hangup.recv();
        #[cfg(not(unix))]
        let reload = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            _ = reload => {
                tracing::info!("SIGHUP: reloading config entries");
                if let Err(e) = store.reload().await {
                    tracing::error!("❌ Cannot reload config entries: {}", e);
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = integration.handle_entry_event(&event, store).await {
                        tracing::error!("❌ Cannot apply {:?}: {}", event, e);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("{} entry events missed", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    integration.shutdown().await;
    Ok(())
}

fn ask_form(schema: &[SchemaField]) -> Result<FormInput, TsmeError> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stderr();
    let mut answers = FormInput::new();
    for field in schema {
        let label = match &field.choices {
            Some(choices) => format!("{} ({})", field.key, choices.join(" | ")),
            None => field.key.to_string(),
        };
        let default = field.default.as_deref();
        let answer = if field.key == CONF_PASSWORD {
            prompt_password(&label, default)?
        } else {
            prompt(&mut input, &mut output, &label, default)?
        };
        if let Some(value) = answer {
            answers.insert(field.key.to_string(), value);
        }
    }
    Ok(answers)
}

async fn configure(config: &BridgeConfig, store: &mut Store) -> Result<(), TsmeError> {
    let mut flow = SuezConfigFlow::new(config.client_options());
    let mut result = flow.step_user(store, None).await?;
    loop {
        match &result {
            FlowResult::Abort { reason } => {
                println!("Aborted: {}", reason);
                return Ok(());
            }
            FlowResult::ShowForm { schema, errors, .. } => {
                for (field, error) in errors {
                    eprintln!("⚠️  {}: {}", field, error);
                }
                let answers = ask_form(schema)?;
                result = flow.step_configure(Some(answers)).await?;
            }
            FlowResult::CreateEntry { title, .. } => {
                let title = title.clone();
                if let Some(entry) = flow.into_entry(&result) {
                    store.add(entry).await?;
                }
                println!("✅ Created entry '{}'", title);
                return Ok(());
            }
        }
    }
}

async fn options(store: &mut Store) -> Result<(), TsmeError> {
    let Some(entry) = store.entries().first().cloned() else {
        return Err(TsmeError::EntryNotFoundError {
            entry_id: "toutsurmoneau".to_string(),
        });
    };
    let flow = SuezOptionsFlow::new(&entry);
    let mut result = flow.step_init(None)?;
    loop {
        match result {
            FlowResult::ShowForm { schema, errors, .. } => {
                for (field, error) in errors {
                    eprintln!("⚠️  {}: {}", field, error);
                }
                let answers = ask_form(&schema)?;
                result = flow.step_init(Some(answers))?;
            }
            FlowResult::CreateEntry { data, .. } => {
                store.update_options(&entry.entry_id, data).await?;
                println!("✅ Options saved; send SIGHUP to a running bridge to apply them");
                return Ok(());
            }
            FlowResult::Abort { reason } => {
                println!("Aborted: {}", reason);
                return Ok(());
            }
        }
    }
}

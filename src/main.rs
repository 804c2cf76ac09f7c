use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use botgate::tg_api::TgApi;
use botgate::{Bot, Config, Result, server};

#[derive(Parser)]
#[command(name = "botgate", version, about = "Telegram bot gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Register the webhook with the platform
    WebhookSet,
    /// Delete the registered webhook
    WebhookDel,
    /// Show the current webhook state
    WebhookInfo,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("botgate=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("botgate: {e}");
            return ExitCode::FAILURE;
        }
    };

    let res = match cli.command {
        Some(command) => webhook_op(&cfg, &command),
        None => serve(cfg),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("botgate: {e}");
            ExitCode::FAILURE
        }
    }
}

fn webhook_op(cfg: &Config, command: &Command) -> Result<()> {
    let api = TgApi::new(cfg.base_api())?;
    let result = match command {
        Command::WebhookSet => {
            tracing::info!(url = %format!("{}{}", cfg.hook_url, cfg.hook_path), "setting webhook");
            api.webhook_set(&cfg.hook_url, &cfg.hook_path, &cfg.api_secret)?
        }
        Command::WebhookDel => {
            tracing::info!("deleting webhook");
            api.webhook_del()?
        }
        Command::WebhookInfo => api.webhook_info()?,
    };

    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    Ok(())
}

fn serve(cfg: Config) -> Result<()> {
    cfg.dump();

    let listener = server::bind(&cfg.listen_host, cfg.listen_port)?;
    let bot = Arc::new(Bot::new(cfg)?);

    let res = server::run(bot.clone(), listener, Arc::new(tokio::sync::Notify::new()));
    bot.shutdown();
    res
}

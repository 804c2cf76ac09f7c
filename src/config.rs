use std::env;
use std::path::PathBuf;

use crate::{Error, Result};

const ENV_PREFIX: &str = "BOTGATE_";

pub const DEF_LISTEN_HOST: &str = "127.0.0.1";
pub const DEF_LISTEN_PORT: u16 = 22224;
pub const DEF_WORKER_THREADS: usize = 4;
pub const DEF_WORKER_JOBS_MIN: usize = 8;
pub const DEF_WORKER_JOBS_MAX: usize = 1024;
pub const DEF_DB_FILE: &str = "./db.sqlite";
pub const DEF_DB_POOL_SIZE: usize = 16;
pub const DEF_CMD_PATH: &str = "./extern";
pub const DEF_CMD_LOG_FILE: &str = "./extern/log.txt";
pub const DEF_TELEGRAM_API: &str = "https://api.telegram.org/bot";

/// Environment variable names exported to external command handlers.
pub const ENV_ROOT_DIR: &str = "ROOT_DIR";
pub const ENV_TELEGRAM_API: &str = "TG_API";
pub const ENV_TELEGRAM_SECRET: &str = "TG_API_SECRET_KEY";
pub const ENV_CMD_PATH: &str = "CMD_PATH";
pub const ENV_OWNER_ID: &str = "OWNER_ID";
pub const ENV_BOT_ID: &str = "BOT_ID";
pub const ENV_BOT_USERNAME: &str = "BOT_USERNAME";
pub const ENV_DB_PATH: &str = "DB_PATH";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub api_secret: String,
    /// Public host the webhook is registered under, e.g. `https://bot.example.org`.
    pub hook_url: String,
    /// Request path the platform posts updates to, e.g. `/hook`.
    pub hook_path: String,
    pub bot_id: i64,
    pub owner_id: i64,
    pub bot_username: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub worker_threads_num: usize,
    pub worker_jobs_min: usize,
    pub worker_jobs_max: usize,
    pub db_file: PathBuf,
    pub db_pool_size: usize,
    pub cmd_path: PathBuf,
    pub cmd_log_file: PathBuf,
    /// Import the parent environment verbatim into external handlers.
    /// Off by default: handlers see only the curated variables.
    pub cmd_import_env: bool,
    /// Telegram API root; overridable so tests can point at a local mock.
    pub api_url: String,
}

impl Config {
    /// Loads the configuration from `BOTGATE_*` environment variables.
    /// The token and the webhook secret are removed from the process
    /// environment once read so they are not inherited by spawned handlers.
    pub fn from_env() -> Result<Self> {
        let api_token = take_secret("API_TOKEN")?;
        let api_secret = take_secret("API_SECRET")?;

        let hook_url = required("HOOK_URL")?;
        let hook_path = required("HOOK_PATH")?;
        let bot_id = required_id("BOT_ID")?;
        let owner_id = required_id("OWNER_ID")?;
        let bot_username = required("BOT_USERNAME")?;

        Ok(Self {
            api_token,
            api_secret,
            hook_url,
            hook_path,
            bot_id,
            owner_id,
            bot_username,
            listen_host: optional("LISTEN_HOST").unwrap_or_else(|| DEF_LISTEN_HOST.to_string()),
            listen_port: parsed("LISTEN_PORT", DEF_LISTEN_PORT)?,
            worker_threads_num: parsed("WORKER_THREADS_NUM", DEF_WORKER_THREADS)?,
            worker_jobs_min: parsed("WORKER_JOBS_MIN", DEF_WORKER_JOBS_MIN)?,
            worker_jobs_max: parsed("WORKER_JOBS_MAX", DEF_WORKER_JOBS_MAX)?,
            db_file: optional("DB_FILE").unwrap_or_else(|| DEF_DB_FILE.to_string()).into(),
            db_pool_size: parsed("DB_POOL_SIZE", DEF_DB_POOL_SIZE)?,
            cmd_path: optional("CMD_PATH").unwrap_or_else(|| DEF_CMD_PATH.to_string()).into(),
            cmd_log_file: optional("CMD_LOG_FILE")
                .unwrap_or_else(|| DEF_CMD_LOG_FILE.to_string())
                .into(),
            cmd_import_env: flag("CMD_IMPORT_ENV", false),
            api_url: optional("API_URL").unwrap_or_else(|| DEF_TELEGRAM_API.to_string()),
        })
    }

    /// Full API base: `<api_url><token>`.
    pub fn base_api(&self) -> String {
        format!("{}{}", self.api_url, self.api_token)
    }

    /// Webhook host as matched against the `Host` header: the configured
    /// hook URL with any `https://` prefix stripped.
    pub fn hook_host(&self) -> &str {
        self.hook_url.strip_prefix("https://").unwrap_or(&self.hook_url)
    }

    /// Curated environment passed to external command handlers.
    pub fn child_env(&self) -> Vec<(String, String)> {
        let root_dir = env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".to_string());

        vec![
            (ENV_ROOT_DIR.into(), root_dir),
            (ENV_TELEGRAM_API.into(), self.base_api()),
            (ENV_TELEGRAM_SECRET.into(), self.api_secret.clone()),
            (ENV_CMD_PATH.into(), self.cmd_path.display().to_string()),
            (ENV_OWNER_ID.into(), self.owner_id.to_string()),
            (ENV_BOT_ID.into(), self.bot_id.to_string()),
            (ENV_BOT_USERNAME.into(), self.bot_username.clone()),
            (ENV_DB_PATH.into(), self.db_file.display().to_string()),
        ]
    }

    /// Startup dump. Secrets are masked.
    pub fn dump(&self) {
        println!("---[CONFIG]---");
        println!("Api Token        : *****************");
        println!("Api Secret       : *****************");
        println!("Hook URL         : {}{}", self.hook_url, self.hook_path);
        println!("Listen Host      : {}", self.listen_host);
        println!("Listen Port      : {}", self.listen_port);
        println!("Worker Threads   : {}", self.worker_threads_num);
        println!("Worker Jobs Min  : {}", self.worker_jobs_min);
        println!("Worker Jobs Max  : {}", self.worker_jobs_max);
        println!("Db File          : {}", self.db_file.display());
        println!("Db Pool Size     : {}", self.db_pool_size);
        println!("Owner ID         : {}", self.owner_id);
        println!("Bot ID           : {}", self.bot_id);
        println!("Bot Username     : {}", self.bot_username);
        println!("External cmd path: {}", self.cmd_path.display());
        println!("Import parent env: {}", self.cmd_import_env);
        println!("---[CONFIG]---");
    }
}

fn var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok().filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String> {
    var(name).ok_or_else(|| Error::Config(format!("missing {ENV_PREFIX}{name}")))
}

fn required_id(name: &str) -> Result<i64> {
    let raw = required(name)?;
    match raw.parse::<i64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(Error::Config(format!("invalid {ENV_PREFIX}{name}: {raw:?}"))),
    }
}

fn optional(name: &str) -> Option<String> {
    var(name)
}

fn flag(name: &str, default: bool) -> bool {
    match var(name) {
        None => default,
        Some(raw) => raw != "0" && raw.to_lowercase() != "false",
    }
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid {ENV_PREFIX}{name}: {raw:?}"))),
    }
}

fn take_secret(name: &str) -> Result<String> {
    let value = required(name)?;
    // SAFETY: called from `main` before any other thread exists.
    unsafe { env::remove_var(format!("{ENV_PREFIX}{name}")) };
    Ok(value)
}

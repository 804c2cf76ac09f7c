pub mod chld;
pub mod cmd;
pub mod config;
pub mod db;
pub mod models;
pub mod pager;
pub mod sched;
pub mod server;
pub mod tg;
pub mod tg_api;
pub mod update;
pub mod worker;

use std::sync::atomic::AtomicBool;

pub use config::Config;

/// Crate-wide error type. Per-update failures are contained by the worker
/// job that carries them; only startup errors propagate out of `main`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),
    #[error("database: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("telegram api: {0}")]
    Api(String),
    #[error("job queue is full")]
    QueueFull,
    #[error("worker pool is shut down")]
    PoolClosed,
    #[error("child process table is full")]
    ChldFull,
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Process-wide singletons, built once by the bootstrap and shared by
/// reference. Construction order matters: the command registry probes the
/// database for name collisions, so the pool must exist first.
pub struct Bot {
    pub cfg: Config,
    pub db: db::Db,
    pub api: tg_api::TgApi,
    pub chld: chld::Chld,
    pub workers: worker::WorkerPool,
    pub commands: cmd::Registry,
    pub sched_ready: AtomicBool,
}

impl Bot {
    pub fn new(cfg: Config) -> Result<Self> {
        let db = db::Db::open(&cfg.db_file, cfg.db_pool_size)?;
        let api = tg_api::TgApi::new(cfg.base_api())?;
        let chld = chld::Chld::new(
            &cfg.cmd_path,
            &cfg.cmd_log_file,
            cfg.child_env(),
            cfg.cmd_import_env,
        )?;
        let workers = worker::WorkerPool::new(
            cfg.worker_threads_num,
            cfg.worker_jobs_min,
            cfg.worker_jobs_max,
        )?;
        let commands = cmd::Registry::new(&db)?;

        Ok(Self {
            cfg,
            db,
            api,
            chld,
            workers,
            commands,
            sched_ready: AtomicBool::new(true),
        })
    }

    /// Drains the worker pool, then waits for every live child process.
    pub fn shutdown(&self) {
        self.workers.shutdown();
        self.chld.wait_all();
    }
}

//! Supervisor for external command handlers. Keeps a bounded table of live
//! children, spawns under a mutex and reaps without blocking; the ingress
//! loop calls `reap` on its 1-second tick.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use crate::{Error, Result};

/// Upper bound on live, unreaped children.
pub const DEFAULT_CAPACITY: usize = 256;

pub struct Chld {
    dir: PathBuf,
    log_file: PathBuf,
    envs: Vec<(String, String)>,
    capacity: usize,
    table: Mutex<Vec<Child>>,
}

impl Chld {
    pub fn new(
        dir: &Path,
        log_file: &Path,
        envs: Vec<(String, String)>,
        import_env: bool,
    ) -> Result<Self> {
        Self::with_capacity(dir, log_file, envs, import_env, DEFAULT_CAPACITY)
    }

    /// The handler environment is fixed here: the curated variables, laid
    /// over a verbatim copy of the parent environment when `import_env` is
    /// set, or over nothing at all when it is not.
    pub fn with_capacity(
        dir: &Path,
        log_file: &Path,
        envs: Vec<(String, String)>,
        import_env: bool,
        capacity: usize,
    ) -> Result<Self> {
        if let Some(parent) = log_file.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut table_envs: Vec<(String, String)> =
            if import_env { std::env::vars().collect() } else { Vec::new() };
        table_envs.extend(envs);

        Ok(Self {
            dir: dir.to_path_buf(),
            log_file: log_file.to_path_buf(),
            envs: table_envs,
            capacity,
            table: Mutex::new(Vec::with_capacity(capacity)),
        })
    }

    /// Spawns `dir/file` with the given arguments. Children get exactly
    /// the environment fixed at initialization; stdout and stderr are
    /// appended to the handler log file. Fails with `ChldFull` when the
    /// table is at capacity.
    pub fn spawn(&self, file: &str, args: &[String]) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if table.len() >= self.capacity {
            return Err(Error::ChldFull);
        }

        let path = self.dir.join(file);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;

        let child = Command::new(&path)
            .args(args)
            .env_clear()
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()?;

        tracing::info!(pid = child.id(), path = %path.display(), "spawned handler");
        table.push(child);
        Ok(())
    }

    /// Non-blocking sweep: frees the slots of every finished child. Exit
    /// codes are not interpreted.
    pub fn reap(&self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.retain_mut(|child| match child.try_wait() {
            Ok(Some(_)) => {
                tracing::debug!(pid = child.id(), "reaped handler");
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(pid = child.id(), error = %e, "wait failed, dropping slot");
                false
            }
        });
    }

    /// Blocks until every live child has exited. Called once at shutdown.
    pub fn wait_all(&self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        for child in table.iter_mut() {
            tracing::info!(pid = child.id(), "waiting for handler");
            if let Err(e) = child.wait() {
                tracing::warn!(pid = child.id(), error = %e, "wait failed");
            }
        }

        table.clear();
    }

    /// Number of live, unreaped children.
    pub fn live(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

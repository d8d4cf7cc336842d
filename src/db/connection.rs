use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

/// How long a statement waits on a lock held by another process (e.g. a
/// second `obserk history` while `obserk run` is writing).
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(Job),
    Close,
}

struct Worker {
    requests: mpsc::Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Worker {
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        // Requests already queued still run before Close is seen.
        let _ = self.requests.send(Request::Close);

        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("session store worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Session store shutdown failed: {err:#}");
        }
    }
}

/// SQLite-backed session store. The connection lives on one worker thread;
/// clones share it and their requests run in submission order.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    /// Opens (creating if needed) and migrates the store at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = open_store(db_path)?;

        let (requests, inbox) = mpsc::channel::<Request>();
        let thread = thread::Builder::new()
            .name("obserk-db".into())
            .spawn(move || serve(conn, inbox))
            .context("failed to spawn session store worker")?;

        info!("Session store ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                requests,
                thread: Mutex::new(Some(thread)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Drains queued requests and stops the worker. Later calls on any clone
    /// fail with a "closed" error.
    pub fn close(&self) -> Result<()> {
        self.worker.close()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.worker.closed.load(Ordering::SeqCst) {
            bail!("session store is closed");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .requests
            .send(Request::Run(job))
            .map_err(|_| anyhow!("session store is closed"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("session store worker dropped the request"))?
    }
}

fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open session store {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set session store busy timeout")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("Session store stays in rollback-journal mode: {err}");
    }

    run_migrations(&mut conn)
        .with_context(|| format!("failed to migrate session store {}", path.display()))?;
    Ok(conn)
}

fn serve(mut conn: Connection, inbox: mpsc::Receiver<Request>) {
    while let Ok(request) = inbox.recv() {
        match request {
            Request::Run(job) => job(&mut conn),
            Request::Close => break,
        }
    }
    info!("Session store worker stopped");
}

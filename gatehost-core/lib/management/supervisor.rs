//! Worker process lifecycle management.
//!
//! The supervisor exclusively owns the in-memory table mapping instance
//! identifiers to live process handles. All state transitions between the
//! table and the persisted status are linearized through each child's own
//! exit event: a watcher task per child removes the handle, classifies the
//! exit, and either persists `stopped` or routes the exit to the bounded
//! crash-restart policy.
//!
//! Intentional stops set a flag on the handle before the graceful signal is
//! sent, so a stop requested by a caller is never misclassified as a crash
//! even when the worker exits with a non-zero status.

use std::{
    collections::HashMap,
    io::SeekFrom,
    os::unix::process::ExitStatusExt,
    process::{ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use gatehost_utils::EULA_FILENAME;
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use sqlx::{Pool, Sqlite};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    sync::{mpsc, Notify},
    time::timeout,
};

use crate::{
    management::{db, home::GatehostHome},
    models::{InstanceStatus, LiveStatus},
    GatehostError, GatehostResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Number of automatic restarts attempted after consecutive crashes.
const MAX_CRASH_RETRIES: u32 = 3;

/// How much of the end of a log sink is returned by [`Supervisor::logs`].
const LOG_TAIL_BYTES: u64 = 50 * 1024;

/// Sentinel returned when an instance's log sink does not exist yet.
const LOGS_NOT_AVAILABLE: &str = "Logs are not available yet.";

/// Content the acceptance file is forced to before every start.
const EULA_ACCEPTED: &str = "eula=true";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Timer settings of the supervisor. Tests shrink these.
#[derive(Debug, Clone)]
pub struct SupervisorTiming {
    /// Delay before a crashed worker is started again.
    pub crash_backoff: Duration,

    /// How long `stop_and_wait` waits for a graceful exit before sending
    /// SIGKILL.
    pub stop_timeout: Duration,

    /// Settle delay between the stop and start halves of a restart.
    pub restart_settle: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            crash_backoff: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
            restart_settle: Duration::from_secs(2),
        }
    }
}

/// A live worker process tracked by the supervisor.
struct Handle {
    pid: u32,

    /// Standard input of the worker, for `send_command`.
    stdin: Option<ChildStdin>,

    /// Set before a graceful stop so the exit watcher skips crash handling.
    intentional: Arc<AtomicBool>,

    /// Notified by the exit watcher once the handle has been removed and the
    /// status persisted.
    exit: Arc<Notify>,
}

struct Inner {
    pool: Pool<Sqlite>,
    home: GatehostHome,
    timing: SupervisorTiming,
    handles: tokio::sync::Mutex<HashMap<String, Handle>>,
    retries: Mutex<HashMap<String, u32>>,

    /// Crash restarts are requested through this channel and executed by a
    /// background task, never from within the exit watcher itself.
    restart_tx: mpsc::UnboundedSender<String>,
}

/// Supervises the worker processes of all registered instances.
///
/// The handle table is owned exclusively by this type; other components only
/// observe worker state through the registry or through these methods.
/// Cloning is cheap and yields a handle onto the same supervisor.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Supervisor {
    /// Creates a supervisor with production timings.
    pub fn new(pool: Pool<Sqlite>, home: GatehostHome) -> Self {
        Self::with_timing(pool, home, SupervisorTiming::default())
    }

    /// Creates a supervisor with explicit timings.
    ///
    /// Must be called from within a tokio runtime; the supervisor spawns its
    /// crash-restart task on creation.
    pub fn with_timing(pool: Pool<Sqlite>, home: GatehostHome, timing: SupervisorTiming) -> Self {
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            pool,
            home,
            timing,
            handles: tokio::sync::Mutex::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
            restart_tx,
        });

        tokio::spawn(restart_loop(Arc::downgrade(&inner), restart_rx));

        Self { inner }
    }

    /// Starts the worker process of an instance.
    ///
    /// Idempotent: when a live handle already exists the current pid is
    /// returned without spawning a duplicate. The handle table lock is held
    /// from the existence check until the new handle is recorded, so
    /// concurrent calls for the same instance cannot double-spawn.
    pub async fn start(&self, uuid: &str) -> GatehostResult<u32> {
        let mut handles = self.inner.handles.lock().await;
        if let Some(handle) = handles.get(uuid) {
            return Ok(handle.pid);
        }

        let instance = db::get_instance(&self.inner.pool, uuid)
            .await?
            .ok_or_else(|| GatehostError::InstanceNotFound(uuid.to_string()))?;

        let instance_dir = self.inner.home.instance_dir(&instance.name);

        // The worker refuses to boot without an accepted license file, so it
        // is re-asserted before every spawn.
        fs::write(instance_dir.join(EULA_FILENAME), EULA_ACCEPTED).await?;

        let log_sink = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.inner.home.instance_log(uuid))
            .await?;
        let log_sink = Arc::new(tokio::sync::Mutex::new(log_sink));

        let command_line = instance.start_command.replace("{jar}", &instance.jar_file);
        let mut parts = command_line.split_whitespace();
        let executable = parts
            .next()
            .ok_or_else(|| GatehostError::InvalidStartCommand(command_line.clone()))?;

        let mut child = Command::new(executable)
            .args(parts)
            .current_dir(&instance_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id().unwrap_or(0);
        tracing::info!(
            "starting instance {} (uuid: {}) on port {} with pid {}",
            instance.name,
            uuid,
            instance.port,
            pid
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(tee_stream(stdout, log_sink.clone(), instance.name.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(tee_stream(stderr, log_sink.clone(), instance.name.clone()));
        }

        let stdin = child.stdin.take();
        let intentional = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(Notify::new());

        tokio::spawn(watch_exit(
            self.clone(),
            child,
            uuid.to_string(),
            instance.name.clone(),
            intentional.clone(),
            exit.clone(),
        ));

        handles.insert(
            uuid.to_string(),
            Handle {
                pid,
                stdin,
                intentional,
                exit,
            },
        );

        // Persist the transition while the table lock is still held. The exit
        // watcher takes the same lock before writing its own status, so even
        // a worker that exits instantly cannot have `stopped` overwritten by
        // a stale `running`.
        db::update_instance_status(&self.inner.pool, uuid, InstanceStatus::Running, Some(pid))
            .await?;
        drop(handles);

        Ok(pid)
    }

    /// Sends a graceful termination signal to an instance's worker, without
    /// waiting for it to exit. A no-op when the instance is not running.
    ///
    /// Always resets the crash-retry counter, so a pending crash cycle never
    /// restarts a server the caller intentionally stopped.
    pub async fn stop(&self, uuid: &str) {
        self.reset_retries(uuid);

        let handles = self.inner.handles.lock().await;
        if let Some(handle) = handles.get(uuid) {
            handle.intentional.store(true, Ordering::SeqCst);
            send_signal(handle.pid, Signal::SIGTERM);
        }
    }

    /// Stops an instance's worker and returns only once it has exited, or
    /// once the stop timeout elapses, after which SIGKILL is sent and the
    /// call returns regardless.
    pub async fn stop_and_wait(&self, uuid: &str) -> GatehostResult<()> {
        self.reset_retries(uuid);

        let handles = self.inner.handles.lock().await;
        let Some(handle) = handles.get(uuid) else {
            return Ok(());
        };

        let pid = handle.pid;
        let exit = handle.exit.clone();
        handle.intentional.store(true, Ordering::SeqCst);

        // Register interest in the exit notification while still holding the
        // handle table lock; the watcher removes the handle under the same
        // lock, so the notification cannot be missed.
        let notified = exit.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        drop(handles);

        send_signal(pid, Signal::SIGTERM);

        if timeout(self.inner.timing.stop_timeout, notified).await.is_err() {
            tracing::warn!(
                "instance {} did not exit within {:?}, sending SIGKILL",
                uuid,
                self.inner.timing.stop_timeout
            );
            send_signal(pid, Signal::SIGKILL);
        }

        Ok(())
    }

    /// Restarts an instance: stop-and-wait, a short settle, then start.
    pub async fn restart(&self, uuid: &str) -> GatehostResult<u32> {
        self.stop_and_wait(uuid).await?;
        tokio::time::sleep(self.inner.timing.restart_settle).await;
        self.start(uuid).await
    }

    /// Writes a line to the running worker's standard input.
    pub async fn send_command(&self, uuid: &str, line: &str) -> GatehostResult<()> {
        let mut handles = self.inner.handles.lock().await;
        let stdin = handles
            .get_mut(uuid)
            .and_then(|handle| handle.stdin.as_mut())
            .ok_or_else(|| GatehostError::NotRunning(uuid.to_string()))?;

        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    /// Returns the tail of an instance's log sink, or a sentinel message when
    /// the instance has never produced logs.
    pub async fn logs(&self, uuid: &str) -> GatehostResult<String> {
        let log_path = self.inner.home.instance_log(uuid);
        if !log_path.exists() {
            return Ok(LOGS_NOT_AVAILABLE.to_string());
        }

        let mut file = File::open(&log_path).await?;
        let len = file.metadata().await?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES)))
            .await?;

        let mut tail = Vec::new();
        file.read_to_end(&mut tail).await?;

        Ok(String::from_utf8_lossy(&tail).into_owned())
    }

    /// Reports whether a live handle exists for the instance, and its pid.
    pub async fn live_status(&self, uuid: &str) -> LiveStatus {
        let handles = self.inner.handles.lock().await;
        let handle = handles.get(uuid);

        LiveStatus {
            uuid: uuid.to_string(),
            running: handle.is_some(),
            pid: handle.map(|handle| handle.pid),
        }
    }

    /// Identifiers of all instances with a live handle.
    pub async fn running_instances(&self) -> Vec<String> {
        self.inner.handles.lock().await.keys().cloned().collect()
    }

    //----------------------------------------------------------------------------------------------
    // Methods: Helpers
    //----------------------------------------------------------------------------------------------

    /// Applies the bounded restart policy after a non-clean exit.
    async fn handle_crash(&self, uuid: &str, name: &str) {
        let attempt = {
            let mut retries = self.inner.retries.lock().expect("retry table poisoned");
            let counter = retries.entry(uuid.to_string()).or_insert(0);
            if *counter < MAX_CRASH_RETRIES {
                *counter += 1;
                Some(*counter)
            } else {
                *counter = 0;
                None
            }
        };

        match attempt {
            Some(attempt) => {
                tracing::warn!(
                    "instance {} crashed, restart attempt {}/{} in {:?}",
                    name,
                    attempt,
                    MAX_CRASH_RETRIES,
                    self.inner.timing.crash_backoff
                );

                if let Err(e) = db::update_instance_status(
                    &self.inner.pool,
                    uuid,
                    InstanceStatus::Restarting,
                    None,
                )
                .await
                {
                    tracing::error!("failed to persist restarting status for {}: {}", uuid, e);
                }

                let _ = self.inner.restart_tx.send(uuid.to_string());
            }
            None => {
                tracing::error!(
                    "instance {} crashed {} times in a row, giving up",
                    name,
                    MAX_CRASH_RETRIES
                );

                if let Err(e) = db::update_instance_status(
                    &self.inner.pool,
                    uuid,
                    InstanceStatus::Crashed,
                    None,
                )
                .await
                {
                    tracing::error!("failed to persist crashed status for {}: {}", uuid, e);
                }
            }
        }
    }

    fn reset_retries(&self, uuid: &str) {
        self.inner
            .retries
            .lock()
            .expect("retry table poisoned")
            .insert(uuid.to_string(), 0);
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Drains crash-restart requests, waiting out the backoff before each start.
/// Holds only a weak reference so a dropped supervisor ends the loop.
async fn restart_loop(weak: Weak<Inner>, mut requests: mpsc::UnboundedReceiver<String>) {
    while let Some(uuid) = requests.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };

        let supervisor = Supervisor { inner };
        tokio::spawn(async move {
            tokio::time::sleep(supervisor.inner.timing.crash_backoff).await;
            if let Err(e) = supervisor.start(&uuid).await {
                tracing::error!("failed to restart instance {}: {}", uuid, e);
            }
        });
    }
}

/// Waits for a child to exit, removes its handle, and classifies the exit.
/// Clean exits persist `stopped`; everything else goes through the crash
/// policy. Nothing propagates to whoever triggered the spawn.
async fn watch_exit(
    supervisor: Supervisor,
    mut child: Child,
    uuid: String,
    name: String,
    intentional: Arc<AtomicBool>,
    exit: Arc<Notify>,
) {
    let status = child.wait().await;

    let clean = intentional.load(Ordering::SeqCst)
        || status.as_ref().map_or(false, is_clean_exit);

    match &status {
        Ok(status) => tracing::info!("instance {} exited with {}", name, status),
        Err(e) => tracing::error!("failed to await instance {}: {}", name, e),
    }

    // Handle removal and the status write happen under one hold of the table
    // lock, so they are atomic with respect to `start`'s own insert-and-write
    // in either direction.
    let mut handles = supervisor.inner.handles.lock().await;
    handles.remove(&uuid);

    if clean {
        supervisor.reset_retries(&uuid);
        if let Err(e) =
            db::update_instance_status(&supervisor.inner.pool, &uuid, InstanceStatus::Stopped, None)
                .await
        {
            tracing::error!("failed to persist stopped status for {}: {}", uuid, e);
        }
    } else {
        supervisor.handle_crash(&uuid, &name).await;
    }
    drop(handles);

    exit.notify_waiters();
}

/// A zero exit status or termination by the supervisor's own graceful-stop
/// signal counts as clean.
fn is_clean_exit(status: &ExitStatus) -> bool {
    status.code() == Some(0) || status.signal() == Some(Signal::SIGTERM as i32)
}

/// Delivers a signal to a pid, ignoring already-gone processes.
fn send_signal(pid: u32, signal: Signal) {
    match signal::kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!("failed to send {} to pid {}: {}", signal, pid, e),
    }
}

/// Copies a child output stream line by line into the shared log sink and
/// the parent's own output.
async fn tee_stream(
    stream: impl tokio::io::AsyncRead + Unpin,
    log_sink: Arc<tokio::sync::Mutex<File>>,
    name: String,
) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "worker", "[{}] {}", name, line);
        let mut sink = log_sink.lock().await;
        if sink.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        let _ = sink.write_all(b"\n").await;
    }

    let mut sink = log_sink.lock().await;
    let _ = sink.flush().await;
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

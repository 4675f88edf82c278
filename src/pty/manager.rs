use super::{Backend, BackendError, BackendResult};
use crate::app::Action;
use crate::models::{TabRole, TermSize, TerminalId};
use futures::future::{BoxFuture, FutureExt};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
#[cfg(unix)]
use std::time::Instant;
use tokio::sync::mpsc;

/// What to run behind a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            program: program.into(),
            args,
            cwd,
            env: Vec::new(),
        }
    }
}

pub struct PtyHandle {
    pub master: Box<dyn MasterPty + Send>,
    pub child_killer: Box<dyn ChildKiller + Send + Sync>,
    pub process_id: Option<u32>,
    pub writer: Box<dyn Write + Send>,
    pub generation: u64,
}

impl PtyHandle {
    pub fn send_input(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    pub fn resize(&self, size: TermSize) -> anyhow::Result<()> {
        self.master.resize(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
    }

    pub fn kill(&mut self) -> anyhow::Result<()> {
        self.kill_process_group()
    }

    /// SIGINT the process group, escalating to SIGKILL after `grace`.
    pub fn interrupt_then_kill(&mut self, grace: Duration) -> anyhow::Result<()> {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.process_group_id() {
                if signal_process_group(pgid, libc::SIGINT).is_err() {
                    self.child_killer.kill()?;
                    return Ok(());
                }

                let start = Instant::now();
                while start.elapsed() < grace {
                    if !process_group_alive(pgid) {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }

                let _ = signal_process_group(pgid, libc::SIGKILL);
                return Ok(());
            }
        }

        #[cfg(not(unix))]
        let _ = grace;

        self.child_killer.kill()?;
        Ok(())
    }

    #[cfg(unix)]
    fn process_group_id(&self) -> Option<libc::pid_t> {
        self.process_id
            .filter(|pid| *pid > 0)
            .map(|pid| pid as libc::pid_t)
    }

    #[cfg(unix)]
    fn kill_process_group(&mut self) -> anyhow::Result<()> {
        // portable-pty calls setsid() on spawn, so pid == pgid for the child.
        if let Some(pgid) = self.process_group_id() {
            if signal_process_group(pgid, libc::SIGKILL).is_ok() {
                return Ok(());
            }
        }
        self.child_killer.kill()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn kill_process_group(&mut self) -> anyhow::Result<()> {
        self.child_killer.kill()?;
        Ok(())
    }
}

#[cfg(unix)]
fn signal_process_group(pgid: libc::pid_t, signal: i32) -> std::io::Result<()> {
    let result = unsafe { libc::kill(-pgid, signal) };
    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(unix)]
fn process_group_alive(pgid: libc::pid_t) -> bool {
    let result = unsafe { libc::kill(-pgid, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    launches: Mutex<HashMap<TerminalId, LaunchSpec>>,
    handles: Mutex<HashMap<TerminalId, PtyHandle>>,
    // Output sequence numbers keep counting across restarts of one terminal.
    sequences: Mutex<HashMap<TerminalId, Arc<AtomicU64>>>,
    generations: AtomicU64,
    pty_tx: mpsc::Sender<Action>,
}

/// `Backend` that runs each terminal's process in a local PTY.
///
/// Output is delivered as `Action::PtyOutput` on the channel given to `new`,
/// process exit as `Action::SessionExited`.
#[derive(Clone)]
pub struct PtyBackend {
    inner: Arc<Inner>,
}

impl PtyBackend {
    pub fn new(pty_tx: mpsc::Sender<Action>) -> Self {
        Self {
            inner: Arc::new(Inner {
                launches: Mutex::new(HashMap::new()),
                handles: Mutex::new(HashMap::new()),
                sequences: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                pty_tx,
            }),
        }
    }

    /// Record what a later start for `terminal_id` launches.
    pub fn register(&self, terminal_id: &TerminalId, spec: LaunchSpec) {
        lock(&self.inner.launches).insert(terminal_id.clone(), spec);
    }

    #[cfg(test)]
    fn is_running(&self, terminal_id: &TerminalId) -> bool {
        lock(&self.inner.handles).contains_key(terminal_id)
    }

    /// Drop the handle of an exited process; ignores exits of older processes.
    pub fn reap(&self, terminal_id: &TerminalId, generation: u64) -> bool {
        let mut handles = lock(&self.inner.handles);
        match handles.get(terminal_id) {
            Some(handle) if handle.generation == generation => {
                handles.remove(terminal_id);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    fn current_generation(&self, terminal_id: &TerminalId) -> Option<u64> {
        lock(&self.inner.handles).get(terminal_id).map(|h| h.generation)
    }

    /// Stop the process behind `terminal_id`, giving it `grace` to exit.
    pub fn stop(&self, terminal_id: &TerminalId, grace: Duration) -> BoxFuture<'static, BackendResult> {
        let handle = lock(&self.inner.handles).remove(terminal_id);
        let id = terminal_id.clone();
        async move {
            let Some(mut handle) = handle else {
                return Ok(());
            };
            tokio::task::spawn_blocking(move || handle.interrupt_then_kill(grace))
                .await
                .map_err(|e| BackendError::Pty(e.to_string()))?
                .map_err(|e| BackendError::Pty(format!("{:#}", e)))?;
            tracing::debug!(terminal = %id, "Stopped terminal process");
            Ok(())
        }
        .boxed()
    }

    /// Stop the process and forget its launch command.
    pub fn forget(&self, terminal_id: &TerminalId) -> BoxFuture<'static, BackendResult> {
        lock(&self.inner.launches).remove(terminal_id);
        lock(&self.inner.sequences).remove(terminal_id);
        self.stop(terminal_id, Duration::from_millis(500))
    }

    /// Kill every process immediately (shutdown path).
    pub fn kill_all(&self) {
        for (id, mut handle) in lock(&self.inner.handles).drain() {
            if let Err(e) = handle.kill() {
                tracing::warn!(terminal = %id, "Failed to kill terminal process: {:#}", e);
            }
        }
    }

    fn start(&self, terminal_id: &TerminalId, size: TermSize, role: TabRole) -> BoxFuture<'static, BackendResult> {
        let inner = Arc::clone(&self.inner);
        let id = terminal_id.clone();
        async move {
            let spec = lock(&inner.launches)
                .get(&id)
                .cloned()
                .ok_or_else(|| BackendError::NotRegistered(id.clone()))?;
            if lock(&inner.handles).contains_key(&id) {
                tracing::debug!(terminal = %id, "Process already running");
                return Ok(());
            }

            let generation = inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
            let sequence = Arc::clone(
                lock(&inner.sequences)
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(AtomicU64::new(0))),
            );
            let pty_tx = inner.pty_tx.clone();
            let spawn_id = id.clone();
            let handle = tokio::task::spawn_blocking(move || {
                spawn_process(&spawn_id, &spec, size, role, generation, sequence, pty_tx)
            })
            .await
            .map_err(|e| BackendError::Pty(e.to_string()))??;

            tracing::info!(terminal = %id, pid = ?handle.process_id, %size, "Started terminal process");
            lock(&inner.handles).insert(id, handle);
            Ok(())
        }
        .boxed()
    }
}

impl Backend for PtyBackend {
    fn start_session_agent(&self, session_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult> {
        self.start(session_id, size, TabRole::Session)
    }

    fn start_orchestrator(&self, terminal_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult> {
        self.start(terminal_id, size, TabRole::Orchestrator)
    }

    fn write(&self, terminal_id: &TerminalId, data: Vec<u8>) -> BoxFuture<'static, BackendResult> {
        let result = match lock(&self.inner.handles).get_mut(terminal_id) {
            Some(handle) => handle.send_input(&data).map_err(BackendError::from),
            None => Err(BackendError::NotRunning(terminal_id.clone())),
        };
        futures::future::ready(result).boxed()
    }

    fn resize(&self, terminal_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult> {
        let result = match lock(&self.inner.handles).get(terminal_id) {
            Some(handle) => handle
                .resize(size)
                .map_err(|e| BackendError::Pty(format!("{:#}", e))),
            None => Err(BackendError::NotRunning(terminal_id.clone())),
        };
        futures::future::ready(result).boxed()
    }
}

fn spawn_process(
    terminal_id: &TerminalId,
    spec: &LaunchSpec,
    size: TermSize,
    role: TabRole,
    generation: u64,
    sequence: Arc<AtomicU64>,
    pty_tx: mpsc::Sender<Action>,
) -> Result<PtyHandle, BackendError> {
    let pty_error = |e: anyhow::Error| BackendError::Pty(format!("{:#}", e));

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(pty_error)?;

    let mut cmd = CommandBuilder::new(&spec.program);
    cmd.args(&spec.args);
    cmd.cwd(&spec.cwd);
    cmd.env("TERM", "xterm-256color");
    // Explicit size for programs that read it before their first SIGWINCH.
    cmd.env("LINES", size.rows.to_string());
    cmd.env("COLUMNS", size.cols.to_string());
    cmd.env("TERMDECK_TERMINAL_ID", terminal_id.as_str());
    cmd.env(
        "TERMDECK_ROLE",
        match role {
            TabRole::Orchestrator => "orchestrator",
            TabRole::Session => "session",
        },
    );
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let child = pair.slave.spawn_command(cmd).map_err(pty_error)?;
    let child_killer = child.clone_killer();
    let process_id = child.process_id();

    let mut reader = pair.master.try_clone_reader().map_err(pty_error)?;
    let writer = pair.master.take_writer().map_err(pty_error)?;

    let id = terminal_id.clone();
    std::thread::spawn(move || {
        read_pty_output(id, generation, &mut reader, sequence, pty_tx, child);
    });

    Ok(PtyHandle {
        master: pair.master,
        child_killer,
        process_id,
        writer,
        generation,
    })
}

/// Forward PTY output until EOF, then report the exit status.
fn read_pty_output(
    terminal_id: TerminalId,
    generation: u64,
    reader: &mut Box<dyn Read + Send>,
    sequence: Arc<AtomicU64>,
    pty_tx: mpsc::Sender<Action>,
    mut child: Box<dyn Child + Send + Sync>,
) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                let exit_code = match child.wait() {
                    Ok(status) => status.exit_code() as i32,
                    Err(e) => {
                        tracing::debug!(terminal = %terminal_id, "Failed to wait for child: {}", e);
                        1
                    }
                };
                let _ = pty_tx.blocking_send(Action::SessionExited(terminal_id, generation, exit_code));
                break;
            }
            Ok(n) => {
                let seq = sequence.fetch_add(1, Ordering::SeqCst) + 1;
                let action = Action::PtyOutput(terminal_id.clone(), seq, buf[..n].to_vec());
                if pty_tx.blocking_send(action).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(terminal = %terminal_id, "PTY read failed: {}", e);
                let _ = pty_tx.blocking_send(Action::SessionExited(terminal_id, generation, 1));
                break;
            }
        }
    }
}

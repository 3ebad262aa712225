/// ProcessHandle: one external proxy subprocess.
///
/// ```text
///   start(args) ── stop() if running ── spawn ──┬── stdout reader ── marker? ──► ProxyReady{launch}
///                                               │                 └─ EOF ──────► ProxyExited{launch}
///                                               └── stderr reader ── marker? ──► ProxyReady{launch}
/// ```
///
/// Both readers share one latch per launch, so `ProxyReady` is sent at most
/// once per `start()`.  Every launch gets a fresh id; the consumer ignores
/// events whose id is not the launch it is waiting on.
///
/// `stop()` asks the child to terminate (SIGTERM on unix), waits up to the
/// configured timeout, then kills it.  It returns only after the child has
/// been reaped, so a following `start()` never overlaps the old process.
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::CoreEvent;

/// Lifecycle seam between the controller and the OS process, so the
/// controller can be driven by a recording double in tests.
#[allow(async_fn_in_trait)]
pub trait ProxyProcess {
    /// Spawn with `args`, stopping any previous child first.  Returns the
    /// launch id carried by this child's ready/exited events.
    async fn start(&mut self, args: &[String]) -> anyhow::Result<u64>;
    /// Terminate and reap.  A no-op when nothing runs.
    async fn stop(&mut self) -> anyhow::Result<()>;
    fn is_running(&mut self) -> bool;
}

pub struct ProcessHandle {
    program: PathBuf,
    ready_marker: String,
    stop_timeout: Duration,
    events: mpsc::UnboundedSender<CoreEvent>,
    child: Option<Child>,
    launch: u64,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn new(
        program: PathBuf,
        ready_marker: String,
        stop_timeout: Duration,
        events: mpsc::UnboundedSender<CoreEvent>,
    ) -> Self {
        Self {
            program,
            ready_marker,
            stop_timeout,
            events,
            child: None,
            launch: 0,
            readers: Vec::new(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    fn spawn_reader<R>(&mut self, pipe: R, stream: &'static str, ready: Arc<AtomicBool>, is_stdout: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handle = tokio::spawn(reader_task(
            BufReader::new(pipe),
            stream,
            self.ready_marker.clone(),
            ready,
            self.launch,
            is_stdout,
            self.events.clone(),
        ));
        self.readers.push(handle);
    }
}

impl ProxyProcess for ProcessHandle {
    async fn start(&mut self, args: &[String]) -> anyhow::Result<u64> {
        if self.child.is_some() {
            self.stop().await?;
        }

        self.launch += 1;
        info!(
            "proxy: launch {} {} {}",
            self.launch,
            self.program.display(),
            args.join(" ")
        );
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        let ready = Arc::new(AtomicBool::new(false));
        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout, "stdout", Arc::clone(&ready), true);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr, "stderr", ready, false);
        }
        self.child = Some(child);
        Ok(self.launch)
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        let Some(mut child) = self.child.take() else {
            debug!("proxy: stop with nothing running");
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!("proxy: launch {} had already exited ({})", self.launch, status);
            return Ok(());
        }

        terminate(&mut child);
        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!("proxy: launch {} stopped ({})", self.launch, status);
                return Ok(());
            }
            Ok(Err(e)) => warn!("proxy: wait failed: {}", e),
            Err(_) => warn!(
                "proxy: launch {} ignored terminate for {:?}, killing",
                self.launch, self.stop_timeout
            ),
        }

        // kill() also reaps
        if let Err(e) = child.kill().await {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                return Err(e).context("failed to kill proxy");
            }
        }
        info!("proxy: launch {} killed", self.launch);
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        self.child
            .as_mut()
            .map(|c| matches!(c.try_wait(), Ok(None)))
            .unwrap_or(false)
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal to a pid we spawned and have not reaped yet
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!("proxy: SIGTERM to {} failed: {}", pid, std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("proxy: terminate failed: {}", e);
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    stream: &'static str,
    marker: String,
    ready: Arc<AtomicBool>,
    launch: u64,
    report_exit: bool,
    events: mpsc::UnboundedSender<CoreEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("proxy {}: closed (launch {})", stream, launch);
                break;
            }
            Ok(_) => {
                let trimmed = line.trim_end();
                debug!("proxy {}: {}", stream, trimmed);
                if !ready.load(Ordering::Acquire)
                    && trimmed.contains(marker.as_str())
                    && !ready.swap(true, Ordering::AcqRel)
                {
                    info!("proxy: launch {} ready", launch);
                    let _ = events.send(CoreEvent::ProxyReady { launch });
                }
            }
            Err(e) => {
                warn!("proxy {}: read error: {}", stream, e);
                break;
            }
        }
    }
    if report_exit {
        let _ = events.send(CoreEvent::ProxyExited { launch });
    }
}

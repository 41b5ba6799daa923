//! PTY spawning utilities.
//!
//! Shared plumbing for [`PtySession::spawn()`](super::pty::PtySession::spawn):
//! opening the pty pair, building the child command, and the reader thread
//! that pumps process output into the session's buffers.
//!
//! # Reader Thread
//!
//! One reader thread per session. For every chunk it reads it:
//! 1. pushes the raw bytes into the raw [`RingBuffer`] (live-tail streaming)
//! 2. feeds the [`Vt100Engine`] under the write lock (one `process()` per lock)
//! 3. forwards any OSC notifications the engine queued
//! 4. stamps the session's last-activity timestamp
//!
//! The thread is the engine's only writer. It exits on EOF or on the first
//! read error (EIO once the child is gone and the master is closed).

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread;

use anyhow::{bail, Context, Result};
use portable_pty::{native_pty_system, CommandBuilder, PtyPair, PtySize};

use super::notification::AgentNotification;
use crate::ring_buffer::RingBuffer;
use crate::terminal::Vt100Engine;

/// Size of each blocking read from the pty master.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Configuration for spawning a process in a `PtySession`.
///
/// # Example
///
/// ```ignore
/// let config = PtySpawnConfig {
///     worktree_path: PathBuf::from("/path/to/worktree"),
///     command: "bash".to_string(),
///     env: HashMap::new(),
///     init_commands: vec!["source .botster_init".to_string()],
///     detect_notifications: true,
///     port: None,
///     context: String::new(),
/// };
/// pty_session.spawn(config)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct PtySpawnConfig {
    /// Working directory for the process.
    pub worktree_path: PathBuf,
    /// Command to run (e.g., "bash"). Split on whitespace.
    pub command: String,
    /// Environment variables to set.
    pub env: HashMap<String, String>,
    /// Lines written to the pty after spawn, one per line.
    pub init_commands: Vec<String>,
    /// Forward OSC 9 / OSC 777 notifications from this session.
    pub detect_notifications: bool,
    /// HTTP port served by this process, if it is a dev server.
    pub port: Option<u16>,
    /// Context string written to the pty before init commands.
    pub context: String,
}

/// Open a new PTY pair with the given dimensions.
///
/// # Errors
///
/// Fails when the OS cannot allocate a pseudo-terminal.
pub fn open_pty(rows: u16, cols: u16) -> Result<PtyPair> {
    let pty_system = native_pty_system();
    let size = PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    };
    pty_system.openpty(size).context("Failed to open PTY")
}

/// Build a command from a whitespace-separated command string.
///
/// # Errors
///
/// Returns an error if `command_str` contains no program name.
#[allow(
    clippy::implicit_hasher,
    reason = "internal API doesn't need hasher generalization"
)]
pub fn build_command(
    command_str: &str,
    cwd: &Path,
    env_vars: &HashMap<String, String>,
) -> Result<CommandBuilder> {
    let mut parts = command_str.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("Empty command string");
    };

    let mut cmd = CommandBuilder::new(program);
    for arg in parts {
        cmd.arg(arg);
    }
    cmd.cwd(cwd);
    for (key, value) in env_vars {
        cmd.env(key, value);
    }
    Ok(cmd)
}

/// Milliseconds since the Unix epoch, the unit of activity timestamps.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Everything the reader thread writes to.
#[derive(Debug)]
pub struct ReaderSinks {
    /// Log label ("CLI" or "Server").
    pub label: &'static str,
    /// Terminal engine fed with every chunk.
    pub engine: Arc<RwLock<Vt100Engine>>,
    /// Raw output chunks for streaming.
    pub raw_output: Arc<Mutex<RingBuffer<Vec<u8>>>>,
    /// Where detected notifications go. `None` discards them.
    pub notification_tx: Option<mpsc::Sender<AgentNotification>>,
    /// Last-activity timestamp (ms since epoch).
    pub last_activity_ms: Arc<AtomicI64>,
    /// Set when the thread exits.
    pub exited: Arc<AtomicBool>,
}

/// Spawn the PTY reader thread.
///
/// Blocks on `reader` in a dedicated OS thread so the hub tick never waits
/// on agent I/O.
pub fn spawn_reader_thread(
    reader: Box<dyn Read + Send>,
    sinks: ReaderSinks,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = reader;
        let label = sinks.label;
        log::info!("{label} PTY reader thread started");
        let mut buf = [0u8; READ_CHUNK_SIZE];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => handle_chunk(&sinks, &buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("{label} PTY read ended: {e}");
                    break;
                }
            }
        }

        sinks.exited.store(true, Ordering::Release);
        log::info!("{label} PTY reader thread exiting");
    })
}

fn handle_chunk(sinks: &ReaderSinks, chunk: &[u8]) {
    sinks
        .raw_output
        .lock()
        .expect("raw_output lock poisoned")
        .push(chunk.to_vec());

    // Hold the write lock for exactly one process() call.
    let notifications = {
        let mut engine = sinks.engine.write().expect("engine lock poisoned");
        engine.process(chunk);
        engine.take_notifications()
    };

    if let Some(tx) = &sinks.notification_tx {
        for notification in notifications {
            log::info!("{} PTY notification: {notification:?}", sinks.label);
            // Receiver gone means the session is closing.
            let _ = tx.send(notification);
        }
    }

    sinks.last_activity_ms.store(now_ms(), Ordering::Relaxed);
}

//! PTY session management.
//!
//! A [`PtySession`] owns one child process attached to a pseudo-terminal,
//! the reader thread pumping its output, and the buffers that output lands in.
//!
//! # Architecture
//!
//! ```text
//! PtySession
//!  ├── shared_state: Arc<Mutex<SharedPtyState>>
//!  │    ├── master_pty: MasterPty (resize)
//!  │    ├── writer: Write (input)
//!  │    └── dimensions
//!  ├── child: Child (spawned process)
//!  ├── engine: Arc<RwLock<Vt100Engine>>          (written only by the reader)
//!  ├── raw_output: Arc<Mutex<RingBuffer<Vec<u8>>>> (raw chunks for streaming)
//!  └── reader_thread: JoinHandle                   (see spawn::spawn_reader_thread)
//! ```
//!
//! # Thread Safety
//!
//! Display consumers take read locks on the engine. The reader thread takes
//! the write lock once per chunk and [`PtySession::resize`] takes it once per
//! resize, so a busy writer never holds it across reads.

// Rust guideline compliant 2026-02

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use portable_pty::{Child, ExitStatus, MasterPty, PtySize};

use super::notification::AgentNotification;
use super::spawn::{self, PtySpawnConfig, ReaderSinks};
use crate::constants;
use crate::ring_buffer::RingBuffer;
use crate::terminal::{StyledLine, Vt100Engine, DEFAULT_SCROLLBACK_LINES};

/// How long `close()` waits for a killed child to be reaped.
const CHILD_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `close()` waits for the reader thread before detaching it.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

const POLL_STEP: Duration = Duration::from_millis(20);

/// Shared mutable state for PTY I/O.
///
/// Holds the handles that both input writes and resizes need.
pub struct SharedPtyState {
    /// Master PTY for resizing operations.
    pub(crate) master_pty: Option<Box<dyn MasterPty + Send>>,

    /// Writer for sending input to the PTY.
    pub(crate) writer: Option<Box<dyn Write + Send>>,

    /// Current PTY dimensions (rows, cols).
    pub(crate) dimensions: (u16, u16),
}

impl std::fmt::Debug for SharedPtyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPtyState")
            .field("has_master_pty", &self.master_pty.is_some())
            .field("has_writer", &self.writer.is_some())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// One spawned process on a pseudo-terminal plus its output buffers.
///
/// Lifetime is bounded by the child process: [`close()`](Self::close)
/// (also run on drop) kills it, reaps it, and releases the pty.
pub struct PtySession {
    shared_state: Arc<Mutex<SharedPtyState>>,

    reader_thread: Option<thread::JoinHandle<()>>,

    /// Child process handle, kept so we can kill it on close.
    child: Option<Box<dyn Child + Send>>,

    /// Exit status once the child has been reaped.
    exit_status: Option<ExitStatus>,

    engine: Arc<RwLock<Vt100Engine>>,

    raw_output: Arc<Mutex<RingBuffer<Vec<u8>>>>,

    /// Last output or input (ms since epoch).
    last_activity_ms: Arc<AtomicI64>,

    /// Set by the reader thread when it stops.
    reader_exited: Arc<AtomicBool>,

    notification_rx: Option<mpsc::Receiver<AgentNotification>>,

    /// HTTP port served by this session (dev server sessions only).
    port: Option<u16>,

    closed: bool,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self
            .shared_state
            .lock()
            .expect("shared_state lock poisoned");
        f.debug_struct("PtySession")
            .field("has_master_pty", &state.master_pty.is_some())
            .field("has_writer", &state.writer.is_some())
            .field("dimensions", &state.dimensions)
            .field("has_reader_thread", &self.reader_thread.is_some())
            .field("has_child", &self.child.is_some())
            .field("port", &self.port)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PtySession {
    /// Creates a PTY session with default buffer capacities.
    #[must_use]
    pub fn new(rows: u16, cols: u16) -> Self {
        Self::with_capacities(
            rows,
            cols,
            constants::DEFAULT_RAW_BUFFER_CHUNKS,
            DEFAULT_SCROLLBACK_LINES,
        )
    }

    /// Creates a PTY session keeping `raw_chunks` raw output chunks and
    /// `scrollback_lines` lines of terminal history.
    ///
    /// Nothing is spawned until [`spawn()`](Self::spawn).
    #[must_use]
    pub fn with_capacities(rows: u16, cols: u16, raw_chunks: usize, scrollback_lines: usize) -> Self {
        let engine = Vt100Engine::with_scrollback(rows, cols, scrollback_lines);
        // The engine raises zero sizes; keep the pty in lockstep with it.
        let dimensions = engine.size();

        Self {
            shared_state: Arc::new(Mutex::new(SharedPtyState {
                master_pty: None,
                writer: None,
                dimensions,
            })),
            reader_thread: None,
            child: None,
            exit_status: None,
            engine: Arc::new(RwLock::new(engine)),
            raw_output: Arc::new(Mutex::new(RingBuffer::new(raw_chunks.max(1)))),
            last_activity_ms: Arc::new(AtomicI64::new(spawn::now_ms())),
            reader_exited: Arc::new(AtomicBool::new(false)),
            notification_rx: None,
            port: None,
            closed: false,
        }
    }

    /// Get the current PTY dimensions (rows, cols).
    #[must_use]
    pub fn dimensions(&self) -> (u16, u16) {
        self.shared_state
            .lock()
            .expect("shared_state lock poisoned")
            .dimensions
    }

    /// Set the HTTP forwarding port for this PTY.
    pub fn set_port(&mut self, port: u16) {
        self.port = Some(port);
    }

    /// HTTP port served by this session, if any.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Get the child process ID.
    #[must_use]
    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref()?.process_id()
    }

    // =========================================================================
    // Spawn
    // =========================================================================

    /// Spawn a process in this PTY session.
    ///
    /// Opens a pty at the session's current dimensions, starts the command
    /// in `config.worktree_path`, starts the reader thread, then writes the
    /// context string and init commands.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was already spawned or closed, or if
    /// PTY creation, command spawn, or writer setup fails.
    pub fn spawn(&mut self, config: PtySpawnConfig) -> Result<()> {
        if self.closed {
            bail!("PTY session is closed");
        }
        if self.is_spawned() {
            bail!("PTY session already spawned");
        }

        let (rows, cols) = self.dimensions();
        let pair = spawn::open_pty(rows, cols)?;

        let cmd = spawn::build_command(&config.command, &config.worktree_path, &config.env)?;
        let child: Box<dyn Child + Send> = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn command: {}", config.command))?;

        // Our copy of the slave must go so the reader sees EOF/EIO once the
        // child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair.master.take_writer().context("Failed to take PTY writer")?;

        {
            let mut state = self
                .shared_state
                .lock()
                .expect("shared_state lock poisoned");
            state.master_pty = Some(pair.master);
            state.writer = Some(writer);
        }
        self.child = Some(child);

        if let Some(port) = config.port {
            self.set_port(port);
        }

        let notification_tx = if config.detect_notifications {
            let (tx, rx) = mpsc::channel();
            self.notification_rx = Some(rx);
            Some(tx)
        } else {
            None
        };

        let label = if config.port.is_some() { "Server" } else { "CLI" };
        log::info!(
            "{label} PTY spawned `{}` in {} ({rows}x{cols})",
            config.command,
            config.worktree_path.display()
        );

        self.reader_thread = Some(spawn::spawn_reader_thread(
            reader,
            ReaderSinks {
                label,
                engine: Arc::clone(&self.engine),
                raw_output: Arc::clone(&self.raw_output),
                notification_tx,
                last_activity_ms: Arc::clone(&self.last_activity_ms),
                exited: Arc::clone(&self.reader_exited),
            },
        ));
        self.touch();

        if !config.context.is_empty() {
            if let Err(e) = self.write_input_str(&format!("{}\n", config.context)) {
                log::warn!("Failed to write context to PTY: {e}");
            }
        }

        if !config.init_commands.is_empty() {
            log::info!("Sending {} init command(s)", config.init_commands.len());
            for cmd_str in &config.init_commands {
                log::debug!("Running init command: {cmd_str}");
                if let Err(e) = self.write_input_str(&format!("{cmd_str}\n")) {
                    log::warn!("Failed to write init command: {e}");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Check if a process has been spawned in this PTY session.
    #[must_use]
    pub fn is_spawned(&self) -> bool {
        self.child.is_some() || self.exit_status.is_some()
    }

    /// True once the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // =========================================================================
    // I/O
    // =========================================================================

    /// Resize the PTY and the terminal engine together.
    ///
    /// The engine is resized first so output the application redraws for
    /// the new size is parsed against the new grid. If the pty resize
    /// fails, the engine is reverted so both keep the same dimensions.
    ///
    /// # Errors
    ///
    /// Returns the pty resize error after reverting.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let rows = rows.max(1);
        let cols = cols.max(1);

        let mut state = self
            .shared_state
            .lock()
            .expect("shared_state lock poisoned");

        let old_dims = {
            let mut engine = self.engine.write().expect("engine lock poisoned");
            let old = engine.size();
            engine.resize(rows, cols);
            old
        };

        if let Some(master_pty) = &state.master_pty {
            if let Err(e) = master_pty.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            }) {
                log::warn!("Failed to resize PTY: {e}");
                self.engine
                    .write()
                    .expect("engine lock poisoned")
                    .resize(old_dims.0, old_dims.1);
                return Err(anyhow::anyhow!("Failed to resize PTY: {e}"));
            }
        }

        state.dimensions = (rows, cols);
        Ok(())
    }

    /// Write input bytes to the PTY.
    ///
    /// # Errors
    ///
    /// Returns an error if no process has been spawned (or it was closed),
    /// or if the write fails.
    pub fn write_input(&self, input: &[u8]) -> Result<()> {
        {
            let mut state = self
                .shared_state
                .lock()
                .expect("shared_state lock poisoned");
            let Some(writer) = state.writer.as_mut() else {
                bail!("PTY not spawned");
            };
            writer.write_all(input).context("Failed to write PTY input")?;
            writer.flush().context("Failed to flush PTY writer")?;
        }
        self.touch();
        Ok(())
    }

    /// Write a string to the PTY.
    ///
    /// # Errors
    ///
    /// See [`write_input()`](Self::write_input).
    pub fn write_input_str(&self, input: &str) -> Result<()> {
        self.write_input(input.as_bytes())
    }

    /// Take every buffered raw output chunk, concatenated in order.
    #[must_use]
    pub fn drain_raw_output(&self) -> Vec<u8> {
        self.raw_output
            .lock()
            .expect("raw_output lock poisoned")
            .drain_bytes()
    }

    // =========================================================================
    // Display
    // =========================================================================

    /// Current screen grid.
    #[must_use]
    pub fn screen(&self) -> Vec<StyledLine> {
        self.engine.read().expect("engine lock poisoned").screen()
    }

    /// Current screen as plain text rows.
    #[must_use]
    pub fn screen_text(&self) -> Vec<String> {
        self.engine.read().expect("engine lock poisoned").screen_text()
    }

    /// Current screen serialized as ANSI.
    #[must_use]
    pub fn screen_as_ansi(&self) -> Vec<u8> {
        self.engine.read().expect("engine lock poisoned").screen_as_ansi()
    }

    /// Content hash of the current screen.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        self.engine.read().expect("engine lock poisoned").content_hash()
    }

    /// Scrollback window; see [`Vt100Engine::scrollback_lines`].
    #[must_use]
    pub fn scrollback_lines(&self, offset: usize, limit: usize) -> Vec<StyledLine> {
        self.engine
            .read()
            .expect("engine lock poisoned")
            .scrollback_lines(offset, limit)
    }

    /// Number of lines in scrollback.
    #[must_use]
    pub fn scrollback_count(&self) -> usize {
        self.engine.read().expect("engine lock poisoned").scrollback_count()
    }

    /// Cursor (row, col).
    #[must_use]
    pub fn cursor_position(&self) -> (u16, u16) {
        self.engine.read().expect("engine lock poisoned").cursor_position()
    }

    /// Shared handle to the engine for read-only consumers.
    #[must_use]
    pub fn engine(&self) -> Arc<RwLock<Vt100Engine>> {
        Arc::clone(&self.engine)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Notifications detected since the last call.
    ///
    /// Always empty for sessions spawned without notification detection.
    #[must_use]
    pub fn poll_notifications(&self) -> Vec<AgentNotification> {
        self.notification_rx
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }

    /// Timestamp of the last output or input (ms since epoch).
    #[must_use]
    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    /// True once the reader thread has stopped.
    #[must_use]
    pub fn reader_exited(&self) -> bool {
        self.reader_exited.load(Ordering::Acquire)
    }

    /// Non-blocking exit check.
    ///
    /// Returns the exit status once the child has exited; `None` while it
    /// is still running or if nothing was spawned.
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_some() {
            return self.exit_status.clone();
        }
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                log::info!("PTY child exited: {status:?}");
                self.exit_status = Some(status);
                self.child = None;
                self.exit_status.clone()
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Failed to poll PTY child: {e}");
                None
            }
        }
    }

    fn touch(&self) {
        self.last_activity_ms.store(spawn::now_ms(), Ordering::Relaxed);
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Kill the child process if running and reap it.
    ///
    /// Both master-side handles are released before waiting: on macOS the
    /// session leader is not reported to `waitpid` until every master fd is
    /// closed. Waiting is bounded by [`CHILD_EXIT_TIMEOUT`].
    pub fn kill_child(&mut self) {
        if self.try_wait().is_none() {
            if let Some(child) = self.child.as_mut() {
                log::info!("Killing PTY child process");
                if let Err(e) = child.kill() {
                    log::warn!("Failed to kill PTY child: {e}");
                }
            }
        }

        {
            let mut state = self
                .shared_state
                .lock()
                .expect("shared_state lock poisoned");
            drop(state.master_pty.take());
            drop(state.writer.take());
        }

        if self.child.is_none() {
            return;
        }
        let deadline = Instant::now() + CHILD_EXIT_TIMEOUT;
        while self.try_wait().is_none() {
            if Instant::now() >= deadline {
                log::warn!("PTY child did not exit within {CHILD_EXIT_TIMEOUT:?}");
                break;
            }
            thread::sleep(POLL_STEP);
        }
    }

    /// Terminate the process and release the pty.
    ///
    /// Idempotent. The reader thread is joined if it stops within
    /// [`READER_JOIN_TIMEOUT`], otherwise it is detached.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.kill_child();

        if let Some(handle) = self.reader_thread.take() {
            let deadline = Instant::now() + READER_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(POLL_STEP);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!("PTY reader thread still blocked, detaching");
            }
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_session_creation() {
        let session = PtySession::new(24, 80);

        assert!(!session.is_spawned());
        assert_eq!(session.dimensions(), (24, 80));
        assert!(session.port().is_none());
        assert_eq!(session.screen().len(), 24);
    }

    #[test]
    fn test_pty_session_port() {
        let mut session = PtySession::new(24, 80);
        session.set_port(4123);
        assert_eq!(session.port(), Some(4123));
    }

    #[test]
    fn test_write_input_before_spawn_fails() {
        let session = PtySession::new(24, 80);
        let err = session.write_input(b"hello").unwrap_err();
        assert!(err.to_string().contains("not spawned"));
    }

    #[test]
    fn test_resize_unspawned_updates_engine_and_dimensions() {
        let session = PtySession::new(24, 80);
        session.resize(40, 120).unwrap();
        assert_eq!(session.dimensions(), (40, 120));
        assert_eq!(session.screen().len(), 40);
        assert_eq!(session.screen()[0].cells.len(), 120);
    }

    #[test]
    fn test_zero_size_is_raised() {
        let session = PtySession::new(0, 0);
        assert_eq!(session.dimensions(), (1, 1));
        session.resize(0, 10).unwrap();
        assert_eq!(session.dimensions(), (1, 10));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = PtySession::new(24, 80);
        session.close();
        session.close();
        assert!(session.is_closed());
    }

    #[test]
    fn test_poll_notifications_without_detection_is_empty() {
        let session = PtySession::new(24, 80);
        assert!(session.poll_notifications().is_empty());
    }

    #[test]
    fn test_drain_raw_output_empty() {
        let session = PtySession::new(24, 80);
        assert!(session.drain_raw_output().is_empty());
    }

    #[test]
    fn test_pty_session_debug() {
        let session = PtySession::new(24, 80);
        let debug = format!("{session:?}");
        assert!(debug.contains("PtySession"));
        assert!(debug.contains("has_child"));
    }

    #[test]
    fn test_spawn_after_close_fails() {
        let mut session = PtySession::new(24, 80);
        session.close();
        let result = session.spawn(PtySpawnConfig {
            worktree_path: std::env::temp_dir(),
            command: "true".to_string(),
            ..PtySpawnConfig::default()
        });
        assert!(result.is_err());
    }
}

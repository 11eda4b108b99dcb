//! Render queue sources.
//!
//! A source answers three questions per poll: which project and database are
//! open ([`RenderQueueSource::connect`]), which jobs are queued, and what each
//! job's status is. Every implementation here reads a [`QueueSnapshot`]
//! document once per `connect` and serves the other two calls from it.
//!
//! # Snapshot document
//!
//! ```json
//! {
//!   "project": "Feature Film",
//!   "database": {"DbType": "Disk", "DbName": "Local Database"},
//!   "jobs": [{"JobId": "3f2a...", "RenderJobName": "Master", "TimelineName": "Reel 1"}],
//!   "status": {"3f2a...": {"JobStatus": "Rendering", "CompletionPercentage": 42}}
//! }
//! ```

use crate::config::{Config, SourceConfig};
use crate::error::{RenderwatchError, Result};
use crate::record::RawRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// How often a running helper is checked for exit.
const WAIT_TICK: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The project and database currently open in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueContext {
    pub project: String,
    #[serde(default)]
    pub database: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub project: String,
    #[serde(default)]
    pub database: Value,
    #[serde(default)]
    pub jobs: Vec<RawRecord>,
    /// Status lookups by job id.
    #[serde(default)]
    pub status: HashMap<String, RawRecord>,
}

impl QueueSnapshot {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn context(&self) -> QueueContext {
        QueueContext {
            project: self.project.clone(),
            database: self.database.clone(),
        }
    }
}

pub trait RenderQueueSource {
    /// Reach the editor and report what is open. Connectivity failures are
    /// `SourceUnavailable`, `SourceTimeout` or `SourceCommandNotFound`.
    fn connect(&mut self) -> Result<QueueContext>;

    fn render_jobs(&mut self) -> Result<Vec<RawRecord>>;

    fn render_status(&mut self, job_id: &str) -> Result<RawRecord>;
}

/// Build the source named in `config.source`.
pub fn from_config(config: &Config) -> Result<Box<dyn RenderQueueSource>> {
    let timeout = Duration::from_secs(config.daemon.source_timeout_secs);
    match &config.source {
        SourceConfig::Command { command, args } => Ok(Box::new(CommandSource::new(
            command,
            args.clone(),
            config.resolve_path(Path::new(".")),
            timeout,
        )?)),
        SourceConfig::File { path } => Ok(Box::new(FileSource::new(config.resolve_path(path)))),
    }
}

// ---------------------------------------------------------------------------
// Snapshot-backed lookups
// ---------------------------------------------------------------------------

fn not_connected() -> RenderwatchError {
    RenderwatchError::SourceUnavailable("not connected".to_string())
}

fn jobs_of(snapshot: Option<&QueueSnapshot>) -> Result<Vec<RawRecord>> {
    snapshot.map(|s| s.jobs.clone()).ok_or_else(not_connected)
}

fn status_of(snapshot: Option<&QueueSnapshot>, job_id: &str) -> Result<RawRecord> {
    let snapshot = snapshot.ok_or_else(not_connected)?;
    Ok(snapshot.status.get(job_id).cloned().unwrap_or_default())
}

// ---------------------------------------------------------------------------
// CommandSource
// ---------------------------------------------------------------------------

/// Runs a helper program that prints a [`QueueSnapshot`] on stdout.
///
/// The helper's stderr flows through to the terminal. The helper must exit and
/// close stdout within `timeout`; otherwise its whole process group is killed.
pub struct CommandSource {
    program: PathBuf,
    args: Vec<String>,
    dir: PathBuf,
    timeout: Duration,
    current: Option<QueueSnapshot>,
}

impl CommandSource {
    pub fn new(command: &str, args: Vec<String>, dir: PathBuf, timeout: Duration) -> Result<Self> {
        let program = which::which(command)
            .map_err(|_| RenderwatchError::SourceCommandNotFound(command.to_string()))?;
        Ok(Self {
            program,
            args,
            dir,
            timeout,
            current: None,
        })
    }

    fn run(&self) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        // Own process group, so a timeout can take down anything the helper
        // left running in the background.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|e| RenderwatchError::SourceUnavailable(e.to_string()))?;

        // Drain stdout on its own thread so a large snapshot cannot block the
        // helper while we wait on it.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RenderwatchError::SourceUnavailable("stdout not captured".into()))?;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = tx.send(stdout.read_to_string(&mut buf).map(|_| buf));
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                kill_group(&mut child);
                return Err(RenderwatchError::SourceTimeout(self.timeout.as_secs()));
            }
            std::thread::sleep(WAIT_TICK);
        };

        // The helper has exited, but a background child may still hold the
        // pipe open. The same deadline covers the read.
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(WAIT_TICK);
        let stdout = match rx.recv_timeout(remaining) {
            Ok(read) => read?,
            Err(RecvTimeoutError::Timeout) => {
                kill_group(&mut child);
                return Err(RenderwatchError::SourceTimeout(self.timeout.as_secs()));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RenderwatchError::SourceUnavailable(
                    "stdout reader stopped".into(),
                ))
            }
        };

        if !status.success() {
            let hint = stdout.chars().take(500).collect::<String>();
            return Err(RenderwatchError::SourceUnavailable(format!(
                "{} exited with {status}: {hint}",
                self.program.display()
            )));
        }
        Ok(stdout)
    }
}

/// Kill the helper and everything in its process group, then reap it.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: sending a signal touches no memory on our side.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

impl RenderQueueSource for CommandSource {
    fn connect(&mut self) -> Result<QueueContext> {
        let stdout = self.run()?;
        let snapshot = QueueSnapshot::parse(&stdout)
            .map_err(|e| RenderwatchError::SourceUnavailable(format!("bad snapshot: {e}")))?;
        let context = snapshot.context();
        self.current = Some(snapshot);
        Ok(context)
    }

    fn render_jobs(&mut self) -> Result<Vec<RawRecord>> {
        jobs_of(self.current.as_ref())
    }

    fn render_status(&mut self, job_id: &str) -> Result<RawRecord> {
        status_of(self.current.as_ref(), job_id)
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// Re-reads a snapshot file on every poll. A missing file means the queue is
/// unreachable.
pub struct FileSource {
    path: PathBuf,
    current: Option<QueueSnapshot>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: None,
        }
    }
}

impl RenderQueueSource for FileSource {
    fn connect(&mut self) -> Result<QueueContext> {
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            RenderwatchError::SourceUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let snapshot = QueueSnapshot::parse(&data)
            .map_err(|e| RenderwatchError::SourceUnavailable(format!("bad snapshot: {e}")))?;
        let context = snapshot.context();
        self.current = Some(snapshot);
        Ok(context)
    }

    fn render_jobs(&mut self) -> Result<Vec<RawRecord>> {
        jobs_of(self.current.as_ref())
    }

    fn render_status(&mut self, job_id: &str) -> Result<RawRecord> {
        status_of(self.current.as_ref(), job_id)
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// Serves queued snapshots in order, one per `connect`. `None` entries and an
/// empty queue both read as an unreachable editor.
#[derive(Default)]
pub struct MemorySource {
    queue: VecDeque<Option<QueueSnapshot>>,
    current: Option<QueueSnapshot>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: QueueSnapshot) -> &mut Self {
        self.queue.push_back(Some(snapshot));
        self
    }

    pub fn push_outage(&mut self) -> &mut Self {
        self.queue.push_back(None);
        self
    }
}

impl RenderQueueSource for MemorySource {
    fn connect(&mut self) -> Result<QueueContext> {
        match self.queue.pop_front().flatten() {
            Some(snapshot) => {
                let context = snapshot.context();
                self.current = Some(snapshot);
                Ok(context)
            }
            None => {
                self.current = None;
                Err(RenderwatchError::SourceUnavailable(
                    "editor not reachable".to_string(),
                ))
            }
        }
    }

    fn render_jobs(&mut self) -> Result<Vec<RawRecord>> {
        jobs_of(self.current.as_ref())
    }

    fn render_status(&mut self, job_id: &str) -> Result<RawRecord> {
        status_of(self.current.as_ref(), job_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SNAPSHOT: &str = r#"{
        "project": "Feature Film",
        "database": {"DbType": "Disk", "DbName": "Local"},
        "jobs": [{"JobId": "job-1", "RenderJobName": "Master"}],
        "status": {"job-1": {"JobStatus": "Rendering", "CompletionPercentage": 42}}
    }"#;

    #[test]
    fn file_source_serves_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, SNAPSHOT).unwrap();

        let mut source = FileSource::new(&path);
        let ctx = source.connect().unwrap();
        assert_eq!(ctx.project, "Feature Film");
        assert_eq!(source.render_jobs().unwrap().len(), 1);
        let status = source.render_status("job-1").unwrap();
        assert_eq!(status["JobStatus"], "Rendering");
        assert!(source.render_status("job-2").unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut source = FileSource::new(dir.path().join("absent.json"));
        let err = source.connect().unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn queries_before_connect_fail() {
        let mut source = MemorySource::new();
        assert!(source.render_jobs().is_err());
    }

    #[test]
    fn memory_source_replays_in_order() {
        let mut source = MemorySource::new();
        source
            .push(QueueSnapshot::parse(SNAPSHOT).unwrap())
            .push_outage();
        assert!(source.connect().is_ok());
        assert!(source.connect().unwrap_err().is_connectivity());
        assert!(source.connect().is_err());
    }

    #[test]
    fn unknown_command_is_reported() {
        let err = CommandSource::new(
            "renderwatch-no-such-helper",
            vec![],
            PathBuf::from("."),
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RenderwatchError::SourceCommandNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn command_source_parses_helper_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, SNAPSHOT).unwrap();

        let mut source = CommandSource::new(
            "cat",
            vec![path.display().to_string()],
            dir.path().to_path_buf(),
            Duration::from_secs(5),
        )
        .unwrap();
        let ctx = source.connect().unwrap();
        assert_eq!(ctx.database["DbName"], "Local");
        assert_eq!(source.render_jobs().unwrap()[0]["JobId"], "job-1");
    }

    #[cfg(unix)]
    #[test]
    fn slow_helper_times_out() {
        let mut source = CommandSource::new(
            "sleep",
            vec!["5".to_string()],
            PathBuf::from("."),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = source.connect().unwrap_err();
        assert!(matches!(err, RenderwatchError::SourceTimeout(_)));
    }

    #[cfg(unix)]
    #[test]
    fn background_child_holding_stdout_times_out() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("queue.json"), SNAPSHOT).unwrap();

        let mut source = CommandSource::new(
            "sh",
            vec!["-c".to_string(), "sleep 6 & cat queue.json".to_string()],
            dir.path().to_path_buf(),
            Duration::from_secs(1),
        )
        .unwrap();
        let started = Instant::now();
        let err = source.connect().unwrap_err();
        assert!(matches!(err, RenderwatchError::SourceTimeout(1)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn failing_helper_is_unavailable() {
        let mut source =
            CommandSource::new("false", vec![], PathBuf::from("."), Duration::from_secs(5))
                .unwrap();
        assert!(source.connect().unwrap_err().is_connectivity());
    }
}

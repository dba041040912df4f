use crate::error::{OverseerError, Result};
use crate::logs::DateFormat;
use chrono::Local;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One append-only log file, shared when stdout and stderr point at the same path
#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    file: TokioFile,
}

type SharedLogFile = Arc<Mutex<LogFile>>;

/// Longest chunk written as one entry; longer lines are split
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// LogSink owns the output files of a single process instance.
///
/// It is acquired right after spawn, pumps the child's stdout and stderr line by line
/// into the configured files, and is released (flushed and closed) when both streams
/// reach EOF or [`LogPumps::finish`] gives up waiting for them.
#[derive(Debug, Clone)]
pub struct LogSink {
    stdout: SharedLogFile,
    stderr: SharedLogFile,
    date_format: DateFormat,
}

impl LogSink {
    /// Open (creating if needed) the stdout and stderr log files in append mode
    ///
    /// # Arguments
    /// * `stdout_path` - File receiving the child's standard output
    /// * `stderr_path` - File receiving the child's standard error (may equal `stdout_path`)
    /// * `date_format` - Timestamp format prefixed to every line
    pub fn open(stdout_path: &Path, stderr_path: &Path, date_format: DateFormat) -> Result<Self> {
        let stdout = Arc::new(Mutex::new(open_log_file(stdout_path)?));
        let stderr = if stderr_path == stdout_path {
            Arc::clone(&stdout)
        } else {
            Arc::new(Mutex::new(open_log_file(stderr_path)?))
        };

        Ok(Self {
            stdout,
            stderr,
            date_format,
        })
    }

    /// Write one stdout line with timestamp
    pub async fn write_stdout(&self, data: &[u8]) -> Result<()> {
        self.write_entry(&self.stdout, data).await
    }

    /// Write one stderr line with timestamp
    pub async fn write_stderr(&self, data: &[u8]) -> Result<()> {
        self.write_entry(&self.stderr, data).await
    }

    /// Start pumping the child's output streams into the log files
    pub fn attach<O, E>(&self, stdout: Option<O>, stderr: Option<E>) -> LogPumps
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let mut tasks = Vec::with_capacity(2);

        if let Some(stdout) = stdout {
            let sink = self.clone();
            tasks.push(tokio::spawn(async move {
                sink.pump(stdout, Stream::Stdout).await;
            }));
        }

        if let Some(stderr) = stderr {
            let sink = self.clone();
            tasks.push(tokio::spawn(async move {
                sink.pump(stderr, Stream::Stderr).await;
            }));
        }

        LogPumps { tasks }
    }

    /// Flush both log files to ensure all data is written
    pub async fn flush(&self) -> Result<()> {
        for file in [&self.stdout, &self.stderr] {
            let mut guard = file.lock().await;
            guard
                .file
                .flush()
                .await
                .map_err(|e| OverseerError::LogError(format!("Failed to flush log: {}", e)))?;
        }
        Ok(())
    }

    async fn pump<R>(&self, reader: R, stream: Stream)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = (&mut reader)
                .take(MAX_LINE_BYTES)
                .read_until(b'\n', &mut line)
                .await;
            match read {
                // EOF - process closed the stream
                Ok(0) => break,
                Ok(_) => {
                    let result = match stream {
                        Stream::Stdout => self.write_stdout(&line).await,
                        Stream::Stderr => self.write_stderr(&line).await,
                    };
                    if let Err(e) = result {
                        warn!("Dropping {} line: {}", stream.as_str(), e);
                    }
                }
                Err(e) => {
                    debug!("Stopped reading {}: {}", stream.as_str(), e);
                    break;
                }
            }
        }

        if let Err(e) = self.flush().await {
            warn!("Failed to flush {} log: {}", stream.as_str(), e);
        }
    }

    async fn write_entry(&self, target: &SharedLogFile, data: &[u8]) -> Result<()> {
        let entry = self.format_log_entry(data);
        let mut guard = target.lock().await;
        let path = guard.path.display().to_string();

        guard.file.write_all(&entry).await.map_err(|e| {
            OverseerError::LogError(format!("Failed to write to {}: {}", path, e))
        })?;
        guard
            .file
            .flush()
            .await
            .map_err(|e| OverseerError::LogError(format!("Failed to flush {}: {}", path, e)))?;

        Ok(())
    }

    /// Format: `[<timestamp>] <data>\n`
    fn format_log_entry(&self, data: &[u8]) -> Vec<u8> {
        let timestamp = self.date_format.render(&Local::now());
        let mut entry = Vec::with_capacity(timestamp.len() + 4 + data.len());

        entry.extend_from_slice(b"[");
        entry.extend_from_slice(timestamp.as_bytes());
        entry.extend_from_slice(b"] ");
        entry.extend_from_slice(data);

        if !data.ends_with(b"\n") {
            entry.push(b'\n');
        }

        entry
    }
}

/// Background tasks copying one process instance's output
#[derive(Debug)]
pub struct LogPumps {
    tasks: Vec<JoinHandle<()>>,
}

impl LogPumps {
    /// Wait for both streams to drain, aborting pumps still blocked after `grace`.
    ///
    /// A grandchild that inherited the pipes can keep them open after the child itself
    /// exited, so the wait is bounded. Every line is flushed as it is written, so an
    /// aborted pump loses nothing already read.
    pub async fn finish(self, grace: Duration) {
        for mut task in self.tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                debug!("Log pump still open after {:?}, detaching", grace);
                task.abort();
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

fn open_log_file(path: &Path) -> Result<LogFile> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OverseerError::LogError(format!(
                    "Failed to create log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            OverseerError::LogFileError(format!("Failed to open {}: {}", path.display(), e))
        })?;

    Ok(LogFile {
        path: path.to_path_buf(),
        file: TokioFile::from_std(file),
    })
}

//! Engine runner with timeout and cancellation.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::InvocationSpec;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::remove_if_exists;

/// Histogram of engine wall-clock time, labelled by outcome.
pub const ENGINE_DURATION_METRIC: &str = "clipper_engine_duration_seconds";

/// Captured output of a successful engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs invocation specs as isolated subprocesses.
#[derive(Debug, Clone)]
pub struct TransformExecutor {
    cancel_rx: Option<watch::Receiver<bool>>,
    capture_limit: usize,
}

impl Default for TransformExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformExecutor {
    pub fn new() -> Self {
        Self {
            cancel_rx: None,
            capture_limit: 16 * 1024,
        }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Limit how many trailing bytes of stdout/stderr are kept.
    pub fn with_capture_limit(mut self, bytes: usize) -> Self {
        self.capture_limit = bytes.max(1);
        self
    }

    /// Run `spec`, killing the engine if it exceeds `timeout`.
    ///
    /// On any failure a partial output file is removed. On success the
    /// output file is guaranteed to exist.
    pub async fn execute(&self, spec: &InvocationSpec, timeout: Duration) -> MediaResult<ExecutionResult> {
        let program = which::which(&spec.program)
            .map_err(|_| MediaError::EngineNotFound(spec.program.clone()))?;

        if !tokio::fs::try_exists(&spec.input).await.unwrap_or(false) {
            return Err(MediaError::InputNotFound(spec.input.clone()));
        }

        debug!(command = %spec.display(), "Running engine");
        let started = Instant::now();

        let mut child = Command::new(&program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("engine stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("engine stderr not captured"))?;
        let stdout_task = tokio::spawn(read_tail(stdout, self.capture_limit));
        let stderr_task = tokio::spawn(read_tail(stderr, self.capture_limit));

        let outcome = self.wait_for_completion(&mut child, timeout).await;
        let elapsed = started.elapsed().as_secs_f64();

        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                // A killed engine may leave grandchildren holding the pipes.
                stdout_task.abort();
                stderr_task.abort();
                remove_if_exists(&spec.output).await;
                metrics::histogram!(ENGINE_DURATION_METRIC, "outcome" => "aborted").record(elapsed);
                return Err(e);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            remove_if_exists(&spec.output).await;
            metrics::histogram!(ENGINE_DURATION_METRIC, "outcome" => "failed").record(elapsed);
            return Err(MediaError::engine_failure(status.code(), stderr.trim().to_string()));
        }

        let produced = tokio::fs::metadata(&spec.output)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !produced {
            metrics::histogram!(ENGINE_DURATION_METRIC, "outcome" => "failed").record(elapsed);
            return Err(MediaError::engine_failure(
                status.code(),
                format!("engine produced no output at {}", spec.output.display()),
            ));
        }

        metrics::histogram!(ENGINE_DURATION_METRIC, "outcome" => "success").record(elapsed);
        debug!(output = %spec.output.display(), elapsed_secs = elapsed, "Engine finished");

        Ok(ExecutionResult {
            exit_code: status.code().unwrap_or(0),
            stdout,
            stderr,
        })
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child, timeout: Duration) -> MediaResult<ExitStatus> {
        let cancel_rx = self.cancel_rx.clone();

        tokio::select! {
            status = child.wait() => Ok(status?),
            _ = tokio::time::sleep(timeout) => {
                warn!(timeout_secs = timeout.as_secs(), "Engine timed out, killing process");
                let _ = child.kill().await;
                Err(MediaError::ExecutionTimeout(timeout))
            }
            _ = wait_cancelled(cancel_rx) => {
                info!("Engine cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
        }
    }
}

/// Resolve once the cancel flag is set. Never resolves without a receiver.
async fn wait_cancelled(rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Read a stream to the end, keeping only the last `limit` bytes.
fn read_tail<R>(mut reader: R, limit: usize) -> impl std::future::Future<Output = String> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async move {
        let mut kept: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    kept.extend_from_slice(&buf[..n]);
                    if kept.len() > limit {
                        let excess = kept.len() - limit;
                        kept.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&kept).into_owned()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::{build_invocation, InvocationSpec};
    use clipper_models::Operation;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Write an executable shell script standing in for FFmpeg.
    /// The last argument is always the output path.
    fn fake_engine(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn spec_for(dir: &Path, engine: &Path) -> InvocationSpec {
        let input = dir.join("input.mp4");
        std::fs::write(&input, b"video").unwrap();
        build_invocation(&Operation::Grayscale, &input, dir.join("output.mp4"))
            .unwrap()
            .with_program(engine.to_string_lossy())
    }

    const COPY_BODY: &str = r#"for last; do :; done
echo "encoding" 1>&2
printf 'processed' > "$last""#;

    #[tokio::test]
    async fn test_execute_success() {
        let dir = TempDir::new().unwrap();
        let engine = fake_engine(dir.path(), "ffmpeg-ok", COPY_BODY);
        let spec = spec_for(dir.path(), &engine);

        let result = TransformExecutor::new()
            .execute(&spec, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.stderr.contains("encoding"));
        assert_eq!(std::fs::read_to_string(&spec.output).unwrap(), "processed");
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let engine = fake_engine(
            dir.path(),
            "ffmpeg-fail",
            "for last; do :; done\nprintf 'half' > \"$last\"\necho 'Invalid data found' 1>&2\nexit 3",
        );
        let spec = spec_for(dir.path(), &engine);

        let err = TransformExecutor::new()
            .execute(&spec, Duration::from_secs(10))
            .await
            .unwrap_err();

        match err {
            MediaError::EngineFailure { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("Invalid data found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!spec.output.exists());
        assert!(spec.input.exists(), "input must be left untouched");
    }

    #[tokio::test]
    async fn test_execute_timeout_kills_engine() {
        let dir = TempDir::new().unwrap();
        let engine = fake_engine(dir.path(), "ffmpeg-slow", "exec sleep 30");
        let spec = spec_for(dir.path(), &engine);

        let started = Instant::now();
        let err = TransformExecutor::new()
            .execute(&spec, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::ExecutionTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_execute_cancel() {
        let dir = TempDir::new().unwrap();
        let engine = fake_engine(dir.path(), "ffmpeg-slow", "exec sleep 30");
        let spec = spec_for(dir.path(), &engine);
        let (tx, rx) = watch::channel(false);

        let executor = TransformExecutor::new().with_cancel(rx);
        let handle = tokio::spawn(async move { executor.execute(&spec, Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }

    #[tokio::test]
    async fn test_execute_requires_output() {
        let dir = TempDir::new().unwrap();
        let engine = fake_engine(dir.path(), "ffmpeg-noop", "exit 0");
        let spec = spec_for(dir.path(), &engine);

        let err = TransformExecutor::new()
            .execute(&spec, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::EngineFailure { .. }));
    }

    #[tokio::test]
    async fn test_execute_missing_engine() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(dir.path(), Path::new("/nonexistent/ffmpeg"));

        let err = TransformExecutor::new()
            .execute(&spec, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::EngineNotFound(_)));
    }

    #[tokio::test]
    async fn test_read_tail_keeps_last_bytes() {
        let data: &[u8] = b"0123456789";
        let tail = read_tail(data, 4).await;
        assert_eq!(tail, "6789");
    }
}

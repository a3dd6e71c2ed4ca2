//! Engine process execution with live output streaming.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use scenecast_common::config::EngineConfig;
use scenecast_common::error::{SceneError, SceneResult};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::request::CommandSpec;
use crate::sanitize::{sanitize, ChunkDecoder};

/// Default bytes read per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// One sanitized piece of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// Runs the rendering engine and streams its output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    base_args: Vec<String>,
    env: BTreeMap<String, String>,
    current_dir: Option<PathBuf>,
    chunk_size: usize,
    max_runtime: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_runtime: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            base_args: config.base_args.clone(),
            env: config.env.clone(),
            current_dir: None,
            chunk_size: config.chunk_size.max(1),
            max_runtime: config.max_runtime(),
        }
    }

    /// Arguments passed before every command spec.
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_runtime(mut self, limit: Duration) -> Self {
        self.max_runtime = Some(limit);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the configured executable can be found.
    pub fn is_available(&self) -> bool {
        engine_available(&self.program)
    }

    /// Run the engine to completion and return its exit code.
    ///
    /// `on_chunk` receives every sanitized, non-empty chunk as soon as it is
    /// read. Both pipes are drained concurrently; chunks from one pipe keep
    /// their order, but stdout and stderr chunks interleave arbitrarily.
    ///
    /// A nonzero exit code is returned as data. Only a failure to start the
    /// engine, a pipe read error, or the watchdog firing are errors. If the
    /// returned future is dropped early the engine process is killed.
    pub async fn run<F>(&self, spec: &CommandSpec, on_chunk: F) -> SceneResult<i32>
    where
        F: Fn(OutputChunk) + Send + Sync,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(spec.args())
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(program = %self.program, args = %spec, "Spawning engine");
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| SceneError::spawn(&self.program, e))?;

        tracing::info!(
            pid = ?child.id(),
            program = %self.program,
            script = spec.script().unwrap_or_default(),
            "Engine process started"
        );

        let stdout = captured(child.stdout.take(), &self.program, OutputStream::Stdout)?;
        let stderr = captured(child.stderr.take(), &self.program, OutputStream::Stderr)?;

        let chunk_size = self.chunk_size;
        let on_chunk = &on_chunk;
        let work = async {
            // Both pipes must hit EOF before the exit status is read, or
            // buffered output could be lost.
            let (out, err) = tokio::join!(
                drain(stdout, OutputStream::Stdout, chunk_size, on_chunk),
                drain(stderr, OutputStream::Stderr, chunk_size, on_chunk),
            );
            let (out_bytes, err_bytes) = (out?, err?);
            let status = child.wait().await?;
            Ok::<_, SceneError>((status, out_bytes, err_bytes))
        };

        let finished = match self.max_runtime {
            Some(limit) => tokio::time::timeout(limit, work).await.ok(),
            None => Some(work.await),
        };
        let Some(finished) = finished else {
            let limit = self.max_runtime.unwrap_or_default();
            tracing::warn!(
                program = %self.program,
                limit_secs = limit.as_secs(),
                "Engine exceeded maximum runtime, killing it"
            );
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill engine process");
            }
            return Err(SceneError::Timeout {
                secs: limit.as_secs(),
            });
        };
        let (status, out_bytes, err_bytes) = finished?;

        let exit_code = match status.code() {
            Some(code) => code,
            None => {
                tracing::warn!(%status, "Engine terminated by signal");
                -1
            }
        };

        tracing::info!(
            exit_code,
            stdout_bytes = out_bytes,
            stderr_bytes = err_bytes,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Engine process exited"
        );
        Ok(exit_code)
    }
}

/// A piped handle that is missing means the engine cannot be observed; it is
/// reported as a failure to start.
fn captured<T>(pipe: Option<T>, program: &str, stream: OutputStream) -> SceneResult<T> {
    pipe.ok_or_else(|| {
        SceneError::spawn(
            program,
            std::io::Error::other(format!("engine {stream} was not captured")),
        )
    })
}

/// Read `reader` to EOF in `chunk_size` pieces, forwarding sanitized text.
async fn drain<R, F>(
    mut reader: R,
    stream: OutputStream,
    chunk_size: usize,
    on_chunk: &F,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    F: Fn(OutputChunk),
{
    let mut buf = vec![0u8; chunk_size];
    let mut decoder = ChunkDecoder::new();
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(%stream, error = %e, "Failed reading engine output");
                return Err(e);
            }
        };
        total += n as u64;
        forward(&decoder.decode(&buf[..n]), stream, on_chunk);
    }
    forward(&decoder.finish(), stream, on_chunk);

    tracing::trace!(%stream, bytes = total, "Engine stream closed");
    Ok(total)
}

fn forward<F>(raw: &str, stream: OutputStream, on_chunk: &F)
where
    F: Fn(OutputChunk),
{
    let text = sanitize(raw);
    if !text.is_empty() {
        on_chunk(OutputChunk {
            stream,
            text: text.into_owned(),
        });
    }
}

/// Whether `program` names an existing file or resolves on `PATH`.
pub fn engine_available(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let full = dir.join(program);
        full.is_file() || (cfg!(windows) && full.with_extension("exe").is_file())
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn spec(args: &[&str]) -> CommandSpec {
        CommandSpec::new(args.iter().copied())
    }

    fn collect() -> (Mutex<Vec<OutputChunk>>, impl Fn(&Mutex<Vec<OutputChunk>>) -> String) {
        let sink = Mutex::new(Vec::new());
        let joined = |sink: &Mutex<Vec<OutputChunk>>| {
            sink.lock()
                .iter()
                .map(|c| c.text.as_str())
                .collect::<String>()
        };
        (sink, joined)
    }

    #[tokio::test]
    async fn test_streams_stdout_and_stderr() {
        let runner = ProcessRunner::new("sh");
        let (sink, _) = collect();
        let code = runner
            .run(&spec(&["-c", "echo out; echo err 1>&2"]), |chunk| {
                sink.lock().push(chunk)
            })
            .await
            .unwrap();
        assert_eq!(code, 0);

        let chunks = sink.into_inner();
        assert!(chunks
            .iter()
            .any(|c| c.stream == OutputStream::Stdout && c.text == "out\n"));
        assert!(chunks
            .iter()
            .any(|c| c.stream == OutputStream::Stderr && c.text == "err\n"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_data() {
        let runner = ProcessRunner::new("sh");
        let code = runner.run(&spec(&["-c", "exit 3"]), |_| {}).await.unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_output_is_sanitized() {
        let runner = ProcessRunner::new("sh");
        let (sink, joined) = collect();
        runner
            .run(
                &spec(&[
                    "-c",
                    r"printf 'File ready at C:\\Users\\ana\\out.png\nsaved C:\\Users\\ana\\x.py ok\n'",
                ]),
                |chunk| sink.lock().push(chunk),
            )
            .await
            .unwrap();
        assert_eq!(joined(&sink), "File ready!\nsaved ... ok\n");
    }

    #[tokio::test]
    async fn test_large_output_on_both_pipes_does_not_deadlock() {
        // Well past a 64 KiB pipe buffer on each stream.
        let script = "i=0; while [ $i -lt 4000 ]; do \
                      echo \"stdout line $i padding padding padding\"; \
                      echo \"stderr line $i padding padding padding\" 1>&2; \
                      i=$((i+1)); done";
        let runner = ProcessRunner::new("sh").with_max_runtime(Duration::from_secs(30));
        let (sink, _) = collect();
        let code = runner
            .run(&spec(&["-c", script]), |chunk| sink.lock().push(chunk))
            .await
            .unwrap();
        assert_eq!(code, 0);

        let chunks = sink.into_inner();
        let stdout: String = chunks
            .iter()
            .filter(|c| c.stream == OutputStream::Stdout)
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(stdout.lines().count(), 4000);
        assert!(stdout.starts_with("stdout line 0 "));
        assert!(stdout.trim_end().ends_with("stdout line 3999 padding padding padding"));
    }

    #[tokio::test]
    async fn test_chunks_respect_chunk_size() {
        let runner = ProcessRunner::new("sh").with_chunk_size(4);
        let (sink, joined) = collect();
        runner
            .run(&spec(&["-c", "printf abcdefghij"]), |chunk| {
                sink.lock().push(chunk)
            })
            .await
            .unwrap();
        assert!(sink.lock().iter().all(|c| c.text.len() <= 4));
        assert_eq!(joined(&sink), "abcdefghij");
    }

    #[tokio::test]
    async fn test_env_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new("sh")
            .with_env("SCENECAST_TEST_VALUE", "42")
            .with_current_dir(dir.path());
        let (sink, joined) = collect();
        runner
            .run(
                &spec(&["-c", "echo $SCENECAST_TEST_VALUE; touch marker"]),
                |chunk| sink.lock().push(chunk),
            )
            .await
            .unwrap();
        assert_eq!(joined(&sink), "42\n");
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failure() {
        let runner = ProcessRunner::new("scenecast-definitely-not-installed");
        let err = runner.run(&spec(&[]), |_| {}).await.unwrap_err();
        assert!(matches!(err, SceneError::SpawnFailure { .. }));
    }

    #[tokio::test]
    async fn test_watchdog_kills_hung_engine() {
        let runner = ProcessRunner::new("sh").with_max_runtime(Duration::from_millis(200));
        let started = Instant::now();
        let err = runner
            .run(&spec(&["-c", "sleep 30"]), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SceneError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_multibyte_output_never_yields_empty_chunks() {
        let runner = ProcessRunner::new("sh").with_chunk_size(1);
        let (sink, joined) = collect();
        runner
            .run(&spec(&["-c", "printf 'héllo █ 50%%'"]), |chunk| {
                sink.lock().push(chunk)
            })
            .await
            .unwrap();
        assert!(sink.lock().iter().all(|c| !c.text.is_empty()));
        assert_eq!(joined(&sink), "héllo █ 50%");
    }

    #[test]
    fn test_empty_text_is_not_forwarded() {
        let (sink, _) = collect();
        let on_chunk = |chunk| sink.lock().push(chunk);
        forward("", OutputStream::Stdout, &on_chunk);
        forward("x", OutputStream::Stderr, &on_chunk);
        let chunks = sink.into_inner();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "x");
    }

    #[test]
    fn test_missing_pipe_is_spawn_failure() {
        let err = captured::<()>(None, "manim", OutputStream::Stdout).unwrap_err();
        assert!(matches!(err, SceneError::SpawnFailure { .. }));
        assert!(err.to_string().contains("stdout was not captured"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropping_run_kills_engine() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new("sh").with_current_dir(dir.path());
        let pid_file = dir.path().join("pid");

        let run_spec = spec(&["-c", "echo $$ > pid; exec sleep 30"]);
        let run = runner.run(&run_spec, |_| {});
        let timed_out = tokio::time::timeout(Duration::from_millis(500), run).await;
        assert!(timed_out.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let proc_dir = Path::new("/proc").join(&pid);
        let mut gone = false;
        for _ in 0..50 {
            // A killed but not yet reaped child lingers as a zombie.
            let state = std::fs::read_to_string(proc_dir.join("stat")).unwrap_or_default();
            let zombie = state
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z'));
            if state.is_empty() || zombie {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(gone, "engine process {pid} still running");
    }

    #[test]
    fn test_engine_available() {
        assert!(engine_available("sh"));
        assert!(!engine_available("scenecast-definitely-not-installed"));
        assert!(!engine_available("/nonexistent/bin/manim"));
    }
}

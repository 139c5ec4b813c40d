use crate::constants::limits::MAX_CAPTURE_BYTES;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

const READER_GRACE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub text: String,
}

pub type OutputObserver = Arc<dyn Fn(&OutputChunk) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub observer: Option<OutputObserver>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: Option<Vec<u8>>) -> Self {
        self.stdin = input;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn observer(mut self, observer: Option<OutputObserver>) -> Self {
        self.observer = observer;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration_ms: u128,
}

impl ProcessOutput {
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end_matches(&['\r', '\n'][..]);
        let stderr = self.stderr.trim_end_matches(&['\r', '\n'][..]);
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

#[derive(Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

fn spawn_reader<R>(
    reader: Option<R>,
    stream: StreamKind,
    capture: Arc<Mutex<Capture>>,
    observer: Option<OutputObserver>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut buf = [0u8; 8192];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            if let Some(observer) = observer.as_ref() {
                observer(&OutputChunk {
                    stream,
                    text: String::from_utf8_lossy(&buf[..n]).to_string(),
                });
            }
            let mut guard = capture.lock().unwrap_or_else(|err| err.into_inner());
            let remaining = MAX_CAPTURE_BYTES.saturating_sub(guard.bytes.len());
            if n <= remaining {
                guard.bytes.extend_from_slice(&buf[..n]);
            } else {
                guard.bytes.extend_from_slice(&buf[..remaining]);
                guard.truncated = true;
            }
        }
    })
}

async fn settle_reader(task: JoinHandle<()>) {
    let abort = task.abort_handle();
    if tokio::time::timeout(Duration::from_millis(READER_GRACE_MS), task)
        .await
        .is_err()
    {
        abort.abort();
    }
}

fn take_capture(capture: &Arc<Mutex<Capture>>) -> (String, bool) {
    let guard = capture.lock().unwrap_or_else(|err| err.into_inner());
    (String::from_utf8_lossy(&guard.bytes).to_string(), guard.truncated)
}

// A timeout kills only this child; partial output captured so far is kept.
pub async fn run_process(spec: ProcessSpec) -> std::io::Result<ProcessOutput> {
    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.stdin(if spec.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let started = Instant::now();
    let mut child = cmd.spawn()?;

    if let Some(input) = spec.stdin.as_ref() {
        if let Some(mut writer) = child.stdin.take() {
            let input = input.clone();
            tokio::spawn(async move {
                let _ = writer.write_all(&input).await;
                let _ = writer.shutdown().await;
            });
        }
    }

    let stdout_capture = Arc::new(Mutex::new(Capture::default()));
    let stderr_capture = Arc::new(Mutex::new(Capture::default()));
    let stdout_task = spawn_reader(
        child.stdout.take(),
        StreamKind::Stdout,
        stdout_capture.clone(),
        spec.observer.clone(),
    );
    let stderr_task = spawn_reader(
        child.stderr.take(),
        StreamKind::Stderr,
        stderr_capture.clone(),
        spec.observer.clone(),
    );

    let mut timed_out = false;
    let status = match spec.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                timed_out = true;
                let _ = child.kill().await;
                child.wait().await
            }
        },
        None => child.wait().await,
    }?;

    settle_reader(stdout_task).await;
    settle_reader(stderr_task).await;

    let (stdout, stdout_truncated) = take_capture(&stdout_capture);
    let (stderr, stderr_truncated) = take_capture(&stderr_capture);
    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
        duration_ms: started.elapsed().as_millis(),
    })
}

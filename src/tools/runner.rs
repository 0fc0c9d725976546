//! Process Runner
//!
//! Launches one tool as a child process with stdout and stderr attached to
//! one pipe, so lines arrive in the order the tool wrote them. Every line is
//! broadcast before the next one is read, and the `done` event for a run is
//! always emitted after all of its `log` events.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::config::resolve_against;
use crate::core::error::LaunchError;
use crate::core::hub::BroadcastHub;
use crate::tools::Tool;

/// Outcome of one completed execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Process exit code; -1 when the process was terminated by a signal.
    pub status: i32,
    /// Every output line, stdout and stderr interleaved as written
    pub logs: Vec<String>,
    /// One-line description: command line and exit code
    pub summary: String,
}

#[derive(Serialize)]
struct DoneEvent<'a> {
    event: &'static str,
    #[serde(flatten)]
    result: &'a RunResult,
}

/// A fully-resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// The command line as the caller knows it (configured path + args).
    pub display: String,
}

impl Invocation {
    pub fn new(program: PathBuf, configured: &str, args: Vec<String>) -> Self {
        let display = std::iter::once(configured.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            program,
            args,
            display,
        }
    }
}

/// Normalize a JSON `args` value into string arguments: a string becomes one
/// argument, list items are stringified, anything else yields none.
pub fn normalize_args(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Clone)]
pub struct ProcessRunner {
    hub: BroadcastHub,
    working_dir: PathBuf,
}

impl ProcessRunner {
    pub fn new(hub: BroadcastHub, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            hub,
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Command line for `tool`: its path resolved against the working
    /// directory, followed by `args`.
    pub fn invocation(&self, tool: &Tool, args: Vec<String>) -> Invocation {
        Invocation::new(resolve_against(&self.working_dir, &tool.path), &tool.path, args)
    }

    /// Run `invocation` to completion.
    ///
    /// Fails only when the process cannot be started; a non-zero exit code
    /// is a normal result.
    pub async fn run(&self, invocation: &Invocation) -> Result<RunResult, LaunchError> {
        debug!(command = %invocation.display, "Launching tool process");

        let launch_error = |source| LaunchError {
            command: invocation.display.clone(),
            source,
        };

        let (reader, writer) = io::pipe().map_err(launch_error)?;
        let stderr_writer = writer.try_clone().map_err(launch_error)?;

        // The command keeps its copies of the write end until dropped; EOF on
        // the reader needs every copy outside the child closed.
        let mut child = {
            let mut command = Command::new(&invocation.program);
            command
                .args(&invocation.args)
                .current_dir(&self.working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::from(writer))
                .stderr(Stdio::from(stderr_writer))
                .kill_on_drop(true);
            command.spawn().map_err(launch_error)?
        };

        let mut lines = BufReader::new(async_reader(reader).map_err(launch_error)?).split(b'\n');
        let mut logs = Vec::new();
        loop {
            let line = match lines.next_segment().await {
                Ok(Some(bytes)) => decode_line(&bytes),
                Ok(None) => break,
                Err(e) => {
                    warn!(command = %invocation.display, "Error reading tool output: {}", e);
                    break;
                }
            };
            self.hub.broadcast(&json!({"event": "log", "data": line})).await;
            logs.push(line);
        }

        let status = match child.wait().await {
            Ok(exit) => exit.code().unwrap_or(-1),
            Err(e) => {
                warn!(command = %invocation.display, "Failed to collect exit status: {}", e);
                -1
            }
        };

        let result = RunResult {
            status,
            summary: format!("Executed: {} (exit {})", invocation.display, status),
            logs,
        };
        self.hub
            .broadcast(&DoneEvent {
                event: "done",
                result: &result,
            })
            .await;
        debug!(command = %invocation.display, status, "Tool process finished");
        Ok(result)
    }
}

type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read end of the output pipe, registered with the runtime.
#[cfg(unix)]
fn async_reader(reader: io::PipeReader) -> io::Result<OutputReader> {
    let receiver = tokio::net::unix::pipe::Receiver::from_owned_fd(reader.into())?;
    Ok(Box::new(receiver))
}

#[cfg(windows)]
fn async_reader(reader: io::PipeReader) -> io::Result<OutputReader> {
    let handle = std::os::windows::io::OwnedHandle::from(reader);
    Ok(Box::new(tokio::fs::File::from_std(std::fs::File::from(handle))))
}

/// Lossy UTF-8 decode with trailing whitespace (including `\r`) removed.
fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tools::default_input_schema;
    use serde_json::Value;

    fn tool(path: &str) -> Tool {
        Tool {
            name: "t".into(),
            description: "d".into(),
            input_schema: default_input_schema(),
            path: path.into(),
            hidden: false,
        }
    }

    fn frames_to_events(frames: Vec<bytes::Bytes>) -> Vec<Value> {
        frames
            .iter()
            .map(|f| {
                let text = std::str::from_utf8(f).unwrap();
                let json = text.strip_prefix("data: ").unwrap().trim_end();
                serde_json::from_str(json).unwrap()
            })
            .collect()
    }

    #[test]
    fn normalizes_arguments() {
        assert_eq!(normalize_args(Some(&json!("one"))), ["one"]);
        assert_eq!(normalize_args(Some(&json!(["a", 5, true]))), ["a", "5", "true"]);
        assert!(normalize_args(Some(&json!({"x": 1}))).is_empty());
        assert!(normalize_args(None).is_empty());
    }

    #[test]
    fn invocation_resolves_relative_paths_but_displays_configured_path() {
        let runner = ProcessRunner::new(BroadcastHub::new(), "/srv/project");
        let inv = runner.invocation(&tool("./bin/run.sh"), vec!["--fast".into()]);
        assert_eq!(inv.program, PathBuf::from("/srv/project/bin/run.sh"));
        assert_eq!(inv.display, "./bin/run.sh --fast");
    }

    #[test]
    fn decodes_invalid_utf8_with_replacement() {
        assert_eq!(decode_line(b"\xffabc\r"), "\u{fffd}abc");
    }

    #[tokio::test]
    async fn runs_echo_and_captures_output() {
        let runner = ProcessRunner::new(BroadcastHub::new(), std::env::temp_dir());
        let inv = runner.invocation(&tool("/bin/echo"), vec!["hi".into()]);
        let result = runner.run(&inv).await.unwrap();
        assert_eq!(result.status, 0);
        assert_eq!(result.logs, ["hi"]);
        assert_eq!(result.summary, "Executed: /bin/echo hi (exit 0)");
    }

    #[tokio::test]
    async fn merges_stderr_and_reports_nonzero_exit() {
        let runner = ProcessRunner::new(BroadcastHub::new(), std::env::temp_dir());
        let inv = runner.invocation(
            &tool("/bin/sh"),
            vec!["-c".into(), "echo out; echo err 1>&2; exit 3".into()],
        );
        let result = runner.run(&inv).await.unwrap();
        assert_eq!(result.status, 3);
        assert_eq!(result.logs, ["out", "err"]);
    }

    #[tokio::test]
    async fn keeps_stdout_and_stderr_interleaving() {
        let runner = ProcessRunner::new(BroadcastHub::new(), std::env::temp_dir());
        let script = "i=1; while [ $i -le 200 ]; do echo o$i; echo e$i 1>&2; i=$((i+1)); done";
        let inv = runner.invocation(&tool("/bin/sh"), vec!["-c".into(), script.into()]);
        let result = runner.run(&inv).await.unwrap();

        let expected: Vec<String> = (1..=200)
            .flat_map(|i| [format!("o{}", i), format!("e{}", i)])
            .collect();
        assert_eq!(result.logs, expected);
    }

    #[tokio::test]
    async fn subscriber_keeps_up_with_a_long_burst_of_output() {
        let hub = BroadcastHub::new();
        let mut subscriber = hub.subscribe();
        let consumer = tokio::spawn(async move {
            let mut logs = Vec::new();
            loop {
                let frame = subscriber.recv().await.unwrap();
                let event = frames_to_events(vec![frame]).remove(0);
                if event["event"] == "done" {
                    return (logs, event);
                }
                logs.push(event["data"].as_str().unwrap().to_string());
            }
        });

        let runner = ProcessRunner::new(hub.clone(), std::env::temp_dir());
        let script = "i=1; while [ $i -le 3000 ]; do echo line$i; i=$((i+1)); done";
        let inv = runner.invocation(&tool("/bin/sh"), vec!["-c".into(), script.into()]);
        let result = runner.run(&inv).await.unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        let (logs, done) = consumer.await.unwrap();
        assert_eq!(logs.len(), 3000);
        assert_eq!(logs, result.logs);
        assert_eq!(logs[2999], "line3000");
        assert_eq!(done["status"], 0);
    }

    #[tokio::test]
    async fn broadcasts_logs_in_order_then_done() {
        let hub = BroadcastHub::new();
        let mut subscriber = hub.subscribe();
        let runner = ProcessRunner::new(hub.clone(), std::env::temp_dir());
        let inv = runner.invocation(
            &tool("/bin/sh"),
            vec!["-c".into(), "echo one; echo two; echo three".into()],
        );
        let result = runner.run(&inv).await.unwrap();

        let mut frames = Vec::new();
        for _ in 0..4 {
            frames.push(subscriber.recv().await.unwrap());
        }
        let events = frames_to_events(frames);
        let logs: Vec<_> = events[..3].iter().map(|e| e["data"].as_str().unwrap()).collect();
        assert_eq!(logs, ["one", "two", "three"]);
        assert!(events[..3].iter().all(|e| e["event"] == "log"));
        assert_eq!(events[3]["event"], "done");
        assert_eq!(events[3]["status"], 0);
        assert_eq!(events[3]["logs"], json!(result.logs));
        assert_eq!(events[3]["summary"], json!(result.summary));
    }

    #[tokio::test]
    async fn launch_failure_returns_error_and_broadcasts_nothing() {
        let hub = BroadcastHub::new();
        let mut subscriber = hub.subscribe();
        let runner = ProcessRunner::new(hub.clone(), std::env::temp_dir());
        let inv = runner.invocation(&tool("/no/such/binary"), vec!["x".into()]);
        let err = runner.run(&inv).await.unwrap_err();
        assert_eq!(err.command, "/no/such/binary x");

        hub.broadcast(&json!({"marker": true})).await;
        let first = subscriber.recv().await.unwrap();
        assert_eq!(&first[..], b"data: {\"marker\":true}\n\n");
    }
}

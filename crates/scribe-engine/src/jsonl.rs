use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use scribe_core::{AgentRuntime, RuntimeError, RuntimeRequest, UpstreamStream};

/// Where newline-delimited JSON events come from.
#[derive(Clone, Debug)]
pub enum JsonLinesSource {
    /// A recorded event stream, replayed as-is. The prompt is ignored.
    Replay(PathBuf),
    /// An agent process. The prompt is passed as the last argument and the
    /// resume token as `--resume <token>`.
    Command { program: String, args: Vec<String> },
}

/// Runtime that reads one JSON event per line.
///
/// Blank lines are skipped. A line that is not valid JSON ends the stream
/// with [`RuntimeError::Decode`]. A process that exits non-zero ends it with
/// [`RuntimeError::Exited`].
pub struct JsonLinesRuntime {
    source: JsonLinesSource,
}

impl JsonLinesRuntime {
    pub fn new(source: JsonLinesSource) -> Self {
        Self { source }
    }

    pub fn replay(path: impl Into<PathBuf>) -> Self {
        Self::new(JsonLinesSource::Replay(path.into()))
    }

    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(JsonLinesSource::Command {
            program: program.into(),
            args,
        })
    }

    pub fn source(&self) -> &JsonLinesSource {
        &self.source
    }

    /// Full argument list for one request.
    pub fn command_args(base: &[String], request: &RuntimeRequest) -> Vec<String> {
        let mut args = base.to_vec();
        if let Some(token) = &request.resume {
            args.push("--resume".to_string());
            args.push(token.clone());
        }
        args.push(request.prompt.clone());
        args
    }
}

#[async_trait]
impl AgentRuntime for JsonLinesRuntime {
    fn name(&self) -> &str {
        match self.source {
            JsonLinesSource::Replay(_) => "replay",
            JsonLinesSource::Command { .. } => "command",
        }
    }

    async fn query(&self, request: &RuntimeRequest) -> Result<UpstreamStream, RuntimeError> {
        match &self.source {
            JsonLinesSource::Replay(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| RuntimeError::Spawn(format!("open {}: {e}", path.display())))?;
                debug!(path = %path.display(), "replaying event file");
                Ok(line_stream(BufReader::new(file), None))
            }
            JsonLinesSource::Command { program, args } => {
                let args = Self::command_args(args, request);
                let mut child = Command::new(program)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| RuntimeError::Spawn(format!("{program}: {e}")))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| RuntimeError::Spawn("child stdout not captured".into()))?;
                info!(
                    program = %program,
                    pid = ?child.id(),
                    resume = request.resume.is_some(),
                    "agent runtime started"
                );
                Ok(line_stream(BufReader::new(stdout), Some(child)))
            }
        }
    }
}

struct LineSource<R> {
    lines: Lines<R>,
    line_no: usize,
    /// Kept alive with the stream so dropping it kills the process.
    child: Option<Child>,
}

fn line_stream<R>(reader: R, child: Option<Child>) -> UpstreamStream
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let source = LineSource {
        lines: reader.lines(),
        line_no: 0,
        child,
    };

    Box::pin(stream::unfold(Some(source), |state| async move {
        let mut src = state?;
        loop {
            match src.lines.next_line().await {
                Ok(Some(line)) => {
                    src.line_no += 1;
                    match parse_line(&line, src.line_no) {
                        None => continue,
                        Some(Ok(event)) => return Some((Ok(event), Some(src))),
                        Some(Err(e)) => return Some((Err(e), None)),
                    }
                }
                Ok(None) => {
                    let child = src.child.as_mut()?;
                    return match child.wait().await {
                        Ok(status) if status.success() => None,
                        Ok(status) => Some((Err(RuntimeError::Exited(status.code().unwrap_or(-1))), None)),
                        Err(e) => Some((Err(RuntimeError::Io(e.to_string())), None)),
                    };
                }
                Err(e) => {
                    return Some((Err(RuntimeError::StreamInterrupted(e.to_string())), None));
                }
            }
        }
    }))
}

fn parse_line(line: &str, line_no: usize) -> Option<Result<Value, RuntimeError>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(trimmed)
            .map_err(|e| RuntimeError::Decode(format!("line {line_no}: {e}"))),
    )
}

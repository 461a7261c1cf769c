//! Spawning one external tool and streaming its output.
//!
//! Stdout and stderr are drained on their own threads and forwarded as
//! events line by line; the main wait loop alternates between a short
//! timed wait on the child and a poll of the cancel channel, so a cancel
//! request takes effect within one poll interval.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::executor::{CancelRequest, ExecEvent, ExecRequest};

/// How a streamed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Exited { code: Option<i32> },
    Cancelled,
}

/// Run the request's command, forwarding output and the terminal event.
///
/// Returns `Err` only when the run could not be carried out at all; a
/// tool that starts and fails is an `Exited` outcome.
#[instrument(skip_all, fields(workdir = %request.workdir.display()))]
pub fn stream_command(
    request: &ExecRequest,
    events: &Sender<ExecEvent>,
    cancel: &Receiver<CancelRequest>,
) -> Result<StreamOutcome> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| anyhow!("empty argument list"))?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(&request.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;
    debug!(program, pid = child.id(), "tool spawned");
    send(events, ExecEvent::Started { pid: child.id() });

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let out_reader = spawn_line_reader(stdout, events.clone());
    let err_reader = spawn_line_reader(stderr, events.clone());

    let outcome = wait_or_cancel(&mut child, request.poll_interval, cancel)?;

    // Join before the terminal event so every line precedes it.
    join_reader(out_reader, "stdout")?;
    join_reader(err_reader, "stderr")?;

    match outcome {
        StreamOutcome::Exited { code } => {
            debug!(program, exit_code = ?code, "tool exited");
            send(events, ExecEvent::Exited { code });
        }
        StreamOutcome::Cancelled => {
            warn!(program, "tool cancelled");
            send(events, ExecEvent::Cancelled);
        }
    }
    Ok(outcome)
}

fn wait_or_cancel(
    child: &mut Child,
    poll: Duration,
    cancel: &Receiver<CancelRequest>,
) -> Result<StreamOutcome> {
    loop {
        match cancel.try_recv() {
            Ok(CancelRequest) => {
                warn!(pid = child.id(), "cancel requested, killing tool");
                // The child may have exited in the race window; the wait
                // below settles it either way.
                if let Err(err) = child.kill() {
                    debug!(%err, "kill after exit");
                }
                child.wait().context("failed to reap cancelled tool")?;
                return Ok(StreamOutcome::Cancelled);
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
        }
        if let Some(status) = child.wait_timeout(poll).context("failed to wait on tool")? {
            return Ok(StreamOutcome::Exited {
                code: status.code(),
            });
        }
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    events: Sender<ExecEvent>,
) -> JoinHandle<Result<()>> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .context("failed to read tool output")?;
            if n == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
            // A dropped receiver must not stall the child on a full pipe,
            // so keep draining even when nobody listens.
            let _ = events.send(ExecEvent::Line(line));
        }
    })
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

fn join_reader(handle: JoinHandle<Result<()>>, label: &str) -> Result<()> {
    match handle.join() {
        Ok(result) => result.with_context(|| format!("{label} reader failed")),
        Err(_) => Err(anyhow!("{label} reader thread panicked")),
    }
}

fn send(events: &Sender<ExecEvent>, event: ExecEvent) {
    if events.send(event).is_err() {
        warn!("event receiver dropped before run completion");
    }
}

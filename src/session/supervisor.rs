use super::{Outcome, Shared, kill};
use crate::command::EncodeCommand;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, error, info};

pub(super) type OutputLines = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;

/// Encoders rewrite their progress line with `\r`, so both count as line ends.
const LINE_DELIMITERS: &[u8] = b"\r\n";

/// Output without a line end past this size fails the session.
pub(super) const MAX_LINE_LENGTH: usize = 64 * 1024;

fn line_stream<R>(reader: R) -> impl Stream<Item = io::Result<String>> + Send
where
    R: AsyncRead + Send + 'static,
{
    let codec = AnyDelimiterCodec::new_with_max_length(
        LINE_DELIMITERS.to_vec(),
        Vec::new(),
        MAX_LINE_LENGTH,
    );
    FramedRead::new(reader, codec)
        .map(|chunk| {
            chunk
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(io::Error::other)
        })
        .filter(|line| !matches!(line, Ok(line) if line.is_empty()))
}

/// Spawn the encoder with stdout and stderr merged into one line stream.
pub(super) fn spawn_encoder(command: &EncodeCommand) -> io::Result<(Child, OutputLines)> {
    let mut cmd = Command::new(command.program());
    cmd.args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // own process group, so a stop also reaches anything the encoder forked
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        _ = child.start_kill();
        return Err(io::Error::other("encoder output pipes are unavailable"));
    };

    let output = line_stream(stdout).merge(line_stream(stderr));
    Ok((child, Box::pin(output)))
}

/// Drain the encoder output into the log until end-of-stream, await its exit,
/// and kill it when asked. Enters `Terminated` exactly once on return.
pub(super) async fn supervise(
    session_id: u64,
    mut child: Child,
    mut output: OutputLines,
    mut stop_rx: oneshot::Receiver<()>,
    shared: Arc<Shared>,
) {
    let pid = child.id();
    let mut status: Option<io::Result<ExitStatus>> = None;
    let mut drained = false;
    let mut stop_pending = true;
    let mut failure: Option<String> = None;

    while !(drained && status.is_some()) {
        tokio::select! {
            line = output.next(), if !drained => match line {
                Some(Ok(line)) => shared.log().append(line),
                Some(Err(error)) => {
                    error!(session_id, ?error, "Encoder output stream failed");
                    failure.get_or_insert_with(|| format!("output stream broke: {error}"));
                    drained = true;
                    kill::kill_child(&mut child, pid);
                }
                None => {
                    debug!(session_id, "Encoder output closed");
                    drained = true;
                }
            },
            result = child.wait(), if status.is_none() => {
                info!(session_id, ?pid, ?result, "Encoder exited");
                status = Some(result);
            }
            _ = &mut stop_rx, if stop_pending => {
                stop_pending = false;
                debug!(session_id, ?pid, "Killing encoder");
                kill::kill_child(&mut child, pid);
            }
        }
    }

    let outcome = match (failure, status) {
        (Some(failure), _) => Outcome::Failed(failure),
        (None, Some(Ok(status))) => Outcome::Exited(status.code()),
        (None, Some(Err(error))) => {
            Outcome::Failed(format!("could not wait for encoder: {error}"))
        }
        (None, None) => Outcome::Failed("encoder exit status unavailable".to_string()),
    };

    shared.terminate(outcome);
}

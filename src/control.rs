use crate::command::{CommandBuilder, StreamRequest};
use crate::error::{StreamError, ValidationError};
use crate::log_sink::LogSink;
use crate::session::{SessionState, StopAck, StopScope, StreamSession};
use serde::Serialize;
use std::io::ErrorKind;
use tracing::{info, warn};

/// Returned by a successful [`ControlInterface::start`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: u64,
    /// The encoder command line with the stream key redacted.
    pub command: String,
}

/// Entry point for callers: validates requests and drives the single
/// [`StreamSession`].
pub struct ControlInterface {
    session: StreamSession,
    builder: CommandBuilder,
}

impl ControlInterface {
    pub fn new(builder: CommandBuilder, log_lines: usize, stop_scope: StopScope) -> Self {
        Self {
            session: StreamSession::new(LogSink::new(log_lines), stop_scope),
            builder,
        }
    }

    /// Validate `request` and start streaming it.
    ///
    /// Validation failures never touch the session.
    pub async fn start(&self, request: StreamRequest) -> Result<SessionHandle, StreamError> {
        validate(&request)
            .await
            .inspect_err(|error| warn!(?request, %error, "Rejected stream request"))?;

        let command = self.builder.build(&request);
        let shown = command.to_string();
        let session_id = self.session.start(command)?;

        info!(
            session_id,
            source = %request.source_path.display(),
            vertical = request.vertical,
            "Streaming session started"
        );
        Ok(SessionHandle {
            session_id,
            command: shown,
        })
    }

    pub fn stop(&self) -> StopAck {
        self.session.stop()
    }

    /// The most recent `max_lines` log lines, oldest first.
    pub fn logs(&self, max_lines: usize) -> Vec<String> {
        self.session.log().snapshot(max_lines)
    }

    pub fn log_capacity(&self) -> usize {
        self.session.log().capacity()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub async fn wait_terminated(&self) -> SessionState {
        self.session.wait_terminated().await
    }
}

/// Check that the source is a readable regular file and the key is not blank.
pub async fn validate(request: &StreamRequest) -> Result<(), ValidationError> {
    if request.stream_key.trim().is_empty() {
        return Err(ValidationError::EmptyStreamKey);
    }

    let path = &request.source_path;
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(ValidationError::MissingSource(path.clone()));
        }
        Err(error) => {
            return Err(ValidationError::UnreadableSource {
                path: path.clone(),
                reason: error.to_string(),
            });
        }
    };

    if !metadata.is_file() {
        return Err(ValidationError::NotAFile(path.clone()));
    }

    tokio::fs::File::open(path)
        .await
        .map(drop)
        .map_err(|error| ValidationError::UnreadableSource {
            path: path.clone(),
            reason: error.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ExitReason, STOPPED_MARKER};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(10);

    struct Workspace(PathBuf);

    impl Workspace {
        fn new(name: &str) -> Self {
            let dir_name = format!("rtmp-relay-control-{name}-{}", std::process::id());
            let dir = std::env::temp_dir().join(dir_name);
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn clip(&self) -> PathBuf {
            let path = self.0.join("clip.mp4");
            std::fs::write(&path, b"not really a video").unwrap();
            path
        }
    }

    impl Drop for Workspace {
        fn drop(&mut self) {
            _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn control(script: &str) -> ControlInterface {
        let line = format!(r#"sh -c "{script}" encoder-stub"#);
        ControlInterface::new(
            CommandBuilder::from_command_line(&line).unwrap(),
            25,
            StopScope::Session,
        )
    }

    #[tokio::test]
    async fn test_validation_short_circuit() {
        let workspace = Workspace::new("validation");
        let control = control("exit 0");

        let missing_path = workspace.0.join("missing.mp4");
        let missing = StreamRequest::new(missing_path, "abcd-1234", false);
        assert!(matches!(
            control.start(missing).await,
            Err(StreamError::Validation(ValidationError::MissingSource(_)))
        ));

        let blank_key = StreamRequest::new(workspace.clip(), "  ", false);
        assert!(matches!(
            control.start(blank_key).await,
            Err(StreamError::Validation(ValidationError::EmptyStreamKey))
        ));

        let directory = StreamRequest::new(workspace.0.clone(), "abcd-1234", false);
        assert!(matches!(
            control.start(directory).await,
            Err(StreamError::Validation(ValidationError::NotAFile(_)))
        ));

        assert_eq!(control.state(), SessionState::Idle);
        assert!(control.logs(25).is_empty());
    }

    #[tokio::test]
    async fn test_immediate_exit_end_to_end() {
        let workspace = Workspace::new("exit");
        let control = control("exit 0");

        let request = StreamRequest::new(workspace.clip(), "abcd-1234", false);
        let handle = control.start(request).await.unwrap();
        assert!(!handle.command.contains("abcd-1234"));
        assert!(handle.command.ends_with("rtmp://a.rtmp.youtube.com/live2/****"));

        let state = timeout(WAIT, control.wait_terminated()).await.unwrap();
        assert_eq!(
            state,
            SessionState::Terminated(ExitReason::Ended { code: Some(0) })
        );

        let logs = control.logs(25);
        let markers = logs.iter().filter(|line| ExitReason::is_marker(line)).count();
        assert_eq!(markers, 1);
        assert!(ExitReason::is_marker(logs.last().unwrap()));
        assert!(logs.iter().all(|line| !line.contains("abcd-1234")));
    }

    #[tokio::test]
    async fn test_start_stop_end_to_end() {
        let workspace = Workspace::new("stop");
        let control = control("exec sleep 30");

        let request = StreamRequest::new(workspace.clip(), "abcd-1234", true);
        control.start(request.clone()).await.unwrap();
        assert_eq!(control.state(), SessionState::Running);
        assert!(matches!(
            control.start(request).await,
            Err(StreamError::AlreadyActive)
        ));

        assert_eq!(control.stop(), StopAck::Signalled);
        let state = timeout(WAIT, control.wait_terminated()).await.unwrap();
        assert_eq!(state, SessionState::Terminated(ExitReason::StoppedByUser));

        assert_eq!(control.stop(), StopAck::NotRunning);
        let logs = control.logs(25);
        assert_eq!(logs.iter().filter(|line| *line == STOPPED_MARKER).count(), 1);
        assert_eq!(logs.last().unwrap(), STOPPED_MARKER);
    }
}

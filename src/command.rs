use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

pub const INGEST_URL: &str = "rtmp://a.rtmp.youtube.com/live2";
pub const DEFAULT_ENCODER: &str = "ffmpeg";

pub const VIDEO_CODEC: &str = "libx264";
pub const VIDEO_PRESET: &str = "veryfast";
pub const VIDEO_BITRATE: &str = "2500k";
pub const VIDEO_BUFSIZE: &str = "5000k";
pub const KEYFRAME_INTERVAL: u32 = 60;
pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_BITRATE: &str = "128k";
pub const OUTPUT_FORMAT: &str = "flv";

const VIDEO_OPTIONS: [(&str, &str); 5] = [
    ("-c:v", VIDEO_CODEC),
    ("-preset", VIDEO_PRESET),
    ("-b:v", VIDEO_BITRATE),
    ("-maxrate", VIDEO_BITRATE),
    ("-bufsize", VIDEO_BUFSIZE),
];

const AUDIO_OPTIONS: [(&str, &str); 2] = [("-c:a", AUDIO_CODEC), ("-b:a", AUDIO_BITRATE)];
/// Output frame (width, height) used for vertical streams.
pub const VERTICAL_FRAME: (u32, u32) = (720, 1280);

const REDACTED: &str = "****";

/// A request to push `source_path` to the ingest endpoint under `stream_key`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct StreamRequest {
    pub source_path: PathBuf,
    pub stream_key: String,
    #[serde(default)]
    pub vertical: bool,
}

impl StreamRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        stream_key: impl Into<String>,
        vertical: bool,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            stream_key: stream_key.into(),
            vertical,
        }
    }
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("source_path", &self.source_path)
            .field("stream_key", &REDACTED)
            .field("vertical", &self.vertical)
            .finish()
    }
}

/// Full encoder invocation. Displays with the stream key redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodeCommand {
    program: String,
    args: Vec<String>,
    encoder_name: String,
    redact_destination: bool,
}

impl EncodeCommand {
    /// Build a command from raw parts, with nothing to redact.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        Self {
            encoder_name: program.clone(),
            program,
            args: args.into_iter().map(Into::into).collect(),
            redact_destination: false,
        }
    }

    /// Name the encoder process when `program` is only a wrapper around it.
    pub fn with_encoder_name(mut self, encoder_name: impl Into<String>) -> Self {
        self.encoder_name = encoder_name.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The encoder binary itself, which is `program` unless a wrapper such
    /// as `nice` runs it.
    pub fn encoder_name(&self) -> &str {
        &self.encoder_name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The destination URL, including the stream key.
    pub fn destination(&self) -> Option<&str> {
        self.args
            .last()
            .map(String::as_str)
            .filter(|arg| arg.starts_with(INGEST_URL))
    }

    fn redact<'a>(&self, index: usize, token: &'a str) -> Cow<'a, str> {
        let is_destination = index + 1 == self.args.len() && token.starts_with(INGEST_URL);
        if self.redact_destination && is_destination {
            Cow::Owned(format!("{INGEST_URL}/{REDACTED}"))
        } else {
            Cow::Borrowed(token)
        }
    }
}

impl fmt::Display for EncodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for (index, arg) in self.args.iter().enumerate() {
            write!(f, " {}", self.redact(index, arg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for EncodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .args
            .iter()
            .enumerate()
            .map(|(index, arg)| self.redact(index, arg))
            .collect::<Vec<_>>();
        f.debug_struct("EncodeCommand")
            .field("program", &self.program)
            .field("args", &args)
            .field("encoder_name", &self.encoder_name)
            .finish()
    }
}

/// Renders a [`StreamRequest`] into the encoder's argument vector.
///
/// The program and any leading arguments (e.g. a `nice -n 10` wrapper) are
/// configurable; the encode parameters are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    program: String,
    leading_args: Vec<String>,
    encoder_name: Option<String>,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODER)
    }
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            encoder_name: None,
        }
    }

    /// Parse a command line such as `nice -n 10 ffmpeg` into program and
    /// leading arguments. Double quotes group words.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let (program, leading_args) = split_command_into_parts(line)?;
        Some(Self {
            program,
            leading_args,
            encoder_name: None,
        })
    }

    /// Override the process name that `StopScope::AllInstances` kills.
    pub fn with_encoder_name(mut self, encoder_name: impl Into<String>) -> Self {
        self.encoder_name = Some(encoder_name.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The encoder run by this command line.
    ///
    /// Without an override this is the last non-option leading argument
    /// (`ffmpeg` in `nice -n 10 ffmpeg -hide_banner`), or the program when
    /// there is none.
    pub fn encoder_name(&self) -> &str {
        if let Some(name) = &self.encoder_name {
            return name;
        }

        self.leading_args
            .iter()
            .rev()
            .find(|arg| !arg.starts_with('-'))
            .unwrap_or(&self.program)
    }

    pub fn build(&self, request: &StreamRequest) -> EncodeCommand {
        let mut args = self.leading_args.clone();

        args.extend([
            "-re".to_string(),
            "-i".to_string(),
            request.source_path.to_string_lossy().into_owned(),
        ]);

        for (flag, value) in VIDEO_OPTIONS {
            args.push(flag.to_string());
            args.push(value.to_string());
        }

        args.extend([
            "-g".to_string(),
            KEYFRAME_INTERVAL.to_string(),
            "-keyint_min".to_string(),
            KEYFRAME_INTERVAL.to_string(),
        ]);

        for (flag, value) in AUDIO_OPTIONS {
            args.push(flag.to_string());
            args.push(value.to_string());
        }
        args.push("-f".to_string());
        args.push(OUTPUT_FORMAT.to_string());

        if request.vertical {
            let (width, height) = VERTICAL_FRAME;
            args.push("-vf".to_string());
            args.push(format!("scale={width}:{height}"));
        }

        args.push(format!("{INGEST_URL}/{}", request.stream_key));

        EncodeCommand {
            program: self.program.clone(),
            args,
            encoder_name: self.encoder_name().to_string(),
            redact_destination: true,
        }
    }
}

/// Build the command for `request` with the default `ffmpeg` program.
pub fn build(request: &StreamRequest) -> EncodeCommand {
    CommandBuilder::default().build(request)
}

fn split_command_into_parts(input: &str) -> Option<(String, Vec<String>)> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in trimmed.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }

    let mut parts = parts.into_iter();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(vertical: bool) -> StreamRequest {
        StreamRequest::new("clip.mp4", "abcd-1234", vertical)
    }

    #[test]
    fn test_build_landscape() {
        let command = build(&request(false));
        assert_eq!(command.program(), "ffmpeg");
        assert_eq!(
            command.args().join(" "),
            "-re -i clip.mp4 \
             -c:v libx264 -preset veryfast -b:v 2500k -maxrate 2500k -bufsize 5000k \
             -g 60 -keyint_min 60 -c:a aac -b:a 128k -f flv \
             rtmp://a.rtmp.youtube.com/live2/abcd-1234"
        );
        let has_scale = |arg: &String| arg == "-vf" || arg.starts_with("scale=");
        assert!(!command.args().iter().any(has_scale));
    }

    #[test]
    fn test_build_vertical_adds_scale() {
        let args = build(&request(true)).args().to_vec();
        let vf = args.iter().position(|arg| arg == "-vf").unwrap();
        assert_eq!(args[vf + 1], "scale=720:1280");
        assert_eq!(args.iter().filter(|arg| arg.starts_with("scale=")).count(), 1);
        assert_eq!(
            args.last().unwrap(),
            "rtmp://a.rtmp.youtube.com/live2/abcd-1234"
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        assert_eq!(build(&request(true)), build(&request(true)));
        assert_eq!(build(&request(false)), build(&request(false)));
        assert_ne!(build(&request(false)), build(&request(true)));
    }

    #[test]
    fn test_stream_key_passed_verbatim() {
        let request = StreamRequest::new("a b.mp4", "key with/slash?x=1", false);
        let command = build(&request);
        assert_eq!(command.args()[2], "a b.mp4");
        assert_eq!(
            command.destination(),
            Some("rtmp://a.rtmp.youtube.com/live2/key with/slash?x=1")
        );
    }

    #[test]
    fn test_display_and_debug_redact_key() {
        let command = build(&request(false));
        let shown = command.to_string();
        assert!(shown.starts_with("ffmpeg -re -i clip.mp4"));
        assert!(shown.ends_with("rtmp://a.rtmp.youtube.com/live2/****"));
        assert!(!shown.contains("abcd-1234"));
        assert!(!format!("{command:?}").contains("abcd-1234"));
        assert!(!format!("{:?}", request(false)).contains("abcd-1234"));
    }

    #[test]
    fn test_builder_with_wrapper() {
        let line = r#"sh -c "exec sleep 30" stub"#;
        let builder = CommandBuilder::from_command_line(line).unwrap();
        let command = builder.build(&request(false));
        assert_eq!(command.program(), "sh");
        assert_eq!(&command.args()[..3], ["-c", "exec sleep 30", "stub"]);
        assert_eq!(command.args()[3], "-re");
    }

    #[test]
    fn test_encoder_name_behind_wrapper() {
        let plain = CommandBuilder::default();
        assert_eq!(plain.encoder_name(), "ffmpeg");
        assert_eq!(plain.build(&request(false)).encoder_name(), "ffmpeg");

        let wrapped = CommandBuilder::from_command_line("nice -n 10 ffmpeg").unwrap();
        assert_eq!(wrapped.program(), "nice");
        assert_eq!(wrapped.encoder_name(), "ffmpeg");
        assert_eq!(wrapped.build(&request(false)).encoder_name(), "ffmpeg");

        let flags = CommandBuilder::from_command_line("/usr/bin/ffmpeg -hide_banner").unwrap();
        assert_eq!(flags.encoder_name(), "/usr/bin/ffmpeg");

        let overridden = CommandBuilder::from_command_line("nice -n 10 ffmpeg -loglevel warning")
            .unwrap()
            .with_encoder_name("ffmpeg");
        assert_eq!(overridden.encoder_name(), "ffmpeg");

        let raw = EncodeCommand::new("nice", ["-n", "10", "sleep", "30"]);
        assert_eq!(raw.encoder_name(), "nice");
        assert_eq!(raw.with_encoder_name("sleep").encoder_name(), "sleep");
    }

    #[test]
    fn test_split_command_into_parts() {
        assert_eq!(split_command_into_parts("   "), None);
        assert_eq!(
            split_command_into_parts("nice  -n 10\tffmpeg"),
            Some((
                "nice".to_string(),
                vec!["-n".to_string(), "10".to_string(), "ffmpeg".to_string()]
            ))
        );
    }
}

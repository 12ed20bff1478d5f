//! FFmpeg command builder.
//!
//! Maps operations and render options to a fully-resolved argument vector.
//! Nothing here touches the filesystem or spawns anything.

use serde::Serialize;
use std::path::{Path, PathBuf};

use clipper_models::{Operation, TransformOptions};

use crate::error::{MediaError, MediaResult};

/// Luma-weighted channel mix used for grayscale output.
pub const GRAYSCALE_FILTER: &str = "colorchannelmixer=.3:.4:.3:0:.3:.4:.3:0:.3:.4:.3";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before -i
    input_args: Vec<String>,
    /// Arguments placed after -i
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Seek the input to `seconds`.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Limit the amount of input read.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Copy streams without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set the output frame size.
    pub fn size(self, width: u32, height: u32) -> Self {
        self.output_arg("-s").output_arg(format!("{}x{}", width, height))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set audio filter.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    /// Drop the audio stream.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Force the output container format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(8 + self.input_args.len() + self.output_args.len());

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(path_arg(&self.input));

        args.extend(self.output_args.iter().cloned());
        args.push(path_arg(&self.output));

        args
    }

    /// Resolve into an invocation spec for `program`.
    pub fn into_invocation(self, program: impl Into<String>) -> InvocationSpec {
        InvocationSpec {
            program: program.into(),
            args: self.build_args(),
            input: self.input,
            output: self.output,
        }
    }
}

/// Render a path as a single argument that can never be read as an option.
fn path_arg(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.starts_with('-') {
        format!("./{}", s)
    } else {
        s.into_owned()
    }
}

/// Injection-safe description of one engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationSpec {
    pub program: String,
    pub args: Vec<String>,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl InvocationSpec {
    /// Swap the executable (e.g. for a configured FFmpeg path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Printable form for logs.
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Build the invocation for a single operation.
pub fn build_invocation(
    operation: &Operation,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<InvocationSpec> {
    let cmd = FfmpegCommand::new(input, output);

    let cmd = match operation {
        Operation::Trim { start, duration } => {
            ensure_non_negative("start", *start)?;
            ensure_positive("duration", *duration)?;
            cmd.seek(*start).duration(*duration).codec_copy()
        }
        Operation::Resize { width, height } => {
            ensure_dimension("width", *width)?;
            ensure_dimension("height", *height)?;
            cmd.size(*width, *height)
        }
        Operation::Grayscale => cmd.video_filter(GRAYSCALE_FILTER),
        Operation::FormatConvert { format } => {
            ensure_format(format)?;
            cmd.format(format.as_str())
        }
        Operation::AudioMute => cmd.no_audio(),
        Operation::AudioVolume { level } => {
            ensure_positive("level", *level)?;
            cmd.audio_filter(format!("volume={}", level))
        }
    };

    Ok(cmd.into_invocation("ffmpeg"))
}

/// Build the invocation for a set of render options.
///
/// Steps are applied in a fixed order (scale, format, audio mode, audio
/// volume) so the result never depends on how the request was written.
/// Removing audio wins over a volume change.
pub fn build_pipeline(
    options: &TransformOptions,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<InvocationSpec> {
    let mut cmd = FfmpegCommand::new(input, output);

    if let Some(resize) = &options.resize {
        ensure_dimension("resize.width", resize.width)?;
        ensure_dimension("resize.height", resize.height)?;
        cmd = cmd.size(resize.width, resize.height);
    }

    if let Some(format) = &options.format {
        ensure_format(format)?;
        cmd = cmd.format(format.as_str());
    }

    if let Some(audio) = &options.audio {
        if audio.remove {
            cmd = cmd.no_audio();
        } else if let Some(level) = audio.volume {
            ensure_positive("audio.volume", level)?;
            cmd = cmd.audio_filter(format!("volume={}", level));
        }
    }

    Ok(cmd.into_invocation("ffmpeg"))
}

fn ensure_positive(field: &str, value: f64) -> MediaResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(MediaError::invalid_operation(field, "must be greater than 0"));
    }
    Ok(())
}

fn ensure_non_negative(field: &str, value: f64) -> MediaResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(MediaError::invalid_operation(field, "must be 0 or greater"));
    }
    Ok(())
}

fn ensure_dimension(field: &str, value: u32) -> MediaResult<()> {
    if value == 0 {
        return Err(MediaError::invalid_operation(field, "must be greater than 0"));
    }
    Ok(())
}

fn ensure_format(format: &str) -> MediaResult<()> {
    let valid = (2..=10).contains(&format.len())
        && format
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !valid {
        return Err(MediaError::invalid_operation(
            "format",
            "must be 2-10 lowercase letters or digits",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_models::{AudioOptions, ResizeOptions};

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_resize_size_argument() {
        for width in (1..=4000).step_by(97) {
            for height in (1..=3000).step_by(89) {
                let spec = build_invocation(&Operation::Resize { width, height }, "in.mp4", "out.mp4")
                    .unwrap();
                assert_eq!(arg_after(&spec.args, "-s"), Some(format!("{width}x{height}").as_str()));
            }
        }
    }

    #[test]
    fn test_trim_arguments() {
        let spec = build_invocation(
            &Operation::Trim { start: 1.5, duration: 2.0 },
            "/media/uploads/in.mp4",
            "/media/processed/out.mp4",
        )
        .unwrap();

        assert_eq!(
            spec.args,
            vec![
                "-y", "-hide_banner", "-v", "error", "-ss", "1.500", "-t", "2.000", "-i",
                "/media/uploads/in.mp4", "-c", "copy", "/media/processed/out.mp4",
            ]
        );
        assert_eq!(spec.program, "ffmpeg");
    }

    #[test]
    fn test_invalid_parameters_name_the_field() {
        let cases = [
            (Operation::Trim { start: 0.0, duration: 0.0 }, "duration"),
            (Operation::Trim { start: 0.0, duration: -1.0 }, "duration"),
            (Operation::Trim { start: -1.0, duration: 1.0 }, "start"),
            (Operation::Resize { width: 0, height: 10 }, "width"),
            (Operation::Resize { width: 10, height: 0 }, "height"),
            (Operation::AudioVolume { level: 0.0 }, "level"),
            (Operation::AudioVolume { level: f64::NAN }, "level"),
            (Operation::FormatConvert { format: "mp4;rm".to_string() }, "format"),
            (Operation::FormatConvert { format: String::new() }, "format"),
        ];

        for (op, expected) in cases {
            match build_invocation(&op, "in.mp4", "out.mp4") {
                Err(MediaError::InvalidOperation { field, .. }) => assert_eq!(field, expected, "{op}"),
                other => panic!("expected InvalidOperation for {op}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_simple_operations() {
        let spec = build_invocation(&Operation::Grayscale, "a.mp4", "b.mp4").unwrap();
        assert_eq!(arg_after(&spec.args, "-vf"), Some(GRAYSCALE_FILTER));

        let spec = build_invocation(&Operation::AudioMute, "a.mp4", "b.mp4").unwrap();
        assert!(spec.args.contains(&"-an".to_string()));

        let spec = build_invocation(&Operation::AudioVolume { level: 0.5 }, "a.mp4", "b.mp4").unwrap();
        assert_eq!(arg_after(&spec.args, "-af"), Some("volume=0.5"));

        let spec = build_invocation(
            &Operation::FormatConvert { format: "webm".to_string() },
            "a.mp4",
            "b.webm",
        )
        .unwrap();
        assert_eq!(arg_after(&spec.args, "-f"), Some("webm"));
    }

    #[test]
    fn test_paths_are_single_arguments() {
        let spec = build_invocation(
            &Operation::Grayscale,
            "-i evil; rm -rf.mp4",
            "out dir/$(whoami).mp4",
        )
        .unwrap();
        assert!(spec.args.contains(&"./-i evil; rm -rf.mp4".to_string()));
        assert_eq!(spec.args.last().map(String::as_str), Some("out dir/$(whoami).mp4"));
    }

    #[test]
    fn test_pipeline_fixed_order() {
        let options = TransformOptions {
            audio: Some(AudioOptions { remove: false, volume: Some(2.0) }),
            format: Some("mkv".to_string()),
            resize: Some(ResizeOptions { width: 640, height: 360 }),
        };
        let spec = build_pipeline(&options, "in.mp4", "out.mkv").unwrap();

        let pos = |flag: &str| spec.args.iter().position(|a| a == flag).unwrap();
        assert!(pos("-s") < pos("-f"));
        assert!(pos("-f") < pos("-af"));
    }

    #[test]
    fn test_pipeline_remove_audio_wins() {
        let options = TransformOptions {
            audio: Some(AudioOptions { remove: true, volume: Some(2.0) }),
            ..Default::default()
        };
        let spec = build_pipeline(&options, "in.mp4", "out.mp4").unwrap();
        assert!(spec.args.contains(&"-an".to_string()));
        assert!(!spec.args.contains(&"-af".to_string()));
    }

    #[test]
    fn test_pipeline_validation() {
        let options = TransformOptions {
            resize: Some(ResizeOptions { width: 0, height: 360 }),
            ..Default::default()
        };
        assert!(matches!(
            build_pipeline(&options, "in.mp4", "out.mp4"),
            Err(MediaError::InvalidOperation { ref field, .. }) if field == "resize.width"
        ));
    }

    #[test]
    fn test_with_program() {
        let spec = build_invocation(&Operation::AudioMute, "a.mp4", "b.mp4")
            .unwrap()
            .with_program("/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(spec.program, "/opt/ffmpeg/bin/ffmpeg");
        assert!(spec.display().starts_with("/opt/ffmpeg/bin/ffmpeg -y"));
    }
}

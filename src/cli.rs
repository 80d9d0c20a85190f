use clap::Parser;
use std::path::PathBuf;

// Build version with engine info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Engine: scripted (dry run)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Range-bounded playback controller (dry run against the scripted engine)
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Media file to load
    #[arg(value_name = "FILE", conflicts_with = "stream")]
    pub file_path: Option<PathBuf>,

    /// Load through the local stream transport instead of a file path
    #[arg(long = "stream", value_name = "LOCATOR")]
    pub stream: Option<String>,

    /// Stream transport identifier to connect to
    #[arg(long = "pipe", value_name = "ID", default_value = "playctl")]
    pub pipe: String,

    /// Play range start, normalized 0..1
    #[arg(long = "start", value_name = "POS")]
    pub range_start: Option<f32>,

    /// Play range stop, normalized 0..1
    #[arg(long = "stop", value_name = "POS")]
    pub range_stop: Option<f32>,

    /// Play range (shorthand for --start and --stop)
    #[arg(long = "range", value_names = ["START", "STOP"], num_args = 2, conflicts_with_all = ["range_start", "range_stop"])]
    pub range: Option<Vec<f32>>,

    /// Seek to position after load (can be specified multiple times)
    #[arg(long = "seek", value_name = "POS")]
    pub seeks: Vec<f32>,

    /// Frames to step forward after seeking
    #[arg(long = "step-forward", value_name = "N", default_value_t = 0)]
    pub step_forward: u32,

    /// Frames to step back after stepping forward
    #[arg(long = "step-back", value_name = "N", default_value_t = 0)]
    pub step_back: u32,

    /// Capture a snapshot of video output 0 to this path
    #[arg(long = "snapshot", value_name = "PATH")]
    pub snapshot: Option<PathBuf>,

    /// Playback rate
    #[arg(long = "speed", value_name = "RATE")]
    pub speed: Option<f32>,

    /// Volume level (0-200)
    #[arg(long = "volume", value_name = "LEVEL")]
    pub volume: Option<i32>,

    /// Mute audio
    #[arg(short = 'm', long = "mute")]
    pub mute: bool,

    /// Print audio and video tracks
    #[arg(short = 't', long = "tracks")]
    pub tracks: bool,

    /// Scripted media length in milliseconds
    #[arg(long = "length-ms", value_name = "MS", default_value_t = 10_000, hide = true)]
    pub length_ms: i64,

    /// Scripted media frame rate
    #[arg(long = "fps", value_name = "FPS", default_value_t = 25.0, hide = true)]
    pub fps: f32,

    /// Enable debug logging to file (default: playctl.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

impl Args {
    /// Requested play range; unspecified bounds span the whole media
    pub fn play_range(&self) -> (f32, f32) {
        match self.range.as_deref() {
            Some([start, stop]) => (*start, *stop),
            _ => (self.range_start.unwrap_or(0.0), self.range_stop.unwrap_or(1.0)),
        }
    }

    /// Locator for the load, file path or stream locator
    pub fn locator(&self) -> Option<String> {
        self.stream
            .clone()
            .or_else(|| self.file_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_shorthand() {
        let args = Args::parse_from(["playctl", "clip.mp4", "--range", "0.25", "0.75"]);
        assert_eq!(args.play_range(), (0.25, 0.75));
        assert_eq!(args.locator().as_deref(), Some("clip.mp4"));
    }

    #[test]
    fn test_partial_range_and_seeks() {
        let args = Args::parse_from(["playctl", "clip.mp4", "--stop", "0.5", "--seek", "0.9", "--seek", "0.1"]);
        assert_eq!(args.play_range(), (0.0, 0.5));
        assert_eq!(args.seeks, vec![0.9, 0.1]);
    }

    #[test]
    fn test_stream_conflicts_with_file() {
        assert!(Args::try_parse_from(["playctl", "clip.mp4", "--stream", "remote"]).is_err());
        let args = Args::try_parse_from(["playctl", "--stream", "remote", "--pipe", "p1"]).unwrap();
        assert_eq!(args.locator().as_deref(), Some("remote"));
        assert_eq!(args.pipe, "p1");
    }
}

use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};

use vidgrep_ocr::DevicePreference;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OcrDevice {
    Auto,
    Gpu,
    Cpu,
}

impl OcrDevice {
    pub fn preference(self) -> DevicePreference {
        match self {
            OcrDevice::Auto => DevicePreference::Auto,
            OcrDevice::Gpu => DevicePreference::Gpu,
            OcrDevice::Cpu => DevicePreference::Cpu,
        }
    }
}

/// Which arguments were given on the command line, as opposed to falling back
/// to their clap defaults. File-config merging needs the distinction.
#[derive(Debug, Default)]
pub struct CliSources {
    pub stride_from_cli: bool,
    pub confidence_threshold_from_cli: bool,
    pub ocr_device_from_cli: bool,
    pub recognition_timeout_from_cli: bool,
}

impl CliSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            stride_from_cli: value_from_cli(matches, "stride"),
            confidence_threshold_from_cli: value_from_cli(matches, "confidence_threshold"),
            ocr_device_from_cli: value_from_cli(matches, "ocr_device"),
            recognition_timeout_from_cli: value_from_cli(matches, "recognition_timeout"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let command = CliArgs::command();
    let matches = command.get_matches();
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

#[derive(Debug, Parser)]
#[command(
    name = "vidgrep",
    about = "Extract on-screen text from video into a searchable store",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Lock decoding to a specific backend implementation
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,

    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// SQLite database receiving extracted text and progress
    #[arg(long = "database", value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Print the list of available decoding backends
    #[arg(long = "list-backends")]
    pub list_backends: bool,

    /// Frames between consecutive samples
    #[arg(
        long = "stride",
        default_value_t = 120,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub stride: u64,

    /// Confidence a candidate must strictly exceed to be kept
    #[arg(
        long = "confidence-threshold",
        id = "confidence_threshold",
        default_value_t = 0.8
    )]
    pub confidence_threshold: f32,

    /// Compute device for the recognition worker
    #[arg(long = "ocr-device", id = "ocr_device", value_enum, default_value_t = OcrDevice::Auto)]
    pub ocr_device: OcrDevice,

    /// Recognition worker program to spawn
    #[arg(long = "ocr-worker", value_name = "PROGRAM")]
    pub ocr_worker: Option<PathBuf>,

    /// Recognition language passed to the worker
    #[arg(long = "ocr-language", value_name = "LANG")]
    pub ocr_language: Option<String>,

    /// Seconds an unanswered recognition call may take before the run fails
    #[arg(
        long = "recognition-timeout",
        id = "recognition_timeout",
        value_name = "SECONDS",
        default_value_t = 120,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub recognition_timeout: u64,

    /// Decoder frame queue capacity before applying backpressure
    #[arg(
        long = "decoder-channel-capacity",
        id = "decoder_channel_capacity",
        value_parser = clap::value_parser!(usize)
    )]
    pub decoder_channel_capacity: Option<usize>,

    /// Input video path
    pub input: Option<PathBuf>,
}

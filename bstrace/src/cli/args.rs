//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::pipeline::PipelineConfig;
use crate::session::TracerConfig;

/// How decoded events are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// `syscall=321 arg1=6 arg2=0xabadcafe arg3=123 ret=0`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "bstrace",
    about = "Trace syscalls with eBPF parser modules dispatched by syscall number",
    after_help = "\
EXAMPLES:
    cargo xtask build-ebpf                                 Build and stage the probe modules
    sudo bstrace                                           Trace until Ctrl+C
    sudo bstrace --duration 10 --format json               Trace for 10s, JSON lines
    sudo bstrace --modules ./bundle --trace-pipe -v        Custom bundle, forward bpf_printk"
)]
pub struct Args {
    /// Module bundle directory (common/, tp/, parser/)
    #[arg(short, long, value_name = "DIR", default_value = "target/bstrace-modules")]
    pub modules: PathBuf,

    /// bpffs directory for shared map pins (a per-process subdirectory is used)
    #[arg(long, value_name = "DIR", default_value = "/sys/fs/bpf/bstrace")]
    pub pin_path: PathBuf,

    /// Events buffered between the reader and the printer
    #[arg(long, value_name = "N", default_value = "1024")]
    pub channel_capacity: usize,

    /// Consecutive ring buffer read failures before giving up
    #[arg(long, value_name = "N", default_value = "16")]
    pub max_read_failures: u32,

    /// Fail if any parser module fails to load
    #[arg(long)]
    pub strict: bool,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Event output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Forward kernel trace_pipe output (bpf_printk) to the debug log
    #[arg(long)]
    pub trace_pipe: bool,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl From<&Args> for TracerConfig {
    fn from(args: &Args) -> Self {
        TracerConfig {
            modules: args.modules.clone(),
            pin_path: args.pin_path.clone(),
            pipeline: PipelineConfig {
                capacity: args.channel_capacity,
                max_read_failures: args.max_read_failures,
            },
            strict: args.strict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["bstrace"]).unwrap();
        let config = TracerConfig::from(&args);
        assert_eq!(config.modules, PathBuf::from("target/bstrace-modules"));
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert!(!config.strict);
        assert_eq!(args.format, OutputFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "bstrace",
            "--modules",
            "/opt/bundle",
            "--channel-capacity",
            "8",
            "--strict",
            "--format",
            "json",
        ])
        .unwrap();
        let config = TracerConfig::from(&args);
        assert_eq!(config.modules, PathBuf::from("/opt/bundle"));
        assert_eq!(config.pipeline.capacity, 8);
        assert!(config.strict);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["bstrace", "-v", "-q"]).is_err());
    }
}

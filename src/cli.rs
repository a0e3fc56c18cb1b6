use clap::Parser;
use std::path::PathBuf;

/// httptap: passive TCP reassembly with HTTP request/response timing
#[derive(Parser, Debug)]
#[command(name = "httptap", version, about)]
pub struct Cli {
    /// Network interface to capture on (e.g., "en0", "eth0").
    /// If not specified, the default interface is used.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Read packets from a pcap file instead of a live interface
    #[arg(short = 'r', long)]
    pub file: Option<PathBuf>,

    /// Only consider segments with this IP as one endpoint
    #[arg(long)]
    pub ip: Option<String>,

    /// Only consider segments with this port as one endpoint
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of packets to process (0 = unlimited)
    #[arg(short = 'c', long)]
    pub count: Option<u64>,

    /// Number of assembler workers (0 = auto-detect from CPU count)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Evict connections idle for more than this many seconds
    #[arg(long)]
    pub idle_timeout_s: Option<f64>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// List available network interfaces and exit
    #[arg(short, long)]
    pub list_interfaces: bool,
}

use clap::Parser;
use std::io::Read;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use httptap::assembler::connection::StreamPair;
use httptap::assembler::stream::StreamReader;
use httptap::assembler::timing::TimingSink;
use httptap::assembler::{Assembler, ConnectionHandler, Endpoint, SegmentFilter};
use httptap::capture::engine;
use httptap::pipeline::{self, OwnedPacket};
use httptap::{cli, config};

fn main() {
    let args = cli::Cli::parse();

    // Initialize tracing/logging
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    // Handle --list-interfaces
    if args.list_interfaces {
        list_interfaces();
        return;
    }

    // Set up Ctrl-C handler
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
        eprintln!("\nInterrupt received, stopping capture...");
    })
    .expect("failed to set Ctrl-C handler");

    if let Err(e) = run_capture(&config, &running) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// List available network interfaces and print them.
fn list_interfaces() {
    match engine::interface_names() {
        Ok(interfaces) => {
            println!("Available network interfaces:");
            for (name, desc) in &interfaces {
                println!("{:<20} {}", name, desc);
            }
            if interfaces.is_empty() {
                println!("  (no interfaces found - try running with sudo)");
            }
        }
        Err(e) => {
            eprintln!("error listing interfaces: {}", e);
            eprintln!("hint: try running with sudo");
        }
    }
}

/// Consumer registered with the assembler: spawns one draining reader per
/// direction of every new connection. The reassembled byte streams are
/// where a real HTTP analyzer would plug in; the default consumer just
/// accounts for the bytes.
struct DrainHandler;

impl ConnectionHandler for DrainHandler {
    fn handle(&self, src: Endpoint, dst: Endpoint, streams: StreamPair) {
        let id = format!("{}-{}", src, dst);
        spawn_drain(id.clone(), "up", streams.upstream);
        spawn_drain(id, "down", streams.downstream);
    }

    fn finish(&self) {
        tracing::debug!("connection handler finished");
    }
}

fn spawn_drain(id: String, direction: &'static str, mut reader: StreamReader) {
    thread::Builder::new()
        .name(format!("tap-read-{}", direction))
        .spawn(move || {
            let mut buf = [0u8; 4096];
            let mut total: u64 = 0;
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => total += n as u64,
                }
            }
            tracing::debug!(connection = %id, direction, bytes = total, "stream drained");
        })
        .expect("failed to spawn reader thread");
}

/// Main loop: open the capture, shard packets to workers, flush idle
/// connections periodically, and tear everything down at the end.
fn run_capture(
    config: &RuntimeConfig,
    running: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cap = engine::open_capture(&config.capture)?;

    let assembler = Arc::new(Assembler::new(
        Arc::new(DrainHandler),
        config.filter,
        Arc::new(TimingSink::stdout()),
    ));
    let mut pipeline = pipeline::spawn(
        assembler.clone(),
        config.pipeline.workers,
        config.pipeline.channel_capacity,
    );

    let source_name = match (&config.capture.file, &config.capture.interface) {
        (Some(path), _) => path.display().to_string(),
        (None, Some(interface)) => interface.clone(),
        (None, None) => "(default)".into(),
    };
    eprintln!("httptap v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "Reading from {} with {} workers (Ctrl-C to stop)",
        source_name,
        pipeline.num_workers()
    );

    let flush_interval = Duration::from_secs_f64(config.assembler.flush_interval_secs);
    let mut last_flush = Instant::now();
    let mut packet_count: u64 = 0;
    let mut last_ts: f64 = 0.0;

    while running.load(Ordering::SeqCst) {
        if config.run.count > 0 && packet_count >= config.run.count {
            break;
        }

        match cap.next_packet() {
            Ok(packet) => {
                packet_count += 1;
                let ts = packet.header.ts.tv_sec as f64
                    + packet.header.ts.tv_usec as f64 / 1_000_000.0;
                last_ts = ts;
                pipeline.dispatch(OwnedPacket {
                    ts,
                    data: packet.data.to_vec(),
                });
            }
            Err(pcap::Error::TimeoutExpired) => {}
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                tracing::error!(error = %e, "capture error");
                return Err(Box::new(e));
            }
        }

        if last_flush.elapsed() >= flush_interval {
            assembler.flush_older_than(last_ts - config.assembler.idle_timeout_secs);
            last_flush = Instant::now();
        }
    }

    // Let the workers drain their queues, then close every stream so the
    // reader threads observe end-of-stream, emitting nothing further.
    pipeline.shutdown();
    assembler.finish_all();

    eprintln!("Capture complete: {} packets", packet_count);
    Ok(())
}

#[derive(Debug, Clone)]
struct RuntimeConfig {
    capture: engine::CaptureConfig,
    filter: SegmentFilter,
    assembler: config::AssemblerConfig,
    pipeline: config::PipelineConfig,
    run: config::RunConfig,
}

fn load_config(args: &cli::Cli) -> Result<RuntimeConfig, config::ConfigError> {
    let base = match &args.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::default(),
    };

    let mut capture = base.capture.clone();
    let mut filter = base.filter.clone();
    let mut assembler = base.assembler.clone();
    let mut pipeline = base.pipeline.clone();
    let mut run = base.run.clone();

    if let Some(value) = &args.interface {
        capture.interface = Some(value.clone());
    }
    if let Some(value) = &args.file {
        capture.file = Some(value.clone());
    }
    if let Some(value) = &args.ip {
        filter.ip = Some(value.clone());
    }
    if let Some(value) = args.port {
        filter.port = Some(value);
    }
    if let Some(value) = args.count {
        run.count = value;
    }
    if let Some(value) = args.workers {
        pipeline.workers = value;
    }
    if let Some(value) = args.idle_timeout_s {
        assembler.idle_timeout_secs = value;
    }

    let filter_ip = match &filter.ip {
        Some(raw) => Some(raw.parse::<IpAddr>().map_err(|_| {
            config::ConfigError::InvalidValue(format!("filter ip '{}' is not an IP address", raw))
        })?),
        None => None,
    };

    Ok(RuntimeConfig {
        capture: engine::CaptureConfig {
            interface: capture.interface,
            file: capture.file,
            promiscuous: capture.promiscuous,
            snaplen: capture.snaplen,
            timeout_ms: capture.timeout_ms,
        },
        filter: SegmentFilter {
            ip: filter_ip,
            port: filter.port,
        },
        assembler,
        pipeline,
        run,
    })
}

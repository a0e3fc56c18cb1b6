//! Sharded dispatch from the capture thread to assembler workers.
//!
//! ```text
//! capture (main thread)
//!   |
//!   |-- hash canonical flow key -> shard = hash % N
//!   |
//!   +--[crossbeam channel]--> worker 0  (decode, assemble)
//!   +--[crossbeam channel]--> worker 1
//!   ...
//!   +--[crossbeam channel]--> worker N-1
//! ```
//!
//! Pinning each endpoint pair to one worker keeps a connection's segments
//! in arrival order, which the assembler's dispatch discipline relies on.

pub mod router;

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::assembler::Assembler;
use crate::protocol;

/// An owned packet buffer sent from the capture thread to a worker.
#[derive(Debug)]
pub struct OwnedPacket {
    /// pcap timestamp as seconds since epoch.
    pub ts: f64,
    /// Owned copy of the frame bytes.
    pub data: Vec<u8>,
}

/// Handle returned by [`spawn`]; the capture thread dispatches packets
/// through it and shuts the pool down when the capture ends.
pub struct PipelineHandle {
    senders: Vec<Sender<OwnedPacket>>,
    worker_handles: Vec<thread::JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn num_workers(&self) -> usize {
        self.senders.len()
    }

    /// Route a packet to its connection's worker. Blocks when that
    /// worker's channel is full.
    pub fn dispatch(&self, packet: OwnedPacket) {
        let shard = router::shard_for_packet(&packet.data, self.senders.len());
        let _ = self.senders[shard].send(packet);
    }

    /// Drop the senders so workers drain and exit, then join them.
    pub fn shutdown(&mut self) {
        self.senders.clear();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Spawn the worker pool. `num_workers == 0` auto-detects from the CPU
/// count (half the cores, clamped to [1, 8]).
pub fn spawn(
    assembler: Arc<Assembler>,
    num_workers: usize,
    channel_capacity: usize,
) -> PipelineHandle {
    let num_workers = if num_workers == 0 {
        (num_cpus::get() / 2).clamp(1, 8)
    } else {
        num_workers.max(1)
    };

    tracing::info!(num_workers, "starting assembler pipeline");

    let mut senders = Vec::with_capacity(num_workers);
    let mut worker_handles = Vec::with_capacity(num_workers);

    for shard_id in 0..num_workers {
        let (pkt_tx, pkt_rx) = bounded::<OwnedPacket>(channel_capacity);
        senders.push(pkt_tx);

        let assembler = assembler.clone();
        let handle = thread::Builder::new()
            .name(format!("tap-worker-{}", shard_id))
            .spawn(move || run_worker(shard_id, pkt_rx, assembler))
            .expect("failed to spawn worker thread");
        worker_handles.push(handle);
    }

    PipelineHandle {
        senders,
        worker_handles,
    }
}

fn run_worker(shard_id: usize, rx: Receiver<OwnedPacket>, assembler: Arc<Assembler>) {
    let mut packets: u64 = 0;
    let mut decode_errors: u64 = 0;
    for packet in rx.iter() {
        packets += 1;
        match protocol::parse_tcp_packet(&packet.data) {
            Ok(Some(decoded)) => {
                assembler.assemble(decoded.src_ip, decoded.dst_ip, &decoded.tcp, packet.ts);
            }
            Ok(None) => {}
            Err(err) => {
                decode_errors += 1;
                tracing::debug!(shard_id, error = %err, "undecodable frame");
            }
        }
    }
    tracing::debug!(shard_id, packets, decode_errors, "worker drained");
}

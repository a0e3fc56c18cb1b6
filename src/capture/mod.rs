//! Packet sources.
//!
//! httptap reads frames either from a live interface tap or from a pcap
//! trace on disk; both are opened here and unified behind one handle.

pub mod engine;

// src/lib.rs
//
// Multicast L2 feed handler: consumes an incremental (delta) channel and a
// snapshot channel, maintains depth-capped books with per-instrument gap
// recovery, and republishes conflated snapshots on a third multicast group.
// The `simulator` and `receiver` binaries bookend the handler for local
// testing.

pub mod book;
pub mod codec;
pub mod config;
pub mod handler;
pub mod net;
pub mod protocol;
pub mod recovery;
pub mod registry;
pub mod stats;
pub mod util;

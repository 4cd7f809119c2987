//! Reliable bulk extraction of memory regions from a many-core hardware mesh, over an
//!  unreliable datagram transport with roughly 272 usable bytes per packet.
//!
//! ## Design goals
//!
//! * Pull large memory regions off the machine orders of magnitude faster than word-by-word
//!   reads through the regular command channel
//!   * the monitor core on the target chip streams the region as a burst of datagrams; this
//!     crate owns the receiving side and all reliability
//! * Assume delivery, repair afterwards: no per-packet acknowledgement
//!   * the receiver tracks sequence numbers, detects gaps, and asks for exactly the missing
//!     packets once the burst pauses (receive timeout) or the sender signals end-of-stream
//!   * arbitrary arrival order is fine; duplicate delivery is idempotent (last write wins)
//! * One in-flight request per session - no windowing, no congestion control. The mesh is a
//!   local, trusted network; the only pacing is a short delay between retransmission-request
//!   datagrams so the monitor core's ingress queue is not overrun
//! * Raise the mesh routers' drop timeout for the duration of a transfer and restore it
//!   afterwards, through the same monitor agents that answer status queries
//! * Fail loudly: a sequence number past the computed maximum or a write past the buffer end
//!   means sender and receiver disagree on the packet arithmetic, and the session aborts with
//!   the offending core and values rather than returning a silently truncated buffer
//!
//! ## Wire formats
//!
//! All numbers are little-endian 32-bit words.
//!
//! Start command (host to monitor core):
//! ```ascii
//! 0: command word = 100
//! 4: source address in the chip's shared memory
//! 8: region length in bytes
//! ```
//!
//! First data packet (monitor core to host):
//! ```ascii
//! 0: total region length in bytes
//! 4: payload for byte offset 0
//! ```
//!
//! Continuation data packet:
//! ```ascii
//! 0: sequence number s (payload covers byte offsets starting at s * unit, where
//!     unit = (packet capacity in words - 1) * 4)
//! 4: payload
//! *: optional trailing end-of-stream word FFFFFFFF on the last packet of a burst
//! ```
//!
//! A datagram holding nothing but `FFFFFFFF` is a completeness probe: the sender believes it
//!  has sent everything and the receiver should either finish or request the gaps.
//!
//! Retransmission request (host to monitor core, possibly several datagrams):
//! ```ascii
//! first:        { 1000, packet count, missing sequence numbers... }
//! continuation: { 1001, missing sequence numbers... }
//! ```
//!
//! Monitor control command (host to monitor core, one per target):
//! ```ascii
//! 0: command word (0 set router timeout, 1 set emergency timeout, 2 set packet filtering,
//!     3 get status, 4 reset counters, 5 exit)
//! 4: argument words, command-specific
//! ```
//! The response echoes the command word; `get status` appends the fixed nine-word
//!  reinjection record.

pub mod assembler;
pub mod buf_ext;
pub mod config;
pub mod core_addr;
pub mod error;
pub mod gatherer;
pub mod placements;
pub mod retransmission;
pub mod session;
pub mod status;
pub mod transport;
pub mod wire;

pub mod safe_converter;

#[cfg(test)]
pub(crate) mod test_util;

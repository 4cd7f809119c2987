use thiserror::Error;

use crate::core_addr::CoreAddr;
use crate::placements::VertexId;
use crate::status::MonitorCommand;

/// The failures an extraction or control operation can surface to the caller.
///
/// Receive timeouts never appear here - they are absorbed by the session's retransmission cycle.
///  Everything in this enum is fatal for the operation that produced it, and the data-path
///  variants name the core whose traffic violated the protocol together with the expected and
///  actual values.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// A data packet carried a sequence number above the maximum derived from the declared
    ///  length. Sender and receiver disagree on the packet arithmetic - retrying cannot help.
    #[error("core {core} sent sequence number {sequence} but the declared length only allows up to {max_sequence}")]
    SequenceOutOfRange {
        core: CoreAddr,
        sequence: u32,
        max_sequence: u32,
    },

    /// Writing a packet's payload would address bytes past the end of the receive buffer.
    #[error("payload for sequence {sequence} from core {core} would end at byte {write_end} of a {buffer_len}-byte buffer")]
    WriteOutOfBounds {
        core: CoreAddr,
        sequence: u32,
        write_end: usize,
        buffer_len: usize,
    },

    /// A datagram too short to hold the headers its position in the stream requires.
    #[error("core {core} sent a malformed {len}-byte datagram")]
    MalformedDatagram { core: CoreAddr, len: usize },

    /// The target never sent the length-bearing first packet, so there is no sequence space
    ///  to request retransmissions from.
    #[error("core {core} sent no data before the receive timeout elapsed")]
    NoInitialResponse { core: CoreAddr },

    /// The optional cap on retransmission rounds was reached with gaps still outstanding.
    #[error("gave up on core {core} after {rounds} retransmission rounds")]
    RetryBudgetExhausted { core: CoreAddr, rounds: u32 },

    /// A monitor core did not answer a control command within the channel's retry budget.
    ///  Settings are never partially applied silently: the first unresponsive core aborts
    ///  the operation.
    #[error("monitor core {core} did not respond to {command:?} after {attempts} attempts")]
    ConfigurationFault {
        core: CoreAddr,
        command: MonitorCommand,
        attempts: u32,
    },

    /// The data-reception channel is configured with the wrong number of tags.
    #[error("expected {expected} data-channel tag(s), found {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("no placement known for vertex {0}")]
    UnknownVertex(VertexId),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

//! Reassembly of one extraction run from out-of-order datagrams.

use bit_set::BitSet;
use tracing::{debug, trace};

use crate::core_addr::CoreAddr;
use crate::error::ExtractionError;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::wire::{parse_data_packet, parse_first_packet, DataPacket, WORD_BYTES};

/// What a fed datagram turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// a payload packet; `is_final` if it carried the trailing end-of-stream word
    Data { sequence: u32, is_final: bool },
    /// a bare end-of-stream marker - the sender asks whether anything is still missing
    EndOfStream,
}

/// Owns the receive buffer of a single extraction run and tracks which sequence numbers
///  have arrived.
///
/// The buffer is allocated once, to exactly the length declared in the run's first datagram,
///  and every write is bounds-checked against it - a write past the end means the sender and
///  receiver disagree on the packet arithmetic and aborts the run.
///
/// Sequence number `s` covers bytes `[s * unit, s * unit + payload_len)` where
///  `unit = (packet_capacity_words - 1) * 4`: every packet spends one word on its header
///  (the length word for the first packet, the sequence number for all others) and fills the
///  rest with payload. The highest sequence number is therefore
///  `ceil((declared_length - unit) / unit)`, and the run is complete when all of
///  `1..=max_sequence` have been seen (the first packet's region needs no sequence number).
///
/// Duplicate arrivals of a sequence number are idempotent: the payload is written again
///  (last write wins) and the duplicate is logged, not treated as an error. Content equality
///  of redeliveries is not verified.
pub struct SequenceAssembler {
    core: CoreAddr,
    buffer: Vec<u8>,
    /// sequence numbers in `1..=max_sequence` confirmed received
    received: BitSet,
    max_sequence: u32,
    /// payload bytes per packet after the one-word header
    unit: usize,
}

impl SequenceAssembler {
    /// Initialize a run from its length-bearing first datagram.
    pub fn from_first_packet(
        core: CoreAddr,
        packet_capacity_words: usize,
        datagram: &[u8],
    ) -> Result<SequenceAssembler, ExtractionError> {
        let first = parse_first_packet(datagram).map_err(|_| ExtractionError::MalformedDatagram {
            core,
            len: datagram.len(),
        })?;

        let unit = (packet_capacity_words - 1) * WORD_BYTES;
        let buffer_len = first.declared_length.safe_cast();
        let max_sequence: u32 = buffer_len
            .saturating_sub(unit)
            .div_ceil(unit)
            .prechecked_cast();

        trace!("core {}: run of {} bytes, max sequence number {}", core, buffer_len, max_sequence);

        if first.payload.len() > buffer_len {
            return Err(ExtractionError::WriteOutOfBounds {
                core,
                sequence: 0,
                write_end: first.payload.len(),
                buffer_len,
            });
        }

        let mut buffer = vec![0u8; buffer_len];
        buffer[..first.payload.len()].copy_from_slice(first.payload);

        Ok(SequenceAssembler {
            core,
            buffer,
            received: BitSet::with_capacity(max_sequence.safe_cast() + 1),
            max_sequence,
            unit,
        })
    }

    /// Apply one post-first datagram to the receive buffer.
    pub fn feed(&mut self, datagram: &[u8]) -> Result<FeedOutcome, ExtractionError> {
        let packet = parse_data_packet(datagram).map_err(|_| ExtractionError::MalformedDatagram {
            core: self.core,
            len: datagram.len(),
        })?;

        let (sequence, payload, is_final) = match packet {
            DataPacket::EndOfStream => return Ok(FeedOutcome::EndOfStream),
            DataPacket::Data { sequence, payload, is_final } => (sequence, payload, is_final),
        };

        if sequence > self.max_sequence {
            return Err(ExtractionError::SequenceOutOfRange {
                core: self.core,
                sequence,
                max_sequence: self.max_sequence,
            });
        }

        let offset = sequence.safe_cast() * self.unit;
        let write_end = offset + payload.len();
        if write_end > self.buffer.len() {
            return Err(ExtractionError::WriteOutOfBounds {
                core: self.core,
                sequence,
                write_end,
                buffer_len: self.buffer.len(),
            });
        }
        self.buffer[offset..write_end].copy_from_slice(payload);

        if sequence == 0 {
            // redelivery of the first packet's region - it has no slot in the received set
            debug!("core {}: sequence 0 redelivered", self.core);
        }
        else if !self.received.insert(sequence.safe_cast()) {
            debug!("core {}: duplicate sequence number {}", self.core, sequence);
        }

        Ok(FeedOutcome::Data { sequence, is_final })
    }

    /// All of `1..=max_sequence` accounted for?
    pub fn is_complete(&self) -> bool {
        self.received.len() == self.max_sequence.safe_cast()
    }

    pub fn received(&self) -> &BitSet {
        &self.received
    }

    pub fn max_sequence(&self) -> u32 {
        self.max_sequence
    }

    pub fn declared_length(&self) -> usize {
        self.buffer.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

//! Computing the missing-sequence set and packing it into bounded-size request datagrams.

use bit_set::BitSet;
use bytes::{BufMut, BytesMut};

use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::wire::{MISSING_SEQS_COMMAND, MISSING_SEQS_CONTINUATION_COMMAND, WORD_BYTES};

/// Builds the retransmission-request datagrams for one retry round.
///
/// The missing set is recomputed from the received set on every round rather than cached -
///  packets keep arriving while a request is being assembled, and a stale set would request
///  data that is already in the buffer.
pub struct RetransmissionRequester {
    packet_capacity_words: usize,
}

impl RetransmissionRequester {
    pub fn new(packet_capacity_words: usize) -> RetransmissionRequester {
        RetransmissionRequester { packet_capacity_words }
    }

    /// All sequence numbers in `[1, max_sequence]` not yet received, ascending.
    ///
    /// Sequence 0 is never requested - the first packet has no sequence number, and a sender
    ///  that never managed to deliver it leaves the receiver without a sequence space at all.
    pub fn compute_missing(&self, received: &BitSet, max_sequence: u32) -> Vec<u32> {
        (1..=max_sequence)
            .filter(|&sequence| !received.contains(sequence.safe_cast()))
            .collect()
    }

    /// Pack the missing set into request datagrams.
    ///
    /// The first datagram is `{command, packet count, sequence numbers...}`, every further one
    ///  `{continuation command, sequence numbers...}`; the packet count is computed up front
    ///  from the two capacities so the receiving monitor core knows when the request is
    ///  complete. No datagram exceeds the transfer's per-packet capacity.
    pub fn build_request_packets(&self, missing: &[u32]) -> Vec<BytesMut> {
        if missing.is_empty() {
            return Vec::new();
        }

        let first_capacity = self.packet_capacity_words - 2;
        let continuation_capacity = self.packet_capacity_words - 1;
        let n_packets: u32 = (1 + missing
            .len()
            .saturating_sub(first_capacity)
            .div_ceil(continuation_capacity))
        .prechecked_cast();

        let mut packets = Vec::new();

        let split = missing.len().min(first_capacity);
        let mut buf = BytesMut::with_capacity(self.packet_capacity_words * WORD_BYTES);
        buf.put_u32_le(MISSING_SEQS_COMMAND);
        buf.put_u32_le(n_packets);
        for &sequence in &missing[..split] {
            buf.put_u32_le(sequence);
        }
        packets.push(buf);

        let mut remaining = &missing[split..];
        while !remaining.is_empty() {
            let split = remaining.len().min(continuation_capacity);
            let mut buf = BytesMut::with_capacity(self.packet_capacity_words * WORD_BYTES);
            buf.put_u32_le(MISSING_SEQS_CONTINUATION_COMMAND);
            for &sequence in &remaining[..split] {
                buf.put_u32_le(sequence);
            }
            packets.push(buf);
            remaining = &remaining[split..];
        }

        debug_assert_eq!(packets.len(), n_packets as usize);
        packets
    }
}

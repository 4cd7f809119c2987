//! Test helpers: a sender-side packet chunker mirroring the monitor firmware, and scripted
//!  transport fakes for driving sessions without sockets.

use async_trait::async_trait;
use bytes::{Buf, BufMut};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::core_addr::CoreAddr;
use crate::transport::DatagramTransport;
use crate::wire::{END_OF_STREAM_FLAG, MISSING_SEQS_COMMAND, WORD_BYTES};

pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

/// Chunk a region the way the sending monitor core does: the first packet carries the total
///  length plus `unit` payload bytes, every later packet a sequence number plus up to `unit`
///  payload bytes, and the last packet the trailing end-of-stream word.
///
/// The sender's packet count and the assembler's `max_sequence` use the same ceiling,
///  `ceil((length - unit) / unit)` with `unit = (capacity_words - 1) * 4` - rounding
///  differently on either side deadlocks or truncates the protocol, so this helper is
///  deliberately written against that exact formula.
pub fn sender_packets(data: &[u8], capacity_words: usize) -> Vec<Vec<u8>> {
    let unit = (capacity_words - 1) * WORD_BYTES;

    let mut first = Vec::new();
    first.put_u32_le(data.len() as u32);
    first.extend_from_slice(&data[..data.len().min(unit)]);

    let mut packets = vec![first];
    for (i, chunk) in data[data.len().min(unit)..].chunks(unit).enumerate() {
        let mut packet = Vec::new();
        packet.put_u32_le((i + 1) as u32);
        packet.extend_from_slice(chunk);
        packets.push(packet);
    }
    if packets.len() == 1 {
        // the first packet cannot carry the inline end flag (everything after its length
        //  word is payload), so a single-packet run ends with a bare marker
        let mut marker = Vec::new();
        marker.put_u32_le(END_OF_STREAM_FLAG);
        packets.push(marker);
    }
    else {
        packets.last_mut().unwrap().put_u32_le(END_OF_STREAM_FLAG);
    }
    packets
}

/// Build the sequence-numbered packet for one retransmission, without the end flag.
pub fn resend_packet(data: &[u8], capacity_words: usize, sequence: u32) -> Vec<u8> {
    let unit = (capacity_words - 1) * WORD_BYTES;
    let offset = sequence as usize * unit;

    let mut packet = Vec::new();
    packet.put_u32_le(sequence);
    packet.extend_from_slice(&data[offset..data.len().min(offset + unit)]);
    packet
}

/// A data-channel fake driven by a script: `receive` pops pre-loaded datagrams (`None` being
///  a receive timeout), and each retransmission-request round sent through it appends the
///  next pre-loaded resend batch to the incoming queue.
pub struct ScriptedTransport {
    incoming: Mutex<VecDeque<Option<Vec<u8>>>>,
    resend_batches: Mutex<VecDeque<Vec<Vec<u8>>>>,
    sent: Mutex<Vec<(CoreAddr, Vec<u8>)>>,
}

impl ScriptedTransport {
    pub fn new(incoming: Vec<Option<Vec<u8>>>) -> ScriptedTransport {
        ScriptedTransport {
            incoming: Mutex::new(incoming.into()),
            resend_batches: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn push_resend_batch(&self, batch: Vec<Vec<u8>>) {
        self.resend_batches.lock().unwrap().push_back(batch);
    }

    pub fn sent(&self) -> Vec<(CoreAddr, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatagramTransport for ScriptedTransport {
    async fn send(&self, target: CoreAddr, payload: &[u8]) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((target, payload.to_vec()));

        if payload.len() >= WORD_BYTES {
            let mut header: &[u8] = &payload[..WORD_BYTES];
            if header.get_u32_le() == MISSING_SEQS_COMMAND {
                if let Some(batch) = self.resend_batches.lock().unwrap().pop_front() {
                    let mut incoming = self.incoming.lock().unwrap();
                    for packet in batch {
                        incoming.push_back(Some(packet));
                    }
                }
            }
        }
        Ok(())
    }

    async fn receive(&self, _timeout: Duration) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.incoming.lock().unwrap().pop_front().unwrap_or(None))
    }
}

/// A control-channel fake that acknowledges every command by echoing its command word, and
///  records what was sent where.
pub struct EchoControlTransport {
    commands: Mutex<Vec<(CoreAddr, Vec<u8>)>>,
    pending_responses: Mutex<VecDeque<Vec<u8>>>,
}

impl EchoControlTransport {
    pub fn new() -> EchoControlTransport {
        EchoControlTransport {
            commands: Mutex::new(Vec::new()),
            pending_responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn commands(&self) -> Vec<(CoreAddr, Vec<u8>)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatagramTransport for EchoControlTransport {
    async fn send(&self, target: CoreAddr, payload: &[u8]) -> anyhow::Result<()> {
        self.commands.lock().unwrap().push((target, payload.to_vec()));
        self.pending_responses
            .lock()
            .unwrap()
            .push_back(payload[..WORD_BYTES].to_vec());
        Ok(())
    }

    async fn receive(&self, _timeout: Duration) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.pending_responses.lock().unwrap().pop_front())
    }
}

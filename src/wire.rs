//! Serialization and parsing of the data-path wire format.
//!
//! All numbers on the wire are little-endian 32-bit words (the mesh processors are
//!  little-endian ARM cores, and the monitor firmware reads command payloads as word arrays).
//!  No I/O happens here.

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};

use crate::buf_ext::BufExt;

/// wire words are 32 bits
pub const WORD_BYTES: usize = 4;

/// command word of the datagram that starts an extraction run
pub const START_EXTRACTION_COMMAND: u32 = 100;

/// command word of the first retransmission-request packet (followed by the packet count)
pub const MISSING_SEQS_COMMAND: u32 = 1000;

/// command word of follow-up retransmission-request packets
pub const MISSING_SEQS_CONTINUATION_COMMAND: u32 = 1001;

/// the all-ones end-of-stream marker
pub const END_OF_STREAM_FLAG: u32 = 0xFFFF_FFFF;

/// The command datagram that asks a monitor core to stream a memory region back to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartCommand {
    /// start address of the region in the chip's shared memory
    pub address: u32,
    /// length of the region in bytes
    pub length: u32,
}

impl StartCommand {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32_le(START_EXTRACTION_COMMAND);
        buf.put_u32_le(self.address);
        buf.put_u32_le(self.length);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<StartCommand> {
        let command = buf.try_get_u32_le()?;
        if command != START_EXTRACTION_COMMAND {
            bail!("not a start command: leading word is {}", command);
        }
        Ok(StartCommand {
            address: buf.try_get_u32_le()?,
            length: buf.try_get_u32_le()?,
        })
    }
}

/// The first datagram of a run: the region's total length, then payload bytes for offset 0.
#[derive(Debug, PartialEq, Eq)]
pub struct FirstPacket<'a> {
    pub declared_length: u32,
    pub payload: &'a [u8],
}

pub fn parse_first_packet(datagram: &[u8]) -> anyhow::Result<FirstPacket> {
    if datagram.len() < WORD_BYTES {
        bail!("first packet of {} bytes cannot hold the declared length", datagram.len());
    }
    Ok(FirstPacket {
        declared_length: le_word(&datagram[..WORD_BYTES]),
        payload: &datagram[WORD_BYTES..],
    })
}

/// Every datagram after the first, parsed but not yet applied to the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum DataPacket<'a> {
    /// A bare end-of-stream marker: the sender believes it has sent everything and asks the
    ///  receiver to check completeness. Carries no data.
    EndOfStream,
    /// A payload-bearing packet. `is_final` is set when the trailing word is the end-of-stream
    ///  marker (which is then not part of the payload).
    Data {
        sequence: u32,
        payload: &'a [u8],
        is_final: bool,
    },
}

pub fn parse_data_packet(datagram: &[u8]) -> anyhow::Result<DataPacket> {
    if datagram.len() < WORD_BYTES {
        bail!("data packet of {} bytes cannot hold a sequence number", datagram.len());
    }
    if datagram.len() == WORD_BYTES {
        if le_word(datagram) == END_OF_STREAM_FLAG {
            return Ok(DataPacket::EndOfStream);
        }
        // a sequence number with no payload - valid, if unusual
        return Ok(DataPacket::Data {
            sequence: le_word(datagram),
            payload: &[],
            is_final: false,
        });
    }

    let sequence = le_word(&datagram[..WORD_BYTES]);
    let is_final = le_word(&datagram[datagram.len() - WORD_BYTES..]) == END_OF_STREAM_FLAG;
    let payload_end = if is_final {
        datagram.len() - WORD_BYTES
    }
    else {
        datagram.len()
    };
    Ok(DataPacket::Data {
        sequence,
        payload: &datagram[WORD_BYTES..payload_end],
        is_final,
    })
}

fn le_word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().expect("callers slice exactly four bytes"))
}

//! The narrow datagram interface this crate consumes, and its UDP-backed implementation.
//!
//! Reliability is entirely the caller's business - this layer only moves bounded-size
//!  datagrams between the host and `(x,y,p)`-addressed cores, and reports timeouts as the
//!  absence of a datagram rather than as an error.

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::core_addr::CoreAddr;
use crate::error::ExtractionError;

/// monitor-datagram port of the bulk-extraction handler on a monitor core
pub const EXTRACTION_DATA_PORT: u8 = 6;

/// monitor-datagram port of the reinjection / router-configuration handler
pub const REINJECTION_CONTROL_PORT: u8 = 5;

/// traffic identifier that marks the tag reserved for extraction traffic
pub const DATA_TRAFFIC_IDENTIFIER: &str = "bulk_data_extraction_channel";

/// An abstraction for exchanging datagrams with one target mesh, introduced to facilitate
///  mocking the I/O part away for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    async fn send(&self, target: CoreAddr, payload: &[u8]) -> anyhow::Result<()>;

    /// Block for up to `timeout` for the next datagram; `Ok(None)` means the timeout elapsed.
    async fn receive(&self, timeout: Duration) -> anyhow::Result<Option<Vec<u8>>>;
}

/// The 8-byte header in front of every host-to-mesh datagram.
///
/// Wire layout (bytes): flags, tag, destination port/cpu (`port << 5 | p`), source port/cpu,
///  destination chip address (`x << 8 | y`, u16 LE), source chip address (u16 LE). The source
///  fields are zero for host traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshDatagramHeader {
    pub flags: u8,
    pub tag: u8,
    pub destination: CoreAddr,
    pub destination_port: u8,
}

impl MeshDatagramHeader {
    pub const FLAGS_REPLY_NOT_EXPECTED: u8 = 0x07;
    pub const SERIALIZED_LEN: usize = 8;

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags);
        buf.put_u8(self.tag);
        buf.put_u8((self.destination_port << 5) | (self.destination.p & 0x1F));
        buf.put_u8(0);
        buf.put_u16_le(((self.destination.x as u16) << 8) | self.destination.y as u16);
        buf.put_u16_le(0);
    }
}

/// `DatagramTransport` over a UDP socket towards a board's ingress address.
///
/// Outbound datagrams are framed with a two-byte pad plus the mesh datagram header; inbound
///  extraction traffic arrives with headers already stripped by the board (that is what the
///  data channel's tag is configured for), so received datagrams are passed through verbatim.
pub struct UdpDatagramTransport {
    socket: UdpSocket,
    board_addr: SocketAddr,
    destination_port: u8,
    tag: u8,
}

impl UdpDatagramTransport {
    pub async fn bind(board_addr: SocketAddr, destination_port: u8, tag: u8) -> anyhow::Result<UdpDatagramTransport> {
        let socket = UdpSocket::bind("0.0.0.0:0").await
            .context("binding extraction socket")?;
        Ok(UdpDatagramTransport {
            socket,
            board_addr,
            destination_port,
            tag,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl DatagramTransport for UdpDatagramTransport {
    async fn send(&self, target: CoreAddr, payload: &[u8]) -> anyhow::Result<()> {
        let mut buf = BytesMut::with_capacity(2 + MeshDatagramHeader::SERIALIZED_LEN + payload.len());
        buf.put_u16(0); // pad expected by the board's ingress
        MeshDatagramHeader {
            flags: MeshDatagramHeader::FLAGS_REPLY_NOT_EXPECTED,
            tag: self.tag,
            destination: target,
            destination_port: self.destination_port,
        }
        .ser(&mut buf);
        buf.put_slice(payload);

        trace!("sending {} payload bytes to core {}", payload.len(), target);
        self.socket.send_to(&buf, self.board_addr).await
            .with_context(|| format!("sending datagram to core {}", target))?;
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> anyhow::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; 2048];
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok((num_read, from))) => {
                trace!("received {} bytes from {:?}", num_read, from);
                buf.truncate(num_read);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(e).context("receiving datagram"),
        }
    }
}

/// One tag slot on the board's ingress, as allocated by the resource mapper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpTag {
    pub tag: u8,
    pub traffic_identifier: String,
}

/// The data-reception channel needs exactly one tag carrying the extraction traffic
///  identifier; anything else means the channel was configured for a different tag layout.
pub fn verify_data_channel_tags(tags: &[IpTag]) -> Result<&IpTag, ExtractionError> {
    let matching: Vec<&IpTag> = tags
        .iter()
        .filter(|t| t.traffic_identifier == DATA_TRAFFIC_IDENTIFIER)
        .collect();
    match matching.as_slice() {
        [tag] => Ok(tag),
        _ => Err(ExtractionError::ChannelMismatch {
            expected: 1,
            actual: matching.len(),
        }),
    }
}

//! The command/response channel to the monitor agents: router-timeout configuration,
//!  reinjection packet-type selection, counter reset, status query, and shutdown.
//!
//! Every command is one datagram per target core: `{command word, arguments...}` in
//!  little-endian 32-bit words. The monitor agent answers each command with a datagram that
//!  echoes the command word, followed by the response payload (only `GetStatus` has one).
//!  Commands across the whole channel are serialized behind one lock so that concurrent
//!  sessions cannot interleave configuration changes - a router timeout must not change in
//!  the middle of another session's extraction.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::buf_ext::BufExt;
use crate::config::GatherConfig;
use crate::core_addr::CoreAddr;
use crate::error::ExtractionError;
use crate::transport::DatagramTransport;
use crate::wire::WORD_BYTES;

/// Command words understood by the monitor agents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum MonitorCommand {
    SetRouterTimeout = 0,
    SetRouterEmergencyTimeout = 1,
    SetPacketFiltering = 2,
    GetStatus = 3,
    ResetCounters = 4,
    Exit = 5,
}

bitflags! {
    /// Which traffic classes the monitor agent catches and reinjects.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ReinjectionPacketTypes: u32 {
        const MULTICAST = 0x01;
        const POINT_TO_POINT = 0x02;
        const NEAREST_NEIGHBOUR = 0x04;
        const FIXED_ROUTE = 0x08;
    }
}

/// A router wait timeout in the mesh's 8-bit floating-point format: four bits of mantissa,
///  four bits of exponent, packed as `exponent << 4 | mantissa`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterTimeout {
    pub mantissa: u8,
    pub exponent: u8,
}

impl RouterTimeout {
    pub const fn new(mantissa: u8, exponent: u8) -> RouterTimeout {
        RouterTimeout { mantissa, exponent }
    }

    pub fn encode(&self) -> u32 {
        (((self.exponent & 0xF) as u32) << 4) | (self.mantissa & 0xF) as u32
    }

    /// Timeout in router clock ticks for an encoded value: `(mantissa + 16) << exponent`,
    ///  with a correction of `-2^(4 - exponent)` applied to the mantissa term for
    ///  exponents of 4 and below.
    pub fn decode_ticks(encoded: u32) -> u32 {
        let mantissa = encoded & 0xF;
        let exponent = (encoded >> 4) & 0xF;
        if exponent <= 4 {
            ((mantissa + 16) - (1 << (4 - exponent))) << exponent
        }
        else {
            (mantissa + 16) << exponent
        }
    }
}

/// Snapshot of one monitor agent's reinjection state, parsed from the fixed nine-word
///  `GetStatus` response record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReinjectionStatus {
    /// encoded WAIT1 router timeout (see [`RouterTimeout::decode_ticks`])
    pub router_timeout: u32,
    /// encoded WAIT2 (emergency) router timeout
    pub router_emergency_timeout: u32,
    /// packets dropped by the router and picked up by the reinjector
    pub n_dropped_packets: u32,
    /// times a dropped packet was read while further drops had already been missed
    pub n_missed_dropped_packets: u32,
    /// dropped packets lost because the reinjection queue was full
    pub n_dropped_packet_overflows: u32,
    /// dropped packets that were successfully reinjected
    pub n_reinjected_packets: u32,
    /// drops caused by a link not accepting the packet
    pub n_link_dumps: u32,
    /// drops caused by a processor not accepting the packet
    pub n_processor_dumps: u32,
    /// raw traffic-class flags, see [`Self::packet_types`]
    pub flags: u32,
}

impl ReinjectionStatus {
    pub const SERIALIZED_LEN: usize = 9 * WORD_BYTES;

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ReinjectionStatus> {
        Ok(ReinjectionStatus {
            router_timeout: buf.try_get_u32_le()?,
            router_emergency_timeout: buf.try_get_u32_le()?,
            n_dropped_packets: buf.try_get_u32_le()?,
            n_missed_dropped_packets: buf.try_get_u32_le()?,
            n_dropped_packet_overflows: buf.try_get_u32_le()?,
            n_reinjected_packets: buf.try_get_u32_le()?,
            n_link_dumps: buf.try_get_u32_le()?,
            n_processor_dumps: buf.try_get_u32_le()?,
            flags: buf.try_get_u32_le()?,
        })
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.router_timeout);
        buf.put_u32_le(self.router_emergency_timeout);
        buf.put_u32_le(self.n_dropped_packets);
        buf.put_u32_le(self.n_missed_dropped_packets);
        buf.put_u32_le(self.n_dropped_packet_overflows);
        buf.put_u32_le(self.n_reinjected_packets);
        buf.put_u32_le(self.n_link_dumps);
        buf.put_u32_le(self.n_processor_dumps);
        buf.put_u32_le(self.flags);
    }

    pub fn router_timeout_ticks(&self) -> u32 {
        RouterTimeout::decode_ticks(self.router_timeout)
    }

    pub fn router_emergency_timeout_ticks(&self) -> u32 {
        RouterTimeout::decode_ticks(self.router_emergency_timeout)
    }

    pub fn packet_types(&self) -> ReinjectionPacketTypes {
        ReinjectionPacketTypes::from_bits_truncate(self.flags)
    }
}

/// The control channel to a mesh's monitor agents.
///
/// It owns its own transport (control traffic does not share the extraction data channel),
///  and serializes all commands behind one lock. A command that gets no response within the
///  channel's retry budget aborts the operation with a [`ExtractionError::ConfigurationFault`]
///  naming the unresponsive core - settings are never partially applied silently, the caller
///  knows exactly which core stopped the rollout.
pub struct StatusControlChannel {
    config: Arc<GatherConfig>,
    inner: Mutex<ChannelInner>,
}

struct ChannelInner {
    transport: Arc<dyn DatagramTransport>,
}

impl StatusControlChannel {
    pub fn new(config: Arc<GatherConfig>, transport: Arc<dyn DatagramTransport>) -> StatusControlChannel {
        StatusControlChannel {
            config,
            inner: Mutex::new(ChannelInner { transport }),
        }
    }

    pub async fn set_router_timeout(&self, timeout: RouterTimeout, targets: &[CoreAddr]) -> Result<(), ExtractionError> {
        debug!("setting router timeout to {:?} on {} core(s)", timeout, targets.len());
        self.send_to_all(MonitorCommand::SetRouterTimeout, &[timeout.encode()], targets).await
    }

    pub async fn set_router_emergency_timeout(&self, timeout: RouterTimeout, targets: &[CoreAddr]) -> Result<(), ExtractionError> {
        debug!("setting router emergency timeout to {:?} on {} core(s)", timeout, targets.len());
        self.send_to_all(MonitorCommand::SetRouterEmergencyTimeout, &[timeout.encode()], targets).await
    }

    pub async fn set_packet_filtering(&self, types: ReinjectionPacketTypes, targets: &[CoreAddr]) -> Result<(), ExtractionError> {
        debug!("setting reinjected packet types to {:?} on {} core(s)", types, targets.len());
        self.send_to_all(MonitorCommand::SetPacketFiltering, &[types.bits()], targets).await
    }

    pub async fn reset_counters(&self, targets: &[CoreAddr]) -> Result<(), ExtractionError> {
        self.send_to_all(MonitorCommand::ResetCounters, &[], targets).await
    }

    /// Shut down the monitor agents; used at teardown, after which the channel is useless.
    pub async fn send_exit(&self, targets: &[CoreAddr]) -> Result<(), ExtractionError> {
        self.send_to_all(MonitorCommand::Exit, &[], targets).await
    }

    pub async fn get_status(&self, target: CoreAddr) -> Result<ReinjectionStatus, ExtractionError> {
        let inner = self.inner.lock().await;
        self.query_status(&inner, target).await
    }

    pub async fn get_status_for_all(&self, targets: &[CoreAddr]) -> Result<FxHashMap<CoreAddr, ReinjectionStatus>, ExtractionError> {
        let inner = self.inner.lock().await;

        let mut result = FxHashMap::default();
        for &target in targets {
            result.insert(target, self.query_status(&inner, target).await?);
        }
        Ok(result)
    }

    async fn query_status(&self, inner: &ChannelInner, target: CoreAddr) -> Result<ReinjectionStatus, ExtractionError> {
        let response = self.command_with_retry(inner, MonitorCommand::GetStatus, &[], target).await?;
        ReinjectionStatus::deser(&mut response.as_slice()).map_err(|_| ExtractionError::MalformedDatagram {
            core: target,
            len: response.len() + WORD_BYTES,
        })
    }

    async fn send_to_all(&self, command: MonitorCommand, args: &[u32], targets: &[CoreAddr]) -> Result<(), ExtractionError> {
        let inner = self.inner.lock().await;
        for &target in targets {
            self.command_with_retry(&inner, command, args, target).await?;
        }
        Ok(())
    }

    /// Send one command and wait for the echoing response, retrying up to the configured
    ///  number of attempts. Returns the response payload after the echoed command word.
    async fn command_with_retry(
        &self,
        inner: &ChannelInner,
        command: MonitorCommand,
        args: &[u32],
        target: CoreAddr,
    ) -> Result<Vec<u8>, ExtractionError> {
        let mut request = BytesMut::with_capacity((1 + args.len()) * WORD_BYTES);
        request.put_u32_le(command.into());
        for &arg in args {
            request.put_u32_le(arg);
        }

        for attempt in 1..=self.config.control_attempts {
            inner.transport.send(target, &request).await?;

            match inner.transport.receive(self.config.control_response_timeout).await? {
                None => {
                    debug!("core {}: no response to {:?} (attempt {})", target, command, attempt);
                }
                Some(response) if response.len() >= WORD_BYTES => {
                    let mut header: &[u8] = &response[..WORD_BYTES];
                    let echoed = header.get_u32_le();
                    if echoed == u32::from(command) {
                        trace!("core {}: {:?} acknowledged", target, command);
                        return Ok(response[WORD_BYTES..].to_vec());
                    }
                    warn!("core {}: response echoes command word {} instead of {:?} - retrying", target, echoed, command);
                }
                Some(response) => {
                    warn!("core {}: {}-byte response cannot echo a command word - retrying", target, response.len());
                }
            }
        }

        Err(ExtractionError::ConfigurationFault {
            core: target,
            command,
            attempts: self.config.control_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockDatagramTransport;
    use rstest::rstest;
    use std::time::Duration;

    const CORE: CoreAddr = CoreAddr::new(0, 0, 1);

    fn config(attempts: u32) -> Arc<GatherConfig> {
        let mut config = GatherConfig::default_mesh();
        config.control_attempts = attempts;
        config.control_response_timeout = Duration::from_millis(10);
        Arc::new(config)
    }

    #[rstest]
    // exponent 0, the deepest correction: (mantissa + 16) - 16
    #[case::floor_of_low_exponents(0b0000_0000, 0)]
    #[case::mantissa_15_exponent_0(0b0000_1111, 15)]
    // exponent 4 is the last corrected value: ((mantissa + 16) - 1) << 4
    #[case::exponent_4(0b0100_0000, 240)]
    // above exponent 4 the term is exact: (mantissa + 16) << exponent
    #[case::exponent_5(0b0101_0100, 640)]
    #[case::max(0b1111_1111, 1015808)]
    fn test_decode_router_timeout(#[case] encoded: u32, #[case] expected_ticks: u32) {
        assert_eq!(RouterTimeout::decode_ticks(encoded), expected_ticks);
    }

    #[rstest]
    #[case(RouterTimeout::new(15, 15), 0xFF)]
    #[case(RouterTimeout::new(15, 4), 0x4F)]
    #[case(RouterTimeout::new(0, 0), 0x00)]
    fn test_encode_router_timeout(#[case] timeout: RouterTimeout, #[case] expected: u32) {
        assert_eq!(timeout.encode(), expected);
    }

    #[test]
    fn test_reinjection_status_ser_deser() {
        let status = ReinjectionStatus {
            router_timeout: 0xFF,
            router_emergency_timeout: 0x4F,
            n_dropped_packets: 17,
            n_missed_dropped_packets: 1,
            n_dropped_packet_overflows: 2,
            n_reinjected_packets: 14,
            n_link_dumps: 3,
            n_processor_dumps: 4,
            flags: 0x09,
        };

        let mut buf = BytesMut::new();
        status.ser(&mut buf);
        assert_eq!(buf.len(), ReinjectionStatus::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = ReinjectionStatus::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, status);

        assert_eq!(deser.router_timeout_ticks(), 1015808);
        assert_eq!(deser.router_emergency_timeout_ticks(), 480);
        assert_eq!(
            deser.packet_types(),
            ReinjectionPacketTypes::MULTICAST | ReinjectionPacketTypes::FIXED_ROUTE
        );
    }

    #[test]
    fn test_reinjection_status_deser_rejects_short_records() {
        let mut b: &[u8] = &[0u8; ReinjectionStatus::SERIALIZED_LEN - 1];
        assert!(ReinjectionStatus::deser(&mut b).is_err());
    }

    fn echo(command: MonitorCommand) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32_le(command.into());
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_set_router_timeout_sends_encoded_value() {
        let mut transport = MockDatagramTransport::new();
        transport
            .expect_send()
            .withf(|target, payload| {
                *target == CORE && payload == [0u8, 0, 0, 0, 0xFF, 0, 0, 0].as_slice()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        transport
            .expect_receive()
            .times(1)
            .returning(|_| Ok(Some(echo(MonitorCommand::SetRouterTimeout))));

        let channel = StatusControlChannel::new(config(3), Arc::new(transport));
        channel.set_router_timeout(RouterTimeout::new(15, 15), &[CORE]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unresponsive_core_surfaces_configuration_fault() {
        let mut transport = MockDatagramTransport::new();
        transport.expect_send().times(2).returning(|_, _| Ok(()));
        transport.expect_receive().times(2).returning(|_| Ok(None));

        let channel = StatusControlChannel::new(config(2), Arc::new(transport));
        match channel.reset_counters(&[CORE]).await {
            Err(ExtractionError::ConfigurationFault { core, command, attempts }) => {
                assert_eq!(core, CORE);
                assert_eq!(command, MonitorCommand::ResetCounters);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected ConfigurationFault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mismatched_echo_is_retried() {
        let mut transport = MockDatagramTransport::new();
        transport.expect_send().times(2).returning(|_, _| Ok(()));

        let mut responses = vec![
            Ok(Some(echo(MonitorCommand::ResetCounters))),
            Ok(Some(echo(MonitorCommand::GetStatus))), // stale response from an earlier query
        ];
        transport
            .expect_receive()
            .times(2)
            .returning(move |_| responses.pop().unwrap());

        let channel = StatusControlChannel::new(config(3), Arc::new(transport));
        channel.reset_counters(&[CORE]).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_status_parses_the_record() {
        let status = ReinjectionStatus {
            router_timeout: 0x4F,
            router_emergency_timeout: 0x00,
            n_dropped_packets: 5,
            n_missed_dropped_packets: 0,
            n_dropped_packet_overflows: 1,
            n_reinjected_packets: 4,
            n_link_dumps: 0,
            n_processor_dumps: 0,
            flags: 0x01,
        };

        let mut response = BytesMut::new();
        response.put_u32_le(MonitorCommand::GetStatus.into());
        status.ser(&mut response);
        let response = response.to_vec();

        let mut transport = MockDatagramTransport::new();
        transport.expect_send().times(1).returning(|_, _| Ok(()));
        transport
            .expect_receive()
            .times(1)
            .returning(move |_| Ok(Some(response.clone())));

        let channel = StatusControlChannel::new(config(3), Arc::new(transport));
        assert_eq!(channel.get_status(CORE).await.unwrap(), status);
    }
}

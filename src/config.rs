use anyhow::bail;
use std::time::Duration;

use crate::status::RouterTimeout;
use crate::wire::WORD_BYTES;

/// Configuration for extraction sessions and the monitor control channel.
pub struct GatherConfig {
    /// Usable payload of one datagram, in 32-bit words. This is dictated by the mesh
    ///  transport's MTU and must match the firmware on the monitor cores - both sides derive
    ///  their packet arithmetic from it, and a disagreement deadlocks or truncates transfers.
    pub packet_capacity_words: usize,

    /// How long one blocking receive waits before the session assumes the current burst is
    ///  over and asks for whatever is missing.
    pub receive_timeout: Duration,

    /// Pause between consecutive retransmission-request datagrams. The monitor core drains
    ///  its ingress queue slowly while streaming; sending requests back-to-back would push it
    ///  into dropping them.
    pub resend_pacing: Duration,

    /// Upper bound on retransmission rounds per session, `None` for no bound.
    ///
    /// The protocol as deployed runs on a trusted local network and keeps asking until the
    ///  data arrives; a bound turns a pathological loss pattern into
    ///  [`ExtractionError::RetryBudgetExhausted`](crate::error::ExtractionError) instead of
    ///  an endless loop.
    pub max_retransmission_rounds: Option<u32>,

    /// How long to wait for a monitor agent's response to one control command.
    pub control_response_timeout: Duration,

    /// How often to send a control command before giving up on the target core.
    pub control_attempts: u32,

    /// Router timeout installed for the duration of a bulk transfer. Lenient, so that the
    ///  routers hold packets instead of dropping them while the host drains the stream.
    pub lenient_router_timeout: RouterTimeout,

    /// Router timeout restored after a transfer (the mesh's regular operating value).
    pub strict_router_timeout: RouterTimeout,
}

impl GatherConfig {
    /// Defaults matching the deployed monitor firmware: 68-word datagrams, one-second
    ///  receive windows, 10ms request pacing.
    pub fn default_mesh() -> GatherConfig {
        GatherConfig {
            packet_capacity_words: 68,
            receive_timeout: Duration::from_secs(1),
            resend_pacing: Duration::from_millis(10),
            max_retransmission_rounds: None,
            control_response_timeout: Duration::from_secs(1),
            control_attempts: 3,
            lenient_router_timeout: RouterTimeout::new(15, 15),
            strict_router_timeout: RouterTimeout::new(15, 4),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.packet_capacity_words < 3 {
            // the first retransmission request needs two header words plus at least one
            //  sequence number
            bail!("packet capacity of {} words is too small", self.packet_capacity_words);
        }
        if self.receive_timeout.is_zero() {
            bail!("receive timeout must not be zero");
        }
        if self.control_response_timeout.is_zero() {
            bail!("control response timeout must not be zero");
        }
        if self.control_attempts == 0 {
            bail!("at least one control attempt is required");
        }
        for timeout in [self.lenient_router_timeout, self.strict_router_timeout] {
            if timeout.mantissa > 15 || timeout.exponent > 15 {
                bail!("router timeout {:?} does not fit the 4-bit mantissa/exponent format", timeout);
            }
        }
        Ok(())
    }

    /// Payload bytes per data packet, after the packet's one-word header.
    pub fn data_bytes_per_packet(&self) -> usize {
        (self.packet_capacity_words - 1) * WORD_BYTES
    }
}

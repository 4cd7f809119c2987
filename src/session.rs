//! One extraction run against one target core, from start command to assembled buffer.

use bytes::BytesMut;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::assembler::{FeedOutcome, SequenceAssembler};
use crate::config::GatherConfig;
use crate::core_addr::CoreAddr;
use crate::error::ExtractionError;
use crate::retransmission::RetransmissionRequester;
use crate::safe_converter::SafeCast;
use crate::status::StatusControlChannel;
use crate::transport::DatagramTransport;
use crate::wire::StartCommand;

/// What to extract: a memory region on one core. Immutable once issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub target: CoreAddr,
    /// start address of the region in the chip's shared memory
    pub address: u32,
    /// length of the region in bytes
    pub length: u32,
}

/// A finished extraction: the region's bytes plus loss statistics.
#[derive(Debug, PartialEq, Eq)]
pub struct Extraction {
    pub data: Vec<u8>,
    /// number of missing sequence numbers at each retry check, in order. A trailing zero
    ///  means the last check found nothing outstanding.
    pub lost_sequence_counts: Vec<usize>,
}

/// Runs one extraction request to completion.
///
/// The session exclusively owns its receive buffer and sequence bookkeeping for the duration
///  of the run; sessions against different cores may run concurrently, but they must not
///  share a data transport. The control channel *is* shared - it serializes its commands
///  internally.
///
/// Before the start command goes out, the routers supervised by the given monitor cores are
///  switched to the lenient timeout so they hold packets instead of dropping them during the
///  bulk transfer; the strict timeout is restored when the session ends, on the error paths
///  as well as on success.
pub struct ExtractionSession {
    config: Arc<GatherConfig>,
    transport: Arc<dyn DatagramTransport>,
    control: Arc<StatusControlChannel>,
    monitor_cores: Vec<CoreAddr>,
    request: ExtractionRequest,
}

impl ExtractionSession {
    pub fn new(
        config: Arc<GatherConfig>,
        transport: Arc<dyn DatagramTransport>,
        control: Arc<StatusControlChannel>,
        monitor_cores: Vec<CoreAddr>,
        request: ExtractionRequest,
    ) -> ExtractionSession {
        ExtractionSession {
            config,
            transport,
            control,
            monitor_cores,
            request,
        }
    }

    pub async fn run(&self) -> Result<Extraction, ExtractionError> {
        self.control
            .set_router_timeout(self.config.lenient_router_timeout, &self.monitor_cores)
            .await?;

        let result = self.run_transfer().await;

        let restored = self
            .control
            .set_router_timeout(self.config.strict_router_timeout, &self.monitor_cores)
            .await;

        match (result, restored) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(extraction), Ok(())) => Ok(extraction),
        }
    }

    async fn run_transfer(&self) -> Result<Extraction, ExtractionError> {
        let core = self.request.target;

        let mut start = BytesMut::new();
        StartCommand {
            address: self.request.address,
            length: self.request.length,
        }
        .ser(&mut start);
        self.transport.send(core, &start).await?;
        debug!("core {}: requested {} bytes from address {:#010x}", core, self.request.length, self.request.address);

        let requester = RetransmissionRequester::new(self.config.packet_capacity_words);
        let mut assembler: Option<SequenceAssembler> = None;
        let mut lost_sequence_counts = Vec::new();
        let mut rounds = 0u32;

        loop {
            let Some(datagram) = self.transport.receive(self.config.receive_timeout).await? else {
                // receive window elapsed without a datagram - the burst is over, ask for
                //  whatever is still missing
                let Some(assembler) = &assembler else {
                    return Err(ExtractionError::NoInitialResponse { core });
                };
                trace!("core {}: receive timeout", core);
                if self.request_missing(&requester, assembler, &mut lost_sequence_counts, &mut rounds).await? {
                    break;
                }
                continue;
            };

            let Some(assembler) = assembler.as_mut() else {
                let initialized = SequenceAssembler::from_first_packet(core, self.config.packet_capacity_words, &datagram)?;
                if initialized.declared_length() != self.request.length.safe_cast() {
                    warn!(
                        "core {}: declared length {} differs from the requested {} bytes - trusting the declaration",
                        core, initialized.declared_length(), self.request.length
                    );
                }
                assembler = Some(initialized);
                continue;
            };

            match assembler.feed(&datagram)? {
                FeedOutcome::Data { is_final: false, .. } => {}
                FeedOutcome::Data { is_final: true, .. } | FeedOutcome::EndOfStream => {
                    // the sender believes it is done - either everything is here, or it is
                    //  time to ask for the gaps without waiting for a timeout
                    if assembler.is_complete() {
                        break;
                    }
                    if self.request_missing(&requester, assembler, &mut lost_sequence_counts, &mut rounds).await? {
                        break;
                    }
                }
            }
        }

        let assembler = assembler.expect("the transfer loop only completes with an initialized assembler");
        debug!(
            "core {}: extraction of {} bytes complete after {} retransmission round(s)",
            core,
            assembler.declared_length(),
            rounds
        );
        Ok(Extraction {
            data: assembler.into_bytes(),
            lost_sequence_counts,
        })
    }

    /// Compute the missing set and request it; `Ok(true)` means nothing is missing and the
    ///  run is complete.
    async fn request_missing(
        &self,
        requester: &RetransmissionRequester,
        assembler: &SequenceAssembler,
        lost_sequence_counts: &mut Vec<usize>,
        rounds: &mut u32,
    ) -> Result<bool, ExtractionError> {
        let missing = requester.compute_missing(assembler.received(), assembler.max_sequence());
        lost_sequence_counts.push(missing.len());
        if missing.is_empty() {
            return Ok(true);
        }

        *rounds += 1;
        if let Some(budget) = self.config.max_retransmission_rounds {
            if *rounds > budget {
                return Err(ExtractionError::RetryBudgetExhausted {
                    core: self.request.target,
                    rounds: budget,
                });
            }
        }

        debug!(
            "core {}: requesting {} missing sequence number(s), round {}",
            self.request.target,
            missing.len(),
            rounds
        );
        for packet in requester.build_request_packets(&missing) {
            self.transport.send(self.request.target, &packet).await?;
            // give the monitor core's ingress queue room to drain between requests
            sleep(self.config.resend_pacing).await;
        }
        Ok(false)
    }
}

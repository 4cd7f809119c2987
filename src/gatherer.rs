//! The place where the pieces come together: one `Gatherer` per mesh, wiring the data
//!  transport, the monitor control channel and the supervising monitor cores, with an API
//!  for application code to pull memory regions off the machine.

use std::sync::Arc;

use crate::config::GatherConfig;
use crate::core_addr::CoreAddr;
use crate::error::ExtractionError;
use crate::placements::{PlacementLookup, VertexId};
use crate::session::{Extraction, ExtractionRequest, ExtractionSession};
use crate::status::StatusControlChannel;
use crate::transport::{verify_data_channel_tags, DatagramTransport, IpTag};

pub struct Gatherer {
    config: Arc<GatherConfig>,
    transport: Arc<dyn DatagramTransport>,
    control: Arc<StatusControlChannel>,
    monitor_cores: Vec<CoreAddr>,
}

impl Gatherer {
    /// Wire up a gatherer for one mesh.
    ///
    /// `data_channel_tags` is the tag allocation of the board's ingress; exactly one tag must
    ///  carry the extraction traffic identifier, or the data channel cannot deliver stripped
    ///  datagrams to `transport`.
    pub fn new(
        config: Arc<GatherConfig>,
        transport: Arc<dyn DatagramTransport>,
        control: Arc<StatusControlChannel>,
        monitor_cores: Vec<CoreAddr>,
        data_channel_tags: &[IpTag],
    ) -> Result<Gatherer, ExtractionError> {
        config.validate()?;
        verify_data_channel_tags(data_channel_tags)?;

        Ok(Gatherer {
            config,
            transport,
            control,
            monitor_cores,
        })
    }

    /// Extract one memory region, returning the assembled bytes plus loss statistics.
    pub async fn extract(&self, request: ExtractionRequest) -> Result<Extraction, ExtractionError> {
        ExtractionSession::new(
            self.config.clone(),
            self.transport.clone(),
            self.control.clone(),
            self.monitor_cores.clone(),
            request,
        )
        .run()
        .await
    }

    /// Extract a memory region belonging to a placed vertex.
    pub async fn extract_from_vertex(
        &self,
        placements: &dyn PlacementLookup,
        vertex: VertexId,
        address: u32,
        length: u32,
    ) -> Result<Extraction, ExtractionError> {
        let target = placements
            .placement_of(vertex)
            .ok_or(ExtractionError::UnknownVertex(vertex))?;

        self.extract(ExtractionRequest { target, address, length }).await
    }

    /// The control channel, for status queries and reinjection configuration around
    ///  extractions.
    pub fn control(&self) -> &StatusControlChannel {
        &self.control
    }
}

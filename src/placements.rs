//! The narrow placement interface: resolving a graph vertex to the core it was mapped to.
//!
//! The mapping pipeline that produces placements is a separate concern; this crate only
//!  consumes the finished lookup.

#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use std::fmt::{Display, Formatter};

use crate::core_addr::CoreAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexId(pub u32);

impl Display for VertexId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg_attr(test, automock)]
pub trait PlacementLookup: Send + Sync + 'static {
    fn placement_of(&self, vertex: VertexId) -> Option<CoreAddr>;
}

/// A finished placement table.
pub struct StaticPlacements {
    placements: FxHashMap<VertexId, CoreAddr>,
}

impl StaticPlacements {
    pub fn new() -> StaticPlacements {
        StaticPlacements {
            placements: FxHashMap::default(),
        }
    }

    pub fn place(&mut self, vertex: VertexId, core: CoreAddr) {
        self.placements.insert(vertex, core);
    }
}

impl Default for StaticPlacements {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(VertexId, CoreAddr)> for StaticPlacements {
    fn from_iter<T: IntoIterator<Item = (VertexId, CoreAddr)>>(iter: T) -> StaticPlacements {
        StaticPlacements {
            placements: iter.into_iter().collect(),
        }
    }
}

impl PlacementLookup for StaticPlacements {
    fn placement_of(&self, vertex: VertexId) -> Option<CoreAddr> {
        self.placements.get(&vertex).copied()
    }
}

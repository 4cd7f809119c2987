use std::fmt::{Debug, Display, Formatter};

/// The location of one processor in the mesh: chip coordinates `(x, y)` plus the processor
///  number `p` on that chip.
///
/// The monitor agent that answers extraction and control traffic runs on a well-known processor
///  per chip, so most of this crate's traffic is addressed at monitor cores; the type does not
///  distinguish these from application cores.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CoreAddr {
    pub x: u8,
    pub y: u8,
    pub p: u8,
}

impl CoreAddr {
    pub const fn new(x: u8, y: u8, p: u8) -> CoreAddr {
        CoreAddr { x, y, p }
    }
}

impl Debug for CoreAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.p)
    }
}

impl Display for CoreAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

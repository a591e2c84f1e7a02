//! Port identifiers used on connections.

use std::fmt;

/// Identifies an output port of a kernel by declaration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputPortId(pub u16);

impl fmt::Debug for OutputPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out{}", self.0)
    }
}

/// Identifies an input port of a kernel, and for port arrays the element.
///
/// Multiplicity is checked per `InputPortId`: a scalar data input accepts one
/// connection, an array input accepts one connection per element.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputPortId {
    /// Declaration index of the port.
    pub port: u16,
    /// Element index for port arrays.
    pub array_index: Option<u16>,
}

impl InputPortId {
    /// A plain (non-array) input port.
    pub const fn scalar(port: u16) -> Self {
        Self {
            port,
            array_index: None,
        }
    }

    /// One element of an input port array.
    pub const fn array(port: u16, index: u16) -> Self {
        Self {
            port,
            array_index: Some(index),
        }
    }
}

impl fmt::Debug for InputPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.array_index {
            Some(index) => write!(f, "in{}[{}]", self.port, index),
            None => write!(f, "in{}", self.port),
        }
    }
}

//! Traversal Flags
//!
//! Every connection carries a small bitmask classifying what kind of link it
//! is. Hierarchies are selected by masking: an edge participates in a
//! hierarchy when its flags intersect the hierarchy's mask.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Bitmask classifying a connection's category and direction variant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraversalFlags(u32);

impl TraversalFlags {
    /// No category. Never selected by any mask.
    pub const NONE: Self = Self(0);

    /// Data flowing from an output port into an input port in the same cycle.
    pub const DATA: Self = Self(1 << 0);

    /// Simulation-side message link.
    pub const MESSAGE: Self = Self(1 << 1);

    /// Domain-specific link category.
    pub const DOMAIN_SPECIFIC: Self = Self(1 << 2);

    /// Data link carrying the previous cycle's value, in real data direction.
    pub const FEEDBACK: Self = Self(1 << 3);

    /// Synthetic reversed twin of a [`FEEDBACK`](Self::FEEDBACK) link. Orders
    /// the consumer before the producer without forming a cycle.
    pub const FEEDBACK_BACK_EDGE: Self = Self(1 << 4);

    /// Every bit.
    pub const ALL: Self = Self(0b1_1111);

    /// Default mask for execution ordering.
    pub const DEFAULT_TRAVERSAL: Self = Self(Self::DATA.0 | Self::FEEDBACK_BACK_EDGE.0);

    /// Default mask for pointer patching and culling.
    pub const DEFAULT_ALTERNATE: Self = Self(Self::DATA.0 | Self::FEEDBACK.0);

    /// Build flags from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if any bit is shared with `mask`.
    pub const fn intersects(self, mask: Self) -> bool {
        self.0 & mask.0 != 0
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TraversalFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TraversalFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TraversalFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for TraversalFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(TraversalFlags, &str); 5] = [
            (TraversalFlags::DATA, "DATA"),
            (TraversalFlags::MESSAGE, "MESSAGE"),
            (TraversalFlags::DOMAIN_SPECIFIC, "DOMAIN_SPECIFIC"),
            (TraversalFlags::FEEDBACK, "FEEDBACK"),
            (TraversalFlags::FEEDBACK_BACK_EDGE, "FEEDBACK_BACK_EDGE"),
        ];

        if self.is_empty() {
            return f.write_str("NONE");
        }

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Which edge subset a query or walk looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hierarchy {
    /// Edges selected by the traversal mask. Defines execution order.
    Traversal,
    /// Edges selected by the alternate mask. Defines what feeds which port.
    Alternate,
}

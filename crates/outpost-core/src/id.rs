use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a pluggable node (generator, consumer, battery, conduit)
    /// registered with a utility network.
    pub struct NodeId;
}

/// Identifies a connected component of a utility network.
///
/// Grid ids are reassigned on every rebuild, so they are only meaningful
/// until the next topology change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridId(pub u32);

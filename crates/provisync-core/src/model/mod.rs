// ── Resource model ──
//
// The reconciled view of one resource and the snapshot shape fed into it.

pub mod snapshot;
pub mod view;

pub use snapshot::Snapshot;
pub use view::{ChildEntry, ChildKey, ResourceView};

//! Audience selection, suppression, and best-effort fan-out dispatch for
//! capability and metadata notifications (spec.md §4.3 "Broadcast Engine",
//! plus the point-to-point helpers spec.md §4.2 attributes to the client
//! registry but that share this crate's transport plumbing).

pub mod audience;
pub mod engine;

pub use audience::{select_audience, AudienceResult};
pub use engine::{BroadcastEngine, REFRESH_SILENCED_BELOW_VERSION};

//! Cross-process status reporting between a voting worker and its frontend.
//!
//! The worker publishes complete [`StatusRecord`] snapshots; the frontend
//! polls them. Nothing else is shared: no sockets, no shared memory.
//!
//! ## Wire format
//!
//! ```json
//! {"step":3,"status":"completed","message":"Vote successfully recorded for Bob!",
//!  "timestamp":1760870400.123,"success":true,"voter_id":"first one","candidate":"Bob"}
//! ```
//!
//! Field names are a compatibility contract with existing pollers; do not
//! rename them.

pub mod channel;
pub mod status;

pub use channel::{FileStatusChannel, MemoryStatusChannel, StatusChannel};
pub use status::{StatusRecord, StepStatus};

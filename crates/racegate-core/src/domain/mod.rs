//! Shared data model: entities, channels and attempt outcomes.

pub mod channel;
pub mod entity;
pub mod outcome;

pub use channel::{
    Channel, ChannelAssignment, ChannelCandidate, LatencyGrade, PoolAssignment, ValidChannel,
    Validation,
};
pub use entity::{Entity, EntityKey};
pub use outcome::{AttemptOutcome, ErrorKind};

//! racegate core library
//!
//! Time-gated, channel-raced acquisition runs: a channel pool primes
//! validated egress channels per entity, a race dispatcher fans each attempt
//! out across them, and one retry loop per entity runs until it succeeds or
//! the run stops.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod entity_loop;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod metrics;
pub mod obs;
pub mod pool;
pub mod run;
pub mod state;
pub mod telemetry;

pub use clock::{sleep_unless_cancelled, AnchoredClock, Clock, SystemClock};
pub use collaborators::{AttemptExecutor, ChannelSource, ChannelValidator, NoopNotifier, Notifier};
pub use config::{
    DispatchConfig, EscalationPolicy, LoopConfig, PoolConfig, RunBudget, RunConfig, RunMode,
};
pub use dispatch::{RaceDispatcher, DIRECT_ROUTE};
pub use domain::{
    AttemptOutcome, Channel, ChannelAssignment, ChannelCandidate, Entity, EntityKey, ErrorKind,
    LatencyGrade, PoolAssignment, ValidChannel, Validation,
};
pub use entity_loop::{EntityLoop, LoopExit};
pub use error::{RaceError, Result};
pub use gate::{format_countdown, CountdownObserver, GateOutcome, LogCountdown, TimeGate};
pub use pool::{pad_with_sentinels, ChannelPool};
pub use run::{OrchestrationRun, RunSummary, StopHandle};
pub use state::{FailureRecord, RunSnapshot, RunState, StopReason};

pub use metrics::{MetricsSnapshot, METRICS};
pub use telemetry::init_tracing;

/// racegate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

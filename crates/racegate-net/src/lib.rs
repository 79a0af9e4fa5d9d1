//! HTTP collaborators for racegate
//!
//! reqwest-backed implementations of the racegate-core collaborator traits:
//! a proxy-provider channel source, a probe validator, a configurable
//! attempt executor and a webhook notifier.

pub mod error;
pub mod executor;
pub mod notifier;
pub mod source;
pub mod validator;

pub use error::{NetError, NetResult};
pub use executor::{classify_body, classify_status, ExecutorConfig, HttpAttemptExecutor};
pub use notifier::{Notification, NotifierConfig, WebhookNotifier};
pub use source::{parse_candidates, HttpChannelSource, SourceConfig};
pub use validator::{extract_egress_ip, HttpProbeValidator, Probe, ProbeMode, ValidatorConfig};

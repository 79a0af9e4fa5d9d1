//! In-memory fakes for the collaborator traits (testing only).
//!
//! `FakeSource`, `FakeValidator`, `ScriptedExecutor`, `RecordingNotifier`
//! and `RecordingCountdown` satisfy the trait contracts without any network
//! access and record every call for assertions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborators::{AttemptExecutor, ChannelSource, ChannelValidator, Notifier};
use crate::dispatch::DIRECT_ROUTE;
use crate::domain::{
    AttemptOutcome, ChannelCandidate, Entity, EntityKey, ErrorKind, ValidChannel, Validation,
};
use crate::error::{RaceError, Result};
use crate::gate::CountdownObserver;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// FakeSource
// ---------------------------------------------------------------------------

/// What one `fetch` call does.
#[derive(Debug, Clone)]
pub enum SourceStep {
    /// Return `count` fresh, unique candidates.
    Generate,
    /// Return nothing.
    Empty,
    /// Return a hard error.
    Fail,
    /// Return exactly these candidates.
    Batch(Vec<ChannelCandidate>),
    /// Never answer (exercises the fetch timeout).
    Hang,
}

/// Channel source playing a script, then repeating a fallback step.
#[derive(Debug)]
pub struct FakeSource {
    script: Mutex<VecDeque<SourceStep>>,
    fallback: SourceStep,
    requested: Mutex<Vec<usize>>,
    issued: AtomicUsize,
}

impl FakeSource {
    pub fn new(fallback: SourceStep) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            requested: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn generating() -> Self {
        Self::new(SourceStep::Generate)
    }

    pub fn empty() -> Self {
        Self::new(SourceStep::Empty)
    }

    pub fn failing() -> Self {
        Self::new(SourceStep::Fail)
    }

    /// Queue `step` to run before the fallback.
    pub fn then(self, step: SourceStep) -> Self {
        lock(&self.script).push_back(step);
        self
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> usize {
        lock(&self.requested).len()
    }

    /// `count` argument of every call, in order.
    pub fn requested(&self) -> Vec<usize> {
        lock(&self.requested).clone()
    }

    fn next_candidate(&self) -> ChannelCandidate {
        let n = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        let host = format!("10.{}.{}.{}", (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff);
        ChannelCandidate::new(host, 8080).with_source("fake")
    }
}

#[async_trait]
impl ChannelSource for FakeSource {
    async fn fetch(&self, count: usize) -> Result<Vec<ChannelCandidate>> {
        lock(&self.requested).push(count);
        let step = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            SourceStep::Generate => Ok((0..count).map(|_| self.next_candidate()).collect()),
            SourceStep::Empty => Ok(Vec::new()),
            SourceStep::Fail => Err(RaceError::Source("provider unavailable".into())),
            SourceStep::Batch(batch) => Ok(batch),
            SourceStep::Hang => {
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FakeValidator
// ---------------------------------------------------------------------------

/// Validator with per-host verdicts and an optional artificial delay.
#[derive(Debug)]
pub struct FakeValidator {
    reject_all: bool,
    rejected: HashSet<String>,
    erroring: HashSet<String>,
    latencies: HashMap<String, Duration>,
    default_latency: Duration,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeValidator {
    fn default() -> Self {
        Self {
            reject_all: false,
            rejected: HashSet::new(),
            erroring: HashSet::new(),
            latencies: HashMap::new(),
            default_latency: Duration::from_millis(50),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakeValidator {
    /// Passes every candidate.
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn rejecting_all() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }

    pub fn reject(mut self, host: impl Into<String>) -> Self {
        self.rejected.insert(host.into());
        self
    }

    pub fn error_on(mut self, host: impl Into<String>) -> Self {
        self.erroring.insert(host.into());
        self
    }

    pub fn with_latency(mut self, host: impl Into<String>, latency: Duration) -> Self {
        self.latencies.insert(host.into(), latency);
        self
    }

    /// Sleep this long inside every `validate` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `validate` calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelValidator for FakeValidator {
    async fn validate(&self, candidate: &ChannelCandidate) -> Result<Validation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.erroring.contains(&candidate.host) {
            return Err(RaceError::Validation {
                channel: candidate.address(),
                reason: "connection refused".into(),
            });
        }

        let latency = self
            .latencies
            .get(&candidate.host)
            .copied()
            .unwrap_or(self.default_latency);
        if self.reject_all || self.rejected.contains(&candidate.host) {
            return Ok(Validation::rejected(latency));
        }
        Ok(Validation::passed(latency).with_egress_ip(candidate.host.clone()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// What an attempt does on a given route.
#[derive(Debug, Clone, PartialEq)]
pub enum Behaviour {
    Succeed,
    Fail(ErrorKind),
    /// Return `Err` from the executor.
    Error,
    Panic,
    /// Fail transiently for the first `n` calls, then succeed.
    SucceedAfter(u32),
}

#[derive(Debug, Clone)]
struct Step {
    behaviour: Behaviour,
    delay: Duration,
}

/// One recorded executor call.
#[derive(Debug, Clone)]
pub struct AttemptCall {
    pub entity: EntityKey,
    /// `host:port`, or `"direct"` for default routing.
    pub route: String,
    pub at: tokio::time::Instant,
}

/// Attempt executor scripted per route and per entity.
///
/// Entity scripts take priority over route scripts, which take priority
/// over the default.
#[derive(Debug)]
pub struct ScriptedExecutor {
    default: Step,
    routes: HashMap<String, Step>,
    entities: HashMap<EntityKey, Step>,
    calls: Mutex<Vec<AttemptCall>>,
    seen: Mutex<HashMap<(EntityKey, String), u32>>,
    completed: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(default: Behaviour) -> Self {
        Self {
            default: Step {
                behaviour: default,
                delay: Duration::ZERO,
            },
            routes: HashMap::new(),
            entities: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            seen: Mutex::new(HashMap::new()),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Behaviour::Succeed)
    }

    pub fn failing(kind: ErrorKind) -> Self {
        Self::new(Behaviour::Fail(kind))
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default.delay = delay;
        self
    }

    /// Script the route `label` (`host:port` or `"direct"`).
    pub fn route(self, label: impl Into<String>, behaviour: Behaviour) -> Self {
        self.route_with_delay(label, behaviour, Duration::ZERO)
    }

    pub fn route_with_delay(
        mut self,
        label: impl Into<String>,
        behaviour: Behaviour,
        delay: Duration,
    ) -> Self {
        self.routes.insert(label.into(), Step { behaviour, delay });
        self
    }

    pub fn entity(mut self, key: impl Into<EntityKey>, behaviour: Behaviour) -> Self {
        self.entities.insert(
            key.into(),
            Step {
                behaviour,
                delay: self.default.delay,
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<AttemptCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls_for(&self, key: &EntityKey) -> Vec<AttemptCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| &c.entity == key)
            .cloned()
            .collect()
    }

    /// Attempts that ran to completion, including race losers.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttemptExecutor for ScriptedExecutor {
    async fn attempt(
        &self,
        entity: &Entity,
        channel: Option<&ValidChannel>,
    ) -> Result<AttemptOutcome> {
        let route = channel
            .map(ValidChannel::address)
            .unwrap_or_else(|| DIRECT_ROUTE.to_string());
        lock(&self.calls).push(AttemptCall {
            entity: entity.key.clone(),
            route: route.clone(),
            at: tokio::time::Instant::now(),
        });
        let nth = {
            let mut seen = lock(&self.seen);
            let n = seen.entry((entity.key.clone(), route.clone())).or_insert(0);
            *n += 1;
            *n
        };

        let step = self
            .entities
            .get(&entity.key)
            .or_else(|| self.routes.get(&route))
            .unwrap_or(&self.default)
            .clone();

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        match step.behaviour {
            Behaviour::Succeed => Ok(AttemptOutcome::success(format!("acquired via {route}"))),
            Behaviour::Fail(kind) => Ok(AttemptOutcome::failure(kind, format!("{kind} on {route}"))),
            Behaviour::Error => Err(RaceError::Attempt(format!("socket closed on {route}"))),
            Behaviour::Panic => panic!("scripted panic on {route}"),
            Behaviour::SucceedAfter(n) if nth > n => {
                Ok(AttemptOutcome::success(format!("acquired via {route}")))
            }
            Behaviour::SucceedAfter(_) => Ok(AttemptOutcome::transient(format!("busy on {route}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Notifier that records every call, optionally failing each one.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    fail: bool,
    notified: Mutex<Vec<(EntityKey, AttemptOutcome)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        lock(&self.notified).len()
    }

    pub fn count_for(&self, key: &EntityKey) -> usize {
        lock(&self.notified).iter().filter(|(k, _)| k == key).count()
    }

    pub fn notified(&self) -> Vec<(EntityKey, AttemptOutcome)> {
        lock(&self.notified).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn on_success(&self, entity: &Entity, outcome: &AttemptOutcome) -> Result<()> {
        lock(&self.notified).push((entity.key.clone(), outcome.clone()));
        if self.fail {
            return Err(RaceError::Notify("webhook returned 500".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingCountdown
// ---------------------------------------------------------------------------

/// Countdown observer that records ticks instead of rendering them.
#[derive(Debug, Default)]
pub struct RecordingCountdown {
    ticks: Mutex<Vec<(String, u64)>>,
    reached: Mutex<Vec<String>>,
}

impl RecordingCountdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(label, remaining_secs)` of every tick.
    pub fn ticks(&self) -> Vec<(String, u64)> {
        lock(&self.ticks).clone()
    }

    /// Remaining seconds of every tick for `label`.
    pub fn ticks_for(&self, label: &str) -> Vec<u64> {
        lock(&self.ticks)
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn reached(&self) -> Vec<String> {
        lock(&self.reached).clone()
    }
}

impl CountdownObserver for RecordingCountdown {
    fn on_tick(&self, label: &str, remaining_secs: u64) {
        lock(&self.ticks).push((label.to_string(), remaining_secs));
    }

    fn on_reached(&self, label: &str) {
        lock(&self.reached).push(label.to_string());
    }
}

//! Contracts to the subsystems surrounding the scheduling engine.
//!
//! The engine never executes plugins, writes retention files or talks to
//! broker modules itself; it calls through these traits. Every method has a
//! no-op default so the engine runs stand-alone and tests can override just
//! the pieces they observe.

use crate::clock::Timestamp;
use crate::error::Result;
use crate::events::TimedEvent;
use crate::objects::{Host, Service};

/// What happened to a timed event, from the broker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEventKind {
    Added,
    Removed,
    Executed,
    Sleep,
}

/// Fire-and-forget event stream for broker modules.
pub trait Broker: Send {
    fn timed_event(&mut self, _kind: BrokerEventKind, _event: &TimedEvent) {}
    fn external_command_check(&mut self, _now: Timestamp) {}
}

/// Check-execution subsystem: starts plugin runs and collects results.
pub trait CheckExecutor: Send {
    fn run_service_check(&mut self, _service: &Service, _options: u32, _latency: f64) {}
    fn run_host_check(&mut self, _host: &Host, _options: u32, _latency: f64) {}

    /// Collect finished check results. A failure is logged by the caller
    /// and never stops the loop.
    fn reap_results(&mut self) -> Result<()> {
        Ok(())
    }

    fn check_for_orphaned_services(&mut self) {}
    fn check_for_orphaned_hosts(&mut self) {}
    fn check_service_freshness(&mut self) {}
    fn check_host_freshness(&mut self) {}

    /// Number of service checks currently in flight, for the
    /// parallel-check ceiling.
    fn running_service_checks(&self) -> u32 {
        0
    }
}

/// Answers whether an instant falls inside a named check time period.
pub trait TimePeriods: Send {
    fn is_valid(&self, _time: Timestamp, _period: &str) -> bool {
        true
    }

    /// Next instant at or after `time` that is inside the period. Returning
    /// `time` itself means "no valid time found".
    fn next_valid(&self, time: Timestamp, _period: &str) -> Timestamp {
        time
    }
}

/// Status/retention persistence.
pub trait Persister: Send {
    fn update_service_status(&mut self, _service: &Service) {}
    fn update_host_status(&mut self, _host: &Host) {}
    fn update_program_status(&mut self) {}
    fn update_all_status(&mut self) {}
    fn save_retention(&mut self) {}
}

pub trait LogRotator: Send {
    fn rotate(&mut self) {}
}

pub trait CommandProcessor: Send {
    fn process_external_commands(&mut self) {}
}

pub trait DowntimeManager: Send {
    fn handle_downtime(&mut self, _downtime_id: u64) {}
    fn expire_downtimes(&mut self) {}
}

pub trait CommentManager: Send {
    fn expire_comment(&mut self, _comment_id: u64) {}
}

/// Recomputes re-notification times after timestamps move.
pub trait NotificationTimer: Send {
    fn next_service_notification(&self, _service: &Service, last: Timestamp) -> Timestamp {
        last
    }
    fn next_host_notification(&self, _host: &Host, last: Timestamp) -> Timestamp {
        last
    }
}

/// Stand-in that accepts every default.
#[derive(Debug, Default)]
pub struct Null;

impl Broker for Null {}
impl CheckExecutor for Null {}
impl TimePeriods for Null {}
impl Persister for Null {}
impl LogRotator for Null {}
impl CommandProcessor for Null {}
impl DowntimeManager for Null {}
impl CommentManager for Null {}
impl NotificationTimer for Null {}

/// Bundle of all collaborator handles the engine owns.
pub struct Collaborators {
    pub checks: Box<dyn CheckExecutor>,
    pub time_periods: Box<dyn TimePeriods>,
    pub broker: Box<dyn Broker>,
    pub persister: Box<dyn Persister>,
    pub log_rotator: Box<dyn LogRotator>,
    pub commands: Box<dyn CommandProcessor>,
    pub downtimes: Box<dyn DowntimeManager>,
    pub comments: Box<dyn CommentManager>,
    pub notifications: Box<dyn NotificationTimer>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            checks: Box::new(Null),
            time_periods: Box::new(Null),
            broker: Box::new(Null),
            persister: Box::new(Null),
            log_rotator: Box::new(Null),
            commands: Box::new(Null),
            downtimes: Box::new(Null),
            comments: Box::new(Null),
            notifications: Box::new(Null),
        }
    }
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checks(mut self, checks: Box<dyn CheckExecutor>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_time_periods(mut self, time_periods: Box<dyn TimePeriods>) -> Self {
        self.time_periods = time_periods;
        self
    }

    pub fn with_broker(mut self, broker: Box<dyn Broker>) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_persister(mut self, persister: Box<dyn Persister>) -> Self {
        self.persister = persister;
        self
    }
}

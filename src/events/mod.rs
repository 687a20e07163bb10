//! Timed events and the dual-lane event queue.
//!
//! A [`TimedEvent`] describes one schedulable action: a host/service check,
//! or one of the engine's internal maintenance tasks. Events live in one of
//! two priority lanes (see [`Lane`]) sorted ascending by run time; check
//! events are additionally indexed by the entity they reference so
//! collaborators can find or cancel a pending check in O(1).

pub mod queue;

use std::fmt;
use std::sync::Arc;

use crate::clock::Timestamp;
use crate::objects::{HostId, ServiceId};

/// Custom run-time computation for recurring events tied to absolute
/// boundaries (e.g. the next log-rotation instant) rather than a fixed
/// interval.
pub type TimingFn = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Callback carried by `UserFunction` events.
pub type UserFn = Arc<dyn Fn() + Send + Sync>;

/// Which of the two priority queues an event belongs to.
///
/// The high lane carries internal maintenance events; the low lane carries
/// host and service checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    High,
    Low,
}

/// What a timed event does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    ServiceCheck,
    CommandCheck,
    LogRotation,
    ProgramShutdown,
    ProgramRestart,
    CheckReaper,
    OrphanCheck,
    RetentionSave,
    StatusSave,
    ScheduledDowntime,
    ServiceFreshnessCheck,
    ExpireDowntime,
    HostCheck,
    HostFreshnessCheck,
    RescheduleChecks,
    ExpireComment,
    Sleep,
    UserFunction,
}

impl EventCategory {
    /// Only host and service checks are tracked in the quick-lookup index.
    pub fn is_indexable(self) -> bool {
        matches!(self, EventCategory::ServiceCheck | EventCategory::HostCheck)
    }

    pub fn name(self) -> &'static str {
        match self {
            EventCategory::ServiceCheck => "SERVICE_CHECK",
            EventCategory::CommandCheck => "COMMAND_CHECK",
            EventCategory::LogRotation => "LOG_ROTATION",
            EventCategory::ProgramShutdown => "PROGRAM_SHUTDOWN",
            EventCategory::ProgramRestart => "PROGRAM_RESTART",
            EventCategory::CheckReaper => "CHECK_REAPER",
            EventCategory::OrphanCheck => "ORPHAN_CHECK",
            EventCategory::RetentionSave => "RETENTION_SAVE",
            EventCategory::StatusSave => "STATUS_SAVE",
            EventCategory::ScheduledDowntime => "SCHEDULED_DOWNTIME",
            EventCategory::ServiceFreshnessCheck => "SFRESHNESS_CHECK",
            EventCategory::ExpireDowntime => "EXPIRE_DOWNTIME",
            EventCategory::HostCheck => "HOST_CHECK",
            EventCategory::HostFreshnessCheck => "HFRESHNESS_CHECK",
            EventCategory::RescheduleChecks => "RESCHEDULE_CHECKS",
            EventCategory::ExpireComment => "EXPIRE_COMMENT",
            EventCategory::Sleep => "SLEEP",
            EventCategory::UserFunction => "USER_FUNCTION",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Non-owning reference to whatever external entity an event acts on.
#[derive(Clone)]
pub enum Payload {
    None,
    Host(HostId),
    Service(ServiceId),
    Downtime(u64),
    Comment(u64),
    UserFunction(UserFn),
}

impl Payload {
    pub fn host_id(&self) -> Option<HostId> {
        match self {
            Payload::Host(id) => Some(*id),
            _ => None,
        }
    }

    pub fn service_id(&self) -> Option<ServiceId> {
        match self {
            Payload::Service(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => write!(f, "None"),
            Payload::Host(id) => write!(f, "Host({})", id.0),
            Payload::Service(id) => write!(f, "Service({})", id.0),
            Payload::Downtime(id) => write!(f, "Downtime({id})"),
            Payload::Comment(id) => write!(f, "Comment({id})"),
            Payload::UserFunction(_) => write!(f, "UserFunction"),
        }
    }
}

/// Queue-unique handle to a scheduled event.
///
/// Handles replace the original raw prev/next linkage: the queue hands one
/// out on insertion and the index stores handles, so an event can be
/// referenced from both places without aliasing the node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub(crate) u64);

/// One scheduled action.
#[derive(Clone)]
pub struct TimedEvent {
    pub(crate) id: EventId,
    pub category: EventCategory,
    /// Absolute time this event is due.
    pub run_time: Timestamp,
    pub recurring: bool,
    /// Spacing in seconds between runs of a recurring event.
    pub interval: u64,
    /// Whether this event's run time shifts with system clock jumps.
    pub compensate_for_time_change: bool,
    /// Overrides interval-based rescheduling and clock-jump shifting.
    pub timing_fn: Option<TimingFn>,
    pub payload: Payload,
    /// Check-option bitmask (`CHECK_OPTION_*`).
    pub options: u32,
}

impl TimedEvent {
    pub fn id(&self) -> EventId {
        self.id
    }
}

impl fmt::Debug for TimedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedEvent")
            .field("id", &self.id.0)
            .field("category", &self.category)
            .field("run_time", &self.run_time)
            .field("recurring", &self.recurring)
            .field("interval", &self.interval)
            .field(
                "compensate_for_time_change",
                &self.compensate_for_time_change,
            )
            .field("timing_fn", &self.timing_fn.is_some())
            .field("payload", &self.payload)
            .field("options", &self.options)
            .finish()
    }
}

/// Everything needed to create one event; the single entry point
/// [`queue::EventQueue::schedule`] turns this into a queued [`TimedEvent`].
#[derive(Clone)]
pub struct Schedule {
    pub category: EventCategory,
    pub high_priority: bool,
    pub run_time: Timestamp,
    pub recurring: bool,
    pub interval: u64,
    pub compensate_for_time_change: bool,
    pub timing_fn: Option<TimingFn>,
    pub payload: Payload,
    pub options: u32,
}

impl Schedule {
    /// A one-shot low-lane event with no payload and default options.
    pub fn once(category: EventCategory, run_time: Timestamp) -> Self {
        Self {
            category,
            high_priority: false,
            run_time,
            recurring: false,
            interval: 0,
            compensate_for_time_change: true,
            timing_fn: None,
            payload: Payload::None,
            options: 0,
        }
    }

    /// A recurring high-lane maintenance event.
    pub fn recurring_high(category: EventCategory, run_time: Timestamp, interval: u64) -> Self {
        Self {
            category,
            high_priority: true,
            run_time,
            recurring: true,
            interval,
            compensate_for_time_change: true,
            timing_fn: None,
            payload: Payload::None,
            options: 0,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_options(mut self, options: u32) -> Self {
        self.options = options;
        self
    }

    pub fn with_timing_fn(mut self, timing_fn: TimingFn) -> Self {
        self.timing_fn = Some(timing_fn);
        self
    }

    pub fn lane(&self) -> Lane {
        if self.high_priority { Lane::High } else { Lane::Low }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_check_categories_are_indexable() {
        assert!(EventCategory::ServiceCheck.is_indexable());
        assert!(EventCategory::HostCheck.is_indexable());
        assert!(!EventCategory::CheckReaper.is_indexable());
        assert!(!EventCategory::ScheduledDowntime.is_indexable());
    }

    #[test]
    fn test_category_names() {
        assert_eq!(EventCategory::ServiceCheck.to_string(), "SERVICE_CHECK");
        assert_eq!(EventCategory::Sleep.to_string(), "SLEEP");
    }

    #[test]
    fn test_schedule_builders() {
        let sched = Schedule::once(EventCategory::ServiceCheck, 100)
            .with_payload(Payload::Service(ServiceId(4)))
            .with_options(crate::objects::CHECK_OPTION_FORCE_EXECUTION);
        assert_eq!(sched.lane(), Lane::Low);
        assert!(!sched.recurring);
        assert_eq!(sched.payload.service_id(), Some(ServiceId(4)));

        let sched = Schedule::recurring_high(EventCategory::CheckReaper, 50, 10);
        assert_eq!(sched.lane(), Lane::High);
        assert!(sched.recurring);
        assert_eq!(sched.interval, 10);
    }

    #[test]
    fn test_payload_accessors() {
        assert_eq!(Payload::Host(HostId(1)).host_id(), Some(HostId(1)));
        assert_eq!(Payload::Host(HostId(1)).service_id(), None);
        assert_eq!(Payload::None.host_id(), None);
    }
}

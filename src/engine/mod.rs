//! The scheduling engine.
//!
//! One `Engine` owns both event lanes, the quick-lookup index, the monitored
//! objects and the collaborator handles; every mutation of the schedule goes
//! through it, preserving the single-writer discipline. Concurrent producers
//! talk to a running engine through an [`EngineHandle`], never by touching
//! the lanes directly.

pub mod builder;
pub mod compensate;
pub mod dispatch;
pub mod reschedule;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::collaborators::{BrokerEventKind, Collaborators};
use crate::config::Config;
use crate::events::queue::EventQueue;
use crate::events::{EventCategory, EventId, Lane, Payload, Schedule};
use crate::objects::ObjectModel;

pub use builder::SchedulingStatistics;

/// Out-of-band wakeups for a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    /// An external command arrived and should be processed promptly.
    ExternalCommand,
    /// Finish the current dispatch, then stop.
    Shutdown,
    /// Finish the current dispatch, then stop for a reload.
    Restart,
}

/// Cloneable sender half used to wake or stop a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineSignal>,
}

impl EngineHandle {
    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineSignal::Shutdown).await;
    }

    pub async fn restart(&self) {
        let _ = self.tx.send(EngineSignal::Restart).await;
    }

    pub async fn notify_external_command(&self) {
        let _ = self.tx.send(EngineSignal::ExternalCommand).await;
    }

    /// Non-async variant for signal handlers and drop paths.
    pub fn try_shutdown(&self) {
        let _ = self.tx.try_send(EngineSignal::Shutdown);
    }
}

pub struct Engine {
    pub(crate) config: Config,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) objects: ObjectModel,
    pub(crate) queue: EventQueue,
    pub(crate) collab: Collaborators,
    pub(crate) stats: SchedulingStatistics,

    pub(crate) sigshutdown: bool,
    pub(crate) sigrestart: bool,

    // program-wide timestamps, shifted on clock jumps
    pub(crate) program_start: Timestamp,
    pub(crate) event_start: Timestamp,
    pub(crate) last_command_check: Timestamp,

    pub(crate) last_time: Timestamp,
    pub(crate) last_status_update: Timestamp,

    signal_tx: mpsc::Sender<EngineSignal>,
    pub(crate) signal_rx: mpsc::Receiver<EngineSignal>,
}

impl Engine {
    pub fn new(config: Config, objects: ObjectModel, collab: Collaborators) -> Self {
        Self::with_clock(config, objects, collab, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        objects: ObjectModel,
        collab: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let now = clock.now();
        Self {
            config,
            clock,
            objects,
            queue: EventQueue::new(),
            collab,
            stats: SchedulingStatistics::default(),
            sigshutdown: false,
            sigrestart: false,
            program_start: now,
            event_start: 0,
            last_command_check: 0,
            last_time: now,
            last_status_update: 0,
            signal_tx,
            signal_rx,
        }
    }

    /// Sender half for waking or stopping a running engine from elsewhere.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.signal_tx.clone(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn objects(&self) -> &ObjectModel {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectModel {
        &mut self.objects
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn statistics(&self) -> &SchedulingStatistics {
        &self.stats
    }

    /// True once a shutdown or restart has been latched.
    pub fn stopping(&self) -> bool {
        self.sigshutdown || self.sigrestart
    }

    pub fn restart_requested(&self) -> bool {
        self.sigrestart
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Create and queue a new timed event; the single entry point used by
    /// the schedule builder, dispatch handlers and collaborators alike.
    pub fn schedule(&mut self, sched: Schedule) -> EventId {
        let lane = sched.lane();
        let id = self.queue.schedule(sched);
        if let Some(event) = self.queue.get(lane, id) {
            self.collab.broker.timed_event(BrokerEventKind::Added, event);
        }
        id
    }

    /// O(1) lookup of the pending check event for an entity.
    pub fn find(&self, lane: Lane, category: EventCategory, payload: &Payload) -> Option<EventId> {
        self.queue.find(lane, category, payload)
    }

    /// Cancel a pending event. Safe no-op for stale handles.
    pub fn cancel(&mut self, lane: Lane, id: EventId) {
        if let Some(event) = self.queue.remove(lane, id) {
            self.collab
                .broker
                .timed_event(BrokerEventKind::Removed, &event);
        }
    }

    /// Resort a lane and replay the add notifications, mirroring what the
    /// broker would have seen had the events been inserted in order.
    pub(crate) fn resort_and_notify(&mut self, lane: Lane) {
        self.queue.resort(lane);
        for event in self.queue.events(lane) {
            self.collab.broker.timed_event(BrokerEventKind::Added, event);
        }
    }
}

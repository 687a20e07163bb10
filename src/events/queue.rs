//! Dual-lane event queue with a quick-lookup index.
//!
//! Each lane is kept sorted ascending by run time. Insertion walks from the
//! tail backward since new events are usually scheduled later than most of
//! the queue. The index maps a referenced host/service to its pending check
//! event so collaborators can detect or cancel an already-scheduled check
//! without walking the lane.
//!
//! The queue is a pure data structure: all operations are total and
//! broker-visible side effects are the owning engine's job.

use std::collections::HashMap;

use crate::clock::Timestamp;
use crate::events::{EventCategory, EventId, Lane, Payload, Schedule, TimedEvent};
use crate::objects::{HostId, ServiceId};

#[derive(Debug, Default)]
struct LaneIndex {
    service_checks: HashMap<ServiceId, EventId>,
    host_checks: HashMap<HostId, EventId>,
}

impl LaneIndex {
    fn insert(&mut self, event: &TimedEvent) {
        match (event.category, &event.payload) {
            (EventCategory::ServiceCheck, Payload::Service(id)) => {
                self.service_checks.insert(*id, event.id);
            }
            (EventCategory::HostCheck, Payload::Host(id)) => {
                self.host_checks.insert(*id, event.id);
            }
            _ => {}
        }
    }

    fn remove(&mut self, event: &TimedEvent) {
        match (event.category, &event.payload) {
            (EventCategory::ServiceCheck, Payload::Service(id)) => {
                self.service_checks.remove(id);
            }
            (EventCategory::HostCheck, Payload::Host(id)) => {
                self.host_checks.remove(id);
            }
            _ => {}
        }
    }

    fn clear(&mut self) {
        self.service_checks.clear();
        self.host_checks.clear();
    }

    fn clear_category(&mut self, category: EventCategory) {
        match category {
            EventCategory::ServiceCheck => self.service_checks.clear(),
            EventCategory::HostCheck => self.host_checks.clear(),
            _ => {}
        }
    }

    fn find(&self, category: EventCategory, payload: &Payload) -> Option<EventId> {
        match (category, payload) {
            (EventCategory::ServiceCheck, Payload::Service(id)) => {
                self.service_checks.get(id).copied()
            }
            (EventCategory::HostCheck, Payload::Host(id)) => self.host_checks.get(id).copied(),
            _ => None,
        }
    }
}

/// Two independent priority lanes plus the check-event index.
#[derive(Debug, Default)]
pub struct EventQueue {
    high: Vec<TimedEvent>,
    low: Vec<TimedEvent>,
    high_index: LaneIndex,
    low_index: LaneIndex,
    next_id: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, lane: Lane) -> &Vec<TimedEvent> {
        match lane {
            Lane::High => &self.high,
            Lane::Low => &self.low,
        }
    }

    fn lane_index(&mut self, lane: Lane) -> &mut LaneIndex {
        match lane {
            Lane::High => &mut self.high_index,
            Lane::Low => &mut self.low_index,
        }
    }

    /// Single entry point for creating events: builds the event, assigns
    /// its handle and places it in the requested lane.
    pub fn schedule(&mut self, sched: Schedule) -> EventId {
        self.next_id += 1;
        let lane = sched.lane();
        let event = TimedEvent {
            id: EventId(self.next_id),
            category: sched.category,
            run_time: sched.run_time,
            recurring: sched.recurring,
            interval: sched.interval,
            compensate_for_time_change: sched.compensate_for_time_change,
            timing_fn: sched.timing_fn,
            payload: sched.payload,
            options: sched.options,
        };
        self.insert(lane, event)
    }

    /// Insert an already-built event (used when re-queuing a recurring
    /// event after dispatch) keeping the lane sorted by run time.
    ///
    /// Ties on run time go after existing equal-time entries: the
    /// tail-backward walk stops at the first event that is not later than
    /// the new one.
    pub fn insert(&mut self, lane: Lane, event: TimedEvent) -> EventId {
        let id = event.id;
        if event.category.is_indexable() {
            self.lane_index(lane).insert(&event);
        }

        let list = match lane {
            Lane::High => &mut self.high,
            Lane::Low => &mut self.low,
        };

        if list.is_empty() {
            list.push(event);
        } else if event.run_time < list[0].run_time {
            list.insert(0, event);
        } else {
            // start from the end of the list, as new events are likely to
            // run in the future rather than now
            let mut pos = list.len();
            while pos > 0 && event.run_time < list[pos - 1].run_time {
                pos -= 1;
            }
            list.insert(pos, event);
        }
        id
    }

    /// Remove an event by handle. Harmless no-op when the handle is stale.
    pub fn remove(&mut self, lane: Lane, id: EventId) -> Option<TimedEvent> {
        let list = match lane {
            Lane::High => &mut self.high,
            Lane::Low => &mut self.low,
        };
        let pos = list.iter().position(|e| e.id == id)?;
        let event = list.remove(pos);
        if event.category.is_indexable() {
            self.lane_index(lane).remove(&event);
        }
        Some(event)
    }

    /// O(1) lookup of the pending check event for an entity.
    pub fn find(&self, lane: Lane, category: EventCategory, payload: &Payload) -> Option<EventId> {
        let index = match lane {
            Lane::High => &self.high_index,
            Lane::Low => &self.low_index,
        };
        index.find(category, payload)
    }

    pub fn get(&self, lane: Lane, id: EventId) -> Option<&TimedEvent> {
        self.lane(lane).iter().find(|e| e.id == id)
    }

    /// Drop all index entries for a lane. Used when the lane's events are
    /// about to be rebuilt.
    pub fn clear_index(&mut self, lane: Lane) {
        self.lane_index(lane).clear();
    }

    /// Drop the index entries of one category for a lane.
    pub fn clear_index_category(&mut self, lane: Lane, category: EventCategory) {
        self.lane_index(lane).clear_category(category);
    }

    /// Rebuild a lane by re-inserting every event, restoring the ascending
    /// run-time invariant after per-event run times were mutated
    /// independently. The lane's index is cleared first and repopulated by
    /// the inserts.
    pub fn resort(&mut self, lane: Lane) {
        let old = match lane {
            Lane::High => std::mem::take(&mut self.high),
            Lane::Low => std::mem::take(&mut self.low),
        };
        self.clear_index(lane);
        for event in old {
            self.insert(lane, event);
        }
    }

    /// Pop the head of a lane if it is due at `now`.
    pub fn pop_due(&mut self, lane: Lane, now: Timestamp) -> Option<TimedEvent> {
        let head_due = self
            .lane(lane)
            .first()
            .is_some_and(|event| event.run_time <= now);
        if !head_due {
            return None;
        }
        let event = match lane {
            Lane::High => self.high.remove(0),
            Lane::Low => self.low.remove(0),
        };
        if event.category.is_indexable() {
            self.lane_index(lane).remove(&event);
        }
        Some(event)
    }

    /// Run time of the next event in a lane, if any.
    pub fn next_run_time(&self, lane: Lane) -> Option<Timestamp> {
        self.lane(lane).first().map(|event| event.run_time)
    }

    pub fn peek(&self, lane: Lane) -> Option<&TimedEvent> {
        self.lane(lane).first()
    }

    pub fn len(&self, lane: Lane) -> usize {
        self.lane(lane).len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    pub fn events(&self, lane: Lane) -> &[TimedEvent] {
        self.lane(lane)
    }

    /// Mutable view of a lane for bulk run-time adjustments. Callers that
    /// change run times must follow up with [`EventQueue::resort`] before
    /// the next dispatch.
    pub fn events_mut(&mut self, lane: Lane) -> &mut [TimedEvent] {
        match lane {
            Lane::High => &mut self.high,
            Lane::Low => &mut self.low,
        }
    }

    /// Verify the ascending-run-time invariant; test support.
    pub fn is_sorted(&self, lane: Lane) -> bool {
        self.lane(lane)
            .windows(2)
            .all(|pair| pair[0].run_time <= pair[1].run_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Payload;
    use crate::objects::{HostId, ServiceId};

    fn check_event(run_time: Timestamp, service: u64) -> Schedule {
        Schedule::once(EventCategory::ServiceCheck, run_time)
            .with_payload(Payload::Service(ServiceId(service)))
    }

    fn run_times(queue: &EventQueue, lane: Lane) -> Vec<Timestamp> {
        queue.events(lane).iter().map(|e| e.run_time).collect()
    }

    #[test]
    fn test_insert_keeps_lane_sorted() {
        let mut queue = EventQueue::new();
        for (i, t) in [500, 100, 300, 200, 400].iter().enumerate() {
            queue.schedule(check_event(*t, i as u64));
        }
        assert_eq!(run_times(&queue, Lane::Low), vec![100, 200, 300, 400, 500]);
        assert!(queue.is_sorted(Lane::Low));
    }

    #[test]
    fn test_insert_before_head() {
        let mut queue = EventQueue::new();
        queue.schedule(check_event(100, 1));
        queue.schedule(check_event(50, 2));
        assert_eq!(run_times(&queue, Lane::Low), vec![50, 100]);
    }

    #[test]
    fn test_equal_run_time_appends_after_existing() {
        // queue at t=100,105,105,110; inserting t=105 lands after the
        // existing pair
        let mut queue = EventQueue::new();
        queue.schedule(check_event(100, 1));
        queue.schedule(check_event(105, 2));
        queue.schedule(check_event(105, 3));
        queue.schedule(check_event(110, 4));
        queue.schedule(check_event(105, 5));

        assert_eq!(run_times(&queue, Lane::Low), vec![100, 105, 105, 105, 110]);
        let ids: Vec<u64> = queue
            .events(Lane::Low)
            .iter()
            .map(|e| e.payload.service_id().unwrap().0)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 5, 4]);
    }

    #[test]
    fn test_lanes_are_independent() {
        let mut queue = EventQueue::new();
        queue.schedule(check_event(100, 1));
        queue.schedule(Schedule::recurring_high(EventCategory::CheckReaper, 10, 10));
        assert_eq!(queue.len(Lane::Low), 1);
        assert_eq!(queue.len(Lane::High), 1);
    }

    #[test]
    fn test_find_and_remove_indexed_event() {
        let mut queue = EventQueue::new();
        let id = queue.schedule(check_event(100, 7));
        let payload = Payload::Service(ServiceId(7));

        assert_eq!(
            queue.find(Lane::Low, EventCategory::ServiceCheck, &payload),
            Some(id)
        );

        let removed = queue.remove(Lane::Low, id).unwrap();
        assert_eq!(removed.run_time, 100);
        assert_eq!(
            queue.find(Lane::Low, EventCategory::ServiceCheck, &payload),
            None
        );
    }

    #[test]
    fn test_find_host_check() {
        let mut queue = EventQueue::new();
        let id = queue.schedule(
            Schedule::once(EventCategory::HostCheck, 80).with_payload(Payload::Host(HostId(3))),
        );
        assert_eq!(
            queue.find(Lane::Low, EventCategory::HostCheck, &Payload::Host(HostId(3))),
            Some(id)
        );
        // wrong lane
        assert_eq!(
            queue.find(Lane::High, EventCategory::HostCheck, &Payload::Host(HostId(3))),
            None
        );
    }

    #[test]
    fn test_non_indexable_events_not_indexed() {
        let mut queue = EventQueue::new();
        queue.schedule(Schedule::recurring_high(EventCategory::StatusSave, 60, 60));
        assert_eq!(
            queue.find(Lane::High, EventCategory::StatusSave, &Payload::None),
            None
        );
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut queue = EventQueue::new();
        queue.schedule(check_event(100, 1));
        assert!(queue.remove(Lane::Low, EventId(999)).is_none());
        assert_eq!(queue.len(Lane::Low), 1);
    }

    #[test]
    fn test_pop_due_respects_time_and_index() {
        let mut queue = EventQueue::new();
        queue.schedule(check_event(100, 1));
        queue.schedule(check_event(200, 2));

        assert!(queue.pop_due(Lane::Low, 99).is_none());

        let event = queue.pop_due(Lane::Low, 100).unwrap();
        assert_eq!(event.run_time, 100);
        assert_eq!(
            queue.find(
                Lane::Low,
                EventCategory::ServiceCheck,
                &Payload::Service(ServiceId(1))
            ),
            None
        );
        assert_eq!(queue.len(Lane::Low), 1);
    }

    #[test]
    fn test_resort_restores_invariant_and_index() {
        let mut queue = EventQueue::new();
        for i in 0..5 {
            queue.schedule(check_event(100 + i * 10, i as u64));
        }

        // scramble run times out from under the queue
        for event in queue.events_mut(Lane::Low) {
            event.run_time = 1000 - event.run_time;
        }
        assert!(!queue.is_sorted(Lane::Low));

        queue.resort(Lane::Low);
        assert!(queue.is_sorted(Lane::Low));

        // index survives the rebuild
        for i in 0..5u64 {
            assert!(
                queue
                    .find(
                        Lane::Low,
                        EventCategory::ServiceCheck,
                        &Payload::Service(ServiceId(i))
                    )
                    .is_some()
            );
        }
    }

    #[test]
    fn test_resort_is_idempotent() {
        let mut queue = EventQueue::new();
        queue.schedule(check_event(105, 1));
        queue.schedule(check_event(105, 2));
        queue.schedule(check_event(100, 3));

        queue.resort(Lane::Low);
        let first: Vec<EventId> = queue.events(Lane::Low).iter().map(|e| e.id).collect();
        queue.resort(Lane::Low);
        let second: Vec<EventId> = queue.events(Lane::Low).iter().map(|e| e.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_next_run_time_and_empty() {
        let mut queue = EventQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.next_run_time(Lane::Low), None);

        queue.schedule(check_event(42, 1));
        assert!(!queue.is_empty());
        assert_eq!(queue.next_run_time(Lane::Low), Some(42));
    }

    #[test]
    fn test_clear_index_category() {
        let mut queue = EventQueue::new();
        queue.schedule(check_event(100, 1));
        queue.schedule(
            Schedule::once(EventCategory::HostCheck, 100).with_payload(Payload::Host(HostId(1))),
        );

        queue.clear_index_category(Lane::Low, EventCategory::ServiceCheck);
        assert_eq!(
            queue.find(
                Lane::Low,
                EventCategory::ServiceCheck,
                &Payload::Service(ServiceId(1))
            ),
            None
        );
        assert!(
            queue
                .find(Lane::Low, EventCategory::HostCheck, &Payload::Host(HostId(1)))
                .is_some()
        );
    }
}

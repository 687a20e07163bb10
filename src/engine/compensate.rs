//! System clock jump compensation.
//!
//! When the wall clock moves backward, or forward past the configured
//! threshold, every queued run time and every absolute entity timestamp is
//! shifted by the same delta so the relative schedule survives the jump.

use log::{debug, warn};

use crate::clock::{time_breakdown, Timestamp};
use crate::engine::Engine;
use crate::events::Lane;
use crate::objects::{HostId, ServiceId};

/// Shift one absolute timestamp by a clock jump.
///
/// The sentinels 0 and -1 mean "never" and are left untouched, and a
/// backward shift clamps at the epoch instead of going negative.
pub(crate) fn adjust_timestamp(
    last_time: Timestamp,
    current_time: Timestamp,
    delta: i64,
    ts: Timestamp,
) -> Timestamp {
    if ts == 0 || ts == -1 {
        return ts;
    }
    if last_time > current_time {
        if delta > ts {
            0
        } else {
            ts - delta
        }
    } else {
        ts + delta
    }
}

impl Engine {
    /// Compensate every queued event and entity timestamp for a system
    /// clock jump from `last_time` to `current_time`.
    pub fn compensate_for_time_jump(&mut self, last_time: Timestamp, current_time: Timestamp) {
        let backward = last_time > current_time;
        let delta = if backward {
            last_time - current_time
        } else {
            current_time - last_time
        };

        let (days, hours, minutes, seconds) = time_breakdown(delta as u64);
        warn!(
            "A system time change of {}d {}h {}m {}s ({} in time) has been detected, compensating",
            days,
            hours,
            minutes,
            seconds,
            if backward { "backwards" } else { "forwards" }
        );

        self.shift_lane(Lane::High, last_time, current_time, delta);
        self.shift_lane(Lane::Low, last_time, current_time, delta);

        self.shift_service_timestamps(last_time, current_time, delta);
        self.shift_host_timestamps(last_time, current_time, delta);

        self.program_start = adjust_timestamp(last_time, current_time, delta, self.program_start);
        self.event_start = adjust_timestamp(last_time, current_time, delta, self.event_start);
        self.last_command_check =
            adjust_timestamp(last_time, current_time, delta, self.last_command_check);

        self.collab.persister.update_program_status();
    }

    /// Shift every compensable event in a lane and restore its ordering.
    fn shift_lane(&mut self, lane: Lane, last_time: Timestamp, current_time: Timestamp, delta: i64) {
        for event in self.queue.events_mut(lane) {
            // fixed-time events stay where they are
            if !event.compensate_for_time_change {
                continue;
            }
            if let Some(timing) = &event.timing_fn {
                event.run_time = timing();
            } else {
                event.run_time =
                    adjust_timestamp(last_time, current_time, delta, event.run_time);
            }
        }
        debug!("Resorting {:?} lane after time change", lane);
        self.resort_and_notify(lane);
    }

    fn shift_service_timestamps(
        &mut self,
        last_time: Timestamp,
        current_time: Timestamp,
        delta: i64,
    ) {
        let ids: Vec<ServiceId> = self.objects.services.keys().copied().collect();
        for id in ids {
            let notifications = &self.collab.notifications;
            let Some(service) = self.objects.services.get_mut(&id) else {
                continue;
            };
            service.last_notification =
                adjust_timestamp(last_time, current_time, delta, service.last_notification);
            service.last_check =
                adjust_timestamp(last_time, current_time, delta, service.last_check);
            service.next_check =
                adjust_timestamp(last_time, current_time, delta, service.next_check);
            service.last_state_change =
                adjust_timestamp(last_time, current_time, delta, service.last_state_change);
            service.last_hard_state_change = adjust_timestamp(
                last_time,
                current_time,
                delta,
                service.last_hard_state_change,
            );

            service.next_notification =
                notifications.next_service_notification(service, service.last_notification);
            self.collab.persister.update_service_status(service);
        }
    }

    fn shift_host_timestamps(&mut self, last_time: Timestamp, current_time: Timestamp, delta: i64) {
        let ids: Vec<HostId> = self.objects.hosts.keys().copied().collect();
        for id in ids {
            let notifications = &self.collab.notifications;
            let Some(host) = self.objects.hosts.get_mut(&id) else {
                continue;
            };
            host.last_notification =
                adjust_timestamp(last_time, current_time, delta, host.last_notification);
            host.last_check = adjust_timestamp(last_time, current_time, delta, host.last_check);
            host.next_check = adjust_timestamp(last_time, current_time, delta, host.next_check);
            host.last_state_change =
                adjust_timestamp(last_time, current_time, delta, host.last_state_change);
            host.last_hard_state_change =
                adjust_timestamp(last_time, current_time, delta, host.last_hard_state_change);
            host.last_state_history_update = adjust_timestamp(
                last_time,
                current_time,
                delta,
                host.last_state_history_update,
            );

            host.next_notification =
                notifications.next_host_notification(host, host.last_notification);
            self.collab.persister.update_host_status(host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collaborators::Collaborators;
    use crate::config::Config;
    use crate::events::{EventCategory, Payload, Schedule};
    use crate::objects::{Host, ObjectModel, Service};

    const NOW: Timestamp = 1_000_000;

    fn engine() -> Engine {
        let mut objects = ObjectModel::new();
        objects.add_host(Host::new(HostId(1), "host1", 5));
        objects.add_service(Service::new(ServiceId(1), HostId(1), "ping", 5));
        Engine::with_clock(
            Config::default(),
            objects,
            Collaborators::default(),
            ManualClock::new(NOW),
        )
    }

    #[test]
    fn test_adjust_timestamp_forward() {
        assert_eq!(adjust_timestamp(100, 400, 300, 1_000), 1_300);
    }

    #[test]
    fn test_adjust_timestamp_backward_clamps_at_epoch() {
        assert_eq!(adjust_timestamp(400, 100, 300, 1_000), 700);
        assert_eq!(adjust_timestamp(400, 100, 300, 200), 0);
    }

    #[test]
    fn test_adjust_timestamp_sentinels_untouched() {
        assert_eq!(adjust_timestamp(100, 400, 300, 0), 0);
        assert_eq!(adjust_timestamp(100, 400, 300, -1), -1);
    }

    #[test]
    fn test_forward_jump_shifts_events_and_entities() {
        let mut engine = engine();
        engine.objects_mut().service_mut(ServiceId(1)).unwrap().next_check = NOW + 60;
        engine.objects_mut().service_mut(ServiceId(1)).unwrap().last_check = NOW - 120;
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW + 60)
                .with_payload(Payload::Service(ServiceId(1))),
        );
        engine.schedule(Schedule::recurring_high(EventCategory::StatusSave, NOW + 30, 60));

        engine.compensate_for_time_jump(NOW, NOW + 1_000);

        let service = engine.objects().service(ServiceId(1)).unwrap();
        assert_eq!(service.next_check, NOW + 1_060);
        assert_eq!(service.last_check, NOW + 880);
        assert_eq!(
            engine.queue().peek(Lane::Low).unwrap().run_time,
            NOW + 1_060
        );
        assert_eq!(
            engine.queue().peek(Lane::High).unwrap().run_time,
            NOW + 1_030
        );
    }

    #[test]
    fn test_backward_jump_keeps_lanes_sorted() {
        let mut engine = engine();
        engine.schedule(Schedule::recurring_high(EventCategory::StatusSave, NOW + 60, 60));
        engine.schedule(Schedule::recurring_high(EventCategory::CheckReaper, NOW + 90, 10));

        engine.compensate_for_time_jump(NOW, NOW - 500);

        let lane = engine.queue().events(Lane::High);
        assert_eq!(lane[0].run_time, NOW - 440);
        assert_eq!(lane[1].run_time, NOW - 410);
        assert!(engine.queue().is_sorted(Lane::High));
    }

    #[test]
    fn test_fixed_time_event_not_shifted() {
        let mut engine = engine();
        let mut sched = Schedule::once(EventCategory::StatusSave, NOW + 60);
        sched.compensate_for_time_change = false;
        engine.schedule(sched);

        engine.compensate_for_time_jump(NOW, NOW + 1_000);

        assert_eq!(engine.queue().peek(Lane::Low).unwrap().run_time, NOW + 60);
    }

    #[test]
    fn test_timing_fn_event_recomputed_not_shifted() {
        let mut engine = engine();
        let timing: crate::events::TimingFn = std::sync::Arc::new(|| NOW + 12_345);
        engine.schedule(
            Schedule::recurring_high(EventCategory::LogRotation, NOW + 60, 0)
                .with_timing_fn(timing),
        );

        engine.compensate_for_time_jump(NOW, NOW + 1_000);

        assert_eq!(
            engine.queue().peek(Lane::High).unwrap().run_time,
            NOW + 12_345
        );
    }

    #[test]
    fn test_program_timestamps_shifted() {
        let mut engine = engine();
        engine.event_start = NOW - 100;
        engine.last_command_check = NOW - 10;
        let program_start = engine.program_start;

        engine.compensate_for_time_jump(NOW, NOW + 1_000);

        assert_eq!(engine.program_start, program_start + 1_000);
        assert_eq!(engine.event_start, NOW + 900);
        assert_eq!(engine.last_command_check, NOW + 990);
    }
}

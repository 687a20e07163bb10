//! The event dispatch loop.
//!
//! One iteration resolves to exactly one of three outcomes: a due event was
//! executed, a due low-lane check was deferred (gated) and requeued, or
//! nothing was due and the loop idles for `sleep_time`. High-lane events
//! always win when both lanes are due.

use std::time::Duration;

use log::{debug, info, warn};

use crate::clock::Timestamp;
use crate::collaborators::BrokerEventKind;
use crate::engine::{Engine, EngineSignal};
use crate::error::Result;
use crate::events::{EventCategory, EventId, Lane, Payload, TimedEvent};
use crate::objects::CHECK_OPTION_FORCE_EXECUTION;

/// What one loop iteration did.
enum Dispatch {
    Executed,
    Deferred,
    Idle,
}

impl Engine {
    /// Run the dispatch loop until a shutdown or restart is latched, or the
    /// queue drains completely.
    pub async fn run(&mut self) -> Result<()> {
        let now = self.now();
        self.event_start = now;
        self.last_time = now;
        self.last_status_update = 0;
        info!("Entering event dispatch loop");

        loop {
            if self.sigshutdown || self.sigrestart {
                break;
            }

            if self.queue.is_empty() {
                warn!("There aren't any events that need to be handled, exiting");
                self.sigshutdown = true;
                break;
            }

            let now = self.now();

            // a backward jump of any size, or a forward jump past the
            // threshold, invalidates every queued run time
            if now < self.last_time
                || (now - self.last_time) as u64 >= self.config.time_change_threshold
            {
                self.compensate_for_time_jump(self.last_time, now);
            }
            self.last_time = now;

            // keep the program status fresh so external watchers can tell
            // we are alive
            if now - self.last_status_update > 5 {
                self.last_status_update = now;
                self.collab.persister.update_program_status();
            }

            match self.dispatch_one(now) {
                Dispatch::Executed => {}
                Dispatch::Deferred => self.idle(now, false).await,
                Dispatch::Idle => self.idle(now, true).await,
            }
        }

        Ok(())
    }

    fn dispatch_one(&mut self, now: Timestamp) -> Dispatch {
        if let Some(event) = self.queue.pop_due(Lane::High, now) {
            self.execute_event(event, Lane::High, now);
            return Dispatch::Executed;
        }

        let Some(head) = self.queue.peek(Lane::Low) else {
            return Dispatch::Idle;
        };
        if now < head.run_time {
            return Dispatch::Idle;
        }
        let (head_id, category) = (head.id(), head.category);

        match category {
            EventCategory::ServiceCheck => {
                if self.defer_service_check(head_id, now) {
                    return Dispatch::Deferred;
                }
            }
            EventCategory::HostCheck => {
                if self.defer_host_check(head_id, now) {
                    return Dispatch::Deferred;
                }
            }
            _ => {}
        }

        match self.queue.pop_due(Lane::Low, now) {
            Some(event) => {
                self.execute_event(event, Lane::Low, now);
                Dispatch::Executed
            }
            None => Dispatch::Idle,
        }
    }

    /// Gate a due service check. Returns true when the check cannot run now;
    /// the event has then already been pushed out and requeued.
    fn defer_service_check(&mut self, head_id: EventId, now: Timestamp) -> bool {
        let Some(head) = self.queue.get(Lane::Low, head_id) else {
            return false;
        };
        let options = head.options;
        let Some(service_id) = head.payload.service_id() else {
            warn!("Service check event without a service payload, dropping it");
            self.cancel(Lane::Low, head_id);
            return true;
        };
        if self.objects.service(service_id).is_none() {
            warn!("Service check event for unknown service {}, dropping it", service_id.0);
            self.cancel(Lane::Low, head_id);
            return true;
        }

        let mut run_event = true;
        let mut nudge: i64 = 0;

        let max_parallel = self.config.checks.max_parallel_service_checks;
        if max_parallel != 0 && self.collab.checks.running_service_checks() >= max_parallel {
            // push past the current peak, spread the load a little
            nudge = 5 + (now % 10);
            warn!(
                "Max concurrent service checks ({}) has been reached, nudging service {} by {} seconds",
                max_parallel, service_id.0, nudge
            );
            run_event = false;
        }

        if !self.config.checks.execute_service_checks {
            debug!("Service checks are not being executed right now, skipping this event");
            run_event = false;
        }

        if options & CHECK_OPTION_FORCE_EXECUTION != 0 {
            run_event = true;
        }

        if run_event {
            return false;
        }

        let Some(mut event) = self.queue.remove(Lane::Low, head_id) else {
            return false;
        };
        self.collab
            .broker
            .timed_event(BrokerEventKind::Removed, &event);

        let interval_length = self.config.scheduling.interval_length;
        let next_check = match self.objects.service_mut(service_id) {
            Some(service) => {
                if nudge > 0 {
                    service.next_check += nudge;
                } else {
                    service.next_check += service.reschedule_interval(interval_length);
                }
                service.next_check
            }
            None => now + nudge,
        };

        event.run_time = next_check;
        let id = self.queue.insert(Lane::Low, event);
        if let Some(event) = self.queue.get(Lane::Low, id) {
            self.collab
                .broker
                .timed_event(BrokerEventKind::Added, event);
        }
        if let Some(service) = self.objects.service(service_id) {
            self.collab.persister.update_service_status(service);
        }
        true
    }

    /// Gate a due host check, same contract as [`Self::defer_service_check`]
    /// minus the parallelism ceiling.
    fn defer_host_check(&mut self, head_id: EventId, now: Timestamp) -> bool {
        let Some(head) = self.queue.get(Lane::Low, head_id) else {
            return false;
        };
        let options = head.options;
        let Some(host_id) = head.payload.host_id() else {
            warn!("Host check event without a host payload, dropping it");
            self.cancel(Lane::Low, head_id);
            return true;
        };
        if self.objects.host(host_id).is_none() {
            warn!("Host check event for unknown host {}, dropping it", host_id.0);
            self.cancel(Lane::Low, head_id);
            return true;
        }

        let mut run_event = true;
        if !self.config.checks.execute_host_checks {
            debug!("Host checks are not being executed right now, skipping this event");
            run_event = false;
        }
        if options & CHECK_OPTION_FORCE_EXECUTION != 0 {
            run_event = true;
        }
        if run_event {
            return false;
        }

        let Some(mut event) = self.queue.remove(Lane::Low, head_id) else {
            return false;
        };
        self.collab
            .broker
            .timed_event(BrokerEventKind::Removed, &event);

        let interval_length = self.config.scheduling.interval_length;
        let next_check = match self.objects.host_mut(host_id) {
            Some(host) => {
                host.next_check += host.reschedule_interval(interval_length);
                host.next_check
            }
            None => now,
        };

        event.run_time = next_check;
        let id = self.queue.insert(Lane::Low, event);
        if let Some(event) = self.queue.get(Lane::Low, id) {
            self.collab
                .broker
                .timed_event(BrokerEventKind::Added, event);
        }
        if let Some(host) = self.objects.host(host_id) {
            self.collab.persister.update_host_status(host);
        }
        true
    }

    /// Execute one popped event and requeue it if it recurs.
    pub(crate) fn execute_event(&mut self, mut event: TimedEvent, lane: Lane, now: Timestamp) {
        self.collab
            .broker
            .timed_event(BrokerEventKind::Executed, &event);
        debug!(
            "** Timed event ** type: {}, run time: {}",
            event.category, event.run_time
        );
        self.handle_event(&event, now);

        if event.recurring {
            if let Some(timing) = &event.timing_fn {
                event.run_time = timing();
            } else {
                event.run_time += event.interval as Timestamp;
                if event.run_time < now {
                    event.run_time = now;
                }
            }
            let id = self.queue.insert(lane, event);
            if let Some(event) = self.queue.get(lane, id) {
                self.collab
                    .broker
                    .timed_event(BrokerEventKind::Added, event);
            }
        }
    }

    fn handle_event(&mut self, event: &TimedEvent, now: Timestamp) {
        match event.category {
            EventCategory::ServiceCheck => {
                let Some(id) = event.payload.service_id() else {
                    return;
                };
                let Some(service) = self.objects.service(id) else {
                    warn!("Dropping check for unknown service {}", id.0);
                    return;
                };
                let latency = (now - event.run_time) as f64;
                debug!(
                    "** Service check event ==> service: {}, options: {}, latency: {:.3} sec",
                    id.0, event.options, latency
                );
                self.collab
                    .checks
                    .run_service_check(service, event.options, latency);
            }
            EventCategory::HostCheck => {
                let Some(id) = event.payload.host_id() else {
                    return;
                };
                let Some(host) = self.objects.host(id) else {
                    warn!("Dropping check for unknown host {}", id.0);
                    return;
                };
                let latency = (now - event.run_time) as f64;
                debug!(
                    "** Host check event ==> host: {}, options: {}, latency: {:.3} sec",
                    id.0, event.options, latency
                );
                self.collab.checks.run_host_check(host, event.options, latency);
            }
            EventCategory::CommandCheck => {
                debug!("** External command check event");
                self.last_command_check = now;
                self.collab.broker.external_command_check(now);
                self.collab.commands.process_external_commands();
            }
            EventCategory::LogRotation => {
                debug!("** Log file rotation event");
                self.collab.log_rotator.rotate();
            }
            EventCategory::ProgramShutdown => {
                info!("Program shutdown event encountered, shutting down");
                self.sigshutdown = true;
            }
            EventCategory::ProgramRestart => {
                info!("Program restart event encountered, restarting");
                self.sigrestart = true;
            }
            EventCategory::CheckReaper => {
                debug!("** Check result reaper event");
                if let Err(err) = self.collab.checks.reap_results() {
                    warn!("Failed to reap check results: {err}");
                }
            }
            EventCategory::OrphanCheck => {
                debug!("** Orphaned host and service check event");
                if self.config.checks.check_orphaned_hosts {
                    self.collab.checks.check_for_orphaned_hosts();
                }
                if self.config.checks.check_orphaned_services {
                    self.collab.checks.check_for_orphaned_services();
                }
            }
            EventCategory::RetentionSave => {
                debug!("** Retention data save event");
                self.collab.persister.save_retention();
            }
            EventCategory::StatusSave => {
                debug!("** Status data save event");
                self.collab.persister.update_all_status();
            }
            EventCategory::ScheduledDowntime => {
                debug!("** Scheduled downtime event");
                if let Payload::Downtime(downtime_id) = event.payload {
                    self.collab.downtimes.handle_downtime(downtime_id);
                }
            }
            EventCategory::ServiceFreshnessCheck => {
                debug!("** Service result freshness check event");
                self.collab.checks.check_service_freshness();
            }
            EventCategory::ExpireDowntime => {
                debug!("** Expire downtime event");
                self.collab.downtimes.expire_downtimes();
            }
            EventCategory::HostFreshnessCheck => {
                debug!("** Host result freshness check event");
                self.collab.checks.check_host_freshness();
            }
            EventCategory::RescheduleChecks => {
                debug!("** Reschedule checks event");
                self.adjust_check_scheduling();
            }
            EventCategory::ExpireComment => {
                debug!("** Expire comment event");
                if let Payload::Comment(comment_id) = event.payload {
                    self.collab.comments.expire_comment(comment_id);
                }
            }
            EventCategory::UserFunction => {
                debug!("** User function event");
                if let Payload::UserFunction(func) = &event.payload {
                    func();
                }
            }
            // only ever appears as the fake broker sleep event
            EventCategory::Sleep => {}
        }
    }

    /// Sleep for one `sleep_time` slice, waking early on a control signal.
    /// `announce` is set when the queue had nothing due at all: that is the
    /// moment to poll external commands and emit the broker sleep event.
    async fn idle(&mut self, now: Timestamp, announce: bool) {
        if announce {
            debug!("No events to execute at the moment, idling for a bit");

            // poll external commands as often as possible
            if self.config.commands.check_external_commands
                && self.config.commands.command_check_interval == -1
            {
                self.last_command_check = now;
                self.collab.broker.external_command_check(now);
                self.collab.commands.process_external_commands();
            }

            let sleep_event = TimedEvent {
                id: EventId(0),
                category: EventCategory::Sleep,
                run_time: now,
                recurring: false,
                interval: 0,
                compensate_for_time_change: false,
                timing_fn: None,
                payload: Payload::None,
                options: 0,
            };
            self.collab
                .broker
                .timed_event(BrokerEventKind::Sleep, &sleep_event);
        }

        let duration = Duration::from_secs_f64(self.config.sleep_time.max(0.0));
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            signal = self.signal_rx.recv() => {
                if let Some(signal) = signal {
                    self.handle_signal(signal);
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::Shutdown => {
                info!("Shutdown signal received");
                self.sigshutdown = true;
            }
            EngineSignal::Restart => {
                info!("Restart signal received");
                self.sigrestart = true;
            }
            EngineSignal::ExternalCommand => {
                self.collab.commands.process_external_commands();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::collaborators::{CheckExecutor, Collaborators};
    use crate::config::Config;
    use crate::events::Schedule;
    use crate::objects::{
        Host, HostId, ObjectModel, Service, ServiceId, ServiceState, StateType,
    };

    const NOW: Timestamp = 1_000_000;

    struct CountingExecutor {
        service_runs: Arc<AtomicU32>,
        running: u32,
    }

    impl CheckExecutor for CountingExecutor {
        fn run_service_check(&mut self, _service: &Service, _options: u32, _latency: f64) {
            self.service_runs.fetch_add(1, Ordering::SeqCst);
        }

        fn running_service_checks(&self) -> u32 {
            self.running
        }
    }

    fn engine_with_executor(
        mut config: Config,
        objects: ObjectModel,
        running: u32,
    ) -> (Engine, Arc<AtomicU32>) {
        config.scheduling.interval_length = 60;
        let service_runs = Arc::new(AtomicU32::new(0));
        let collab = Collaborators::default().with_checks(Box::new(CountingExecutor {
            service_runs: Arc::clone(&service_runs),
            running,
        }));
        let engine = Engine::with_clock(config, objects, collab, ManualClock::new(NOW));
        (engine, service_runs)
    }

    fn one_service() -> ObjectModel {
        let mut objects = ObjectModel::new();
        objects.add_host(Host::new(HostId(1), "host1", 5));
        objects.add_service(Service::new(ServiceId(1), HostId(1), "ping", 5));
        objects
    }

    #[test]
    fn test_high_lane_wins_ties() {
        let (mut engine, _) = engine_with_executor(Config::default(), one_service(), 0);
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW)
                .with_payload(Payload::Service(ServiceId(1))),
        );
        engine.schedule(Schedule::recurring_high(EventCategory::CheckReaper, NOW, 10));

        let Dispatch::Executed = engine.dispatch_one(NOW) else {
            panic!("expected an execution");
        };
        // the reaper went first and was requeued at NOW + 10
        let reaper = engine.queue().peek(Lane::High).unwrap();
        assert_eq!(reaper.category, EventCategory::CheckReaper);
        assert_eq!(reaper.run_time, NOW + 10);
        assert_eq!(engine.queue().len(Lane::Low), 1);
    }

    #[test]
    fn test_due_service_check_executes() {
        let (mut engine, runs) = engine_with_executor(Config::default(), one_service(), 0);
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW - 3)
                .with_payload(Payload::Service(ServiceId(1))),
        );

        let Dispatch::Executed = engine.dispatch_one(NOW) else {
            panic!("expected an execution");
        };
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // one-shot events are not requeued
        assert_eq!(engine.queue().len(Lane::Low), 0);
    }

    #[test]
    fn test_parallel_ceiling_nudges_check() {
        let mut config = Config::default();
        config.checks.max_parallel_service_checks = 2;
        let (mut engine, runs) = engine_with_executor(config, one_service(), 2);
        engine.objects_mut().service_mut(ServiceId(1)).unwrap().next_check = NOW;
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW)
                .with_payload(Payload::Service(ServiceId(1))),
        );

        let Dispatch::Deferred = engine.dispatch_one(NOW) else {
            panic!("expected a deferral");
        };
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // nudged into the near future by 5..=14 seconds
        let nudge = 5 + (NOW % 10);
        let event = engine.queue().peek(Lane::Low).unwrap();
        assert_eq!(event.run_time, NOW + nudge);
        assert_eq!(
            engine.objects().service(ServiceId(1)).unwrap().next_check,
            NOW + nudge
        );
    }

    #[test]
    fn test_disabled_service_checks_reschedule_full_interval() {
        let mut config = Config::default();
        config.checks.execute_service_checks = false;
        let (mut engine, runs) = engine_with_executor(config, one_service(), 0);
        engine.objects_mut().service_mut(ServiceId(1)).unwrap().next_check = NOW;
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW)
                .with_payload(Payload::Service(ServiceId(1))),
        );

        let Dispatch::Deferred = engine.dispatch_one(NOW) else {
            panic!("expected a deferral");
        };
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        // hard OK state: full check interval (5 units * 60s)
        assert_eq!(engine.queue().peek(Lane::Low).unwrap().run_time, NOW + 300);
    }

    #[test]
    fn test_disabled_service_checks_soft_problem_uses_retry_interval() {
        let mut config = Config::default();
        config.checks.execute_service_checks = false;
        let (mut engine, _) = engine_with_executor(config, one_service(), 0);
        {
            let service = engine.objects_mut().service_mut(ServiceId(1)).unwrap();
            service.next_check = NOW;
            service.retry_interval = 2;
            service.state_type = StateType::Soft;
            service.current_state = ServiceState::Critical;
        }
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW)
                .with_payload(Payload::Service(ServiceId(1))),
        );

        let Dispatch::Deferred = engine.dispatch_one(NOW) else {
            panic!("expected a deferral");
        };
        assert_eq!(engine.queue().peek(Lane::Low).unwrap().run_time, NOW + 120);
    }

    #[test]
    fn test_forced_check_overrides_disabled_execution() {
        let mut config = Config::default();
        config.checks.execute_service_checks = false;
        let (mut engine, runs) = engine_with_executor(config, one_service(), 0);
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW)
                .with_payload(Payload::Service(ServiceId(1)))
                .with_options(CHECK_OPTION_FORCE_EXECUTION),
        );

        let Dispatch::Executed = engine.dispatch_one(NOW) else {
            panic!("expected an execution");
        };
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_check_for_unknown_service_is_dropped() {
        let (mut engine, runs) = engine_with_executor(Config::default(), one_service(), 0);
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW)
                .with_payload(Payload::Service(ServiceId(99))),
        );

        let Dispatch::Deferred = engine.dispatch_one(NOW) else {
            panic!("expected the event to be discarded");
        };
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(engine.queue().len(Lane::Low), 0);
    }

    #[test]
    fn test_recurring_reschedule_clamps_to_now() {
        let (mut engine, _) = engine_with_executor(Config::default(), ObjectModel::new(), 0);
        // long overdue: next run would land in the past without the clamp
        engine.schedule(Schedule::recurring_high(
            EventCategory::StatusSave,
            NOW - 500,
            60,
        ));

        let Dispatch::Executed = engine.dispatch_one(NOW) else {
            panic!("expected an execution");
        };
        assert_eq!(engine.queue().peek(Lane::High).unwrap().run_time, NOW);
    }

    #[test]
    fn test_recurring_timing_fn_overrides_interval() {
        let (mut engine, _) = engine_with_executor(Config::default(), ObjectModel::new(), 0);
        let timing: crate::events::TimingFn = Arc::new(|| NOW + 7_777);
        engine.schedule(
            Schedule::recurring_high(EventCategory::LogRotation, NOW, 60).with_timing_fn(timing),
        );

        let Dispatch::Executed = engine.dispatch_one(NOW) else {
            panic!("expected an execution");
        };
        assert_eq!(engine.queue().peek(Lane::High).unwrap().run_time, NOW + 7_777);
    }

    #[test]
    fn test_shutdown_event_latches_flag() {
        let (mut engine, _) = engine_with_executor(Config::default(), ObjectModel::new(), 0);
        engine.schedule(Schedule::once(EventCategory::ProgramShutdown, NOW));
        engine.schedule(Schedule::once(EventCategory::StatusSave, NOW + 100));

        let Dispatch::Executed = engine.dispatch_one(NOW) else {
            panic!("expected an execution");
        };
        assert!(engine.stopping());
    }

    #[tokio::test]
    async fn test_run_terminates_on_shutdown_signal() {
        let (mut engine, _) = engine_with_executor(Config::default(), ObjectModel::new(), 0);
        // far-future event keeps the queue non-empty so the loop idles
        engine.schedule(Schedule::once(EventCategory::StatusSave, NOW + 10_000));

        let handle = engine.handle();
        handle.try_shutdown();
        engine.run().await.unwrap();
        assert!(engine.stopping());
    }

    #[tokio::test]
    async fn test_run_exits_when_queue_empties() {
        let (mut engine, runs) = engine_with_executor(Config::default(), one_service(), 0);
        engine.schedule(
            Schedule::once(EventCategory::ServiceCheck, NOW - 1)
                .with_payload(Payload::Service(ServiceId(1))),
        );

        engine.run().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(engine.stopping());
    }
}

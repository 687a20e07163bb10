//! Initial schedule construction.
//!
//! One startup pass surveys every host and service, computes the spread
//! parameters (inter-check delay, interleave factor), assigns each entity a
//! preferred first check time and queues the check events plus the fixed
//! recurring maintenance events.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::clock::Timestamp;
use crate::config::{DelayMethod, InterleaveMethod, LogRotationMethod};
use crate::engine::Engine;
use crate::events::{EventCategory, Payload, Schedule, TimingFn};
use crate::objects::{CHECK_OPTION_FORCE_EXECUTION, HostId, ServiceId};

/// Aggregate scheduling data computed once at startup; read by the
/// builder's spread math and by the projection report.
#[derive(Debug, Clone, Default)]
pub struct SchedulingStatistics {
    pub total_services: u32,
    pub total_scheduled_services: u32,
    pub total_hosts: u32,
    pub total_scheduled_hosts: u32,
    pub average_services_per_host: f64,
    pub average_scheduled_services_per_host: f64,
    /// Rolling average of retained service execution times, diagnostics
    /// only.
    pub average_service_execution_time: f64,
    /// Sum of service check intervals scaled by the interval length, in
    /// seconds.
    pub service_check_interval_total: u64,
    pub average_service_check_interval: f64,
    pub service_inter_check_delay: f64,
    pub host_check_interval_total: u64,
    pub average_host_check_interval: f64,
    pub host_inter_check_delay: f64,
    pub service_interleave_factor: u32,
    pub max_service_check_spread: u32,
    pub max_host_check_spread: u32,
    pub first_service_check: Timestamp,
    pub last_service_check: Timestamp,
    pub first_host_check: Timestamp,
    pub last_host_check: Timestamp,
}

/// Inter-check delay for one kind of check.
///
/// Smart mode spreads the checks evenly: the summed-and-scaled interval
/// total divided by the scheduled count, capped so all first checks land
/// inside the configured spread window.
pub(crate) fn inter_check_delay(
    method: DelayMethod,
    user_value: f64,
    interval_total: u64,
    scheduled: u32,
    max_spread_minutes: u32,
) -> f64 {
    match method {
        DelayMethod::None => 0.0,
        DelayMethod::Dumb => 1.0,
        DelayMethod::User => user_value,
        DelayMethod::Smart => {
            if scheduled > 0 && interval_total > 0 {
                let mut delay = interval_total as f64 / f64::from(scheduled);
                let max_delay = (f64::from(max_spread_minutes) * 60.0) / f64::from(scheduled);
                if delay > max_delay {
                    delay = max_delay;
                }
                delay
            } else {
                0.0
            }
        }
    }
}

/// Number of interleave blocks for a factor; a factor of zero degenerates
/// to one service per block.
pub(crate) fn interleave_blocks(total_scheduled: u32, factor: u32) -> u32 {
    if factor == 0 {
        total_scheduled
    } else {
        total_scheduled.div_ceil(factor)
    }
}

/// Next absolute log-rotation boundary after `now`, in local time.
pub(crate) fn next_rotation_time(method: LogRotationMethod, now: Timestamp) -> Timestamp {
    use chrono::{Datelike, Days, Local, NaiveDate, NaiveTime, TimeZone, Timelike};

    let Some(dt) = Local.timestamp_opt(now, 0).single() else {
        return now + 86_400;
    };
    let date = dt.date_naive();

    let naive = match method {
        LogRotationMethod::None => return now,
        LogRotationMethod::Hourly => {
            // top of the next hour
            let into_hour = i64::from(dt.minute()) * 60 + i64::from(dt.second());
            return now + 3_600 - into_hour;
        }
        LogRotationMethod::Daily => date
            .checked_add_days(Days::new(1))
            .unwrap_or(date)
            .and_time(NaiveTime::MIN),
        LogRotationMethod::Weekly => {
            let days_to_sunday = 7 - u64::from(date.weekday().num_days_from_sunday());
            date.checked_add_days(Days::new(days_to_sunday))
                .unwrap_or(date)
                .and_time(NaiveTime::MIN)
        }
        LogRotationMethod::Monthly => {
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
                .unwrap_or(date)
                .and_time(NaiveTime::MIN)
        }
    };

    match Local.from_local_datetime(&naive).single() {
        Some(t) => t.timestamp(),
        // DST gap; fall back to a plain day
        None => now + 86_400,
    }
}

impl Engine {
    /// Build the initial schedule: survey all entities, spread their first
    /// checks and queue the recurring maintenance events.
    pub fn rebuild_initial_schedule(&mut self) {
        let now = self.now();
        info!("Building initial check schedule");

        self.stats = SchedulingStatistics::default();
        self.survey_services(now);
        self.survey_hosts(now);
        self.compute_aggregates();

        self.compute_service_spread();
        self.assign_service_check_times(now);
        self.emit_service_check_events(now);

        self.compute_host_spread();
        self.assign_host_check_times(now);
        self.emit_host_check_events(now);

        self.schedule_maintenance_events(now);

        info!(
            "Scheduled {} of {} services and {} of {} hosts",
            self.stats.total_scheduled_services,
            self.stats.total_services,
            self.stats.total_scheduled_hosts,
            self.stats.total_hosts
        );
    }

    fn survey_services(&mut self, now: Timestamp) {
        let periods = &self.collab.time_periods;
        for service in self.objects.services.values_mut() {
            self.stats.total_services += 1;

            let mut schedulable = service.check_interval != 0 && service.checks_enabled;
            if schedulable {
                if let Some(period) = &service.check_period {
                    if !periods.is_valid(now, period) && periods.next_valid(now, period) == now {
                        schedulable = false;
                    }
                }
            }

            if schedulable {
                self.stats.total_scheduled_services += 1;
                self.stats.service_check_interval_total += u64::from(service.check_interval);

                // rolling average of retained execution times
                let n = f64::from(self.stats.total_scheduled_services);
                self.stats.average_service_execution_time =
                    (self.stats.average_service_execution_time * (n - 1.0)
                        + service.execution_time)
                        / n;
            } else {
                service.should_be_scheduled = false;
                warn!(
                    "Service '{}' on host {} should not be scheduled",
                    service.description, service.host_id.0
                );
            }
        }
    }

    fn survey_hosts(&mut self, now: Timestamp) {
        let periods = &self.collab.time_periods;
        for host in self.objects.hosts.values_mut() {
            self.stats.total_hosts += 1;

            let mut schedulable = host.check_interval != 0 && host.checks_enabled;
            if schedulable {
                if let Some(period) = &host.check_period {
                    if !periods.is_valid(now, period) && periods.next_valid(now, period) == now {
                        schedulable = false;
                    }
                }
            }

            if schedulable {
                self.stats.total_scheduled_hosts += 1;
                self.stats.host_check_interval_total += u64::from(host.check_interval);
            } else {
                host.should_be_scheduled = false;
                warn!("Host '{}' should not be scheduled", host.name);
            }
        }
    }

    fn compute_aggregates(&mut self) {
        // ratios treat an empty host list as a single host
        let hosts = self.stats.total_hosts.max(1);
        self.stats.average_services_per_host =
            f64::from(self.stats.total_services) / f64::from(hosts);
        self.stats.average_scheduled_services_per_host =
            f64::from(self.stats.total_scheduled_services) / f64::from(hosts);

        let interval_length = u64::from(self.config.scheduling.interval_length);
        self.stats.service_check_interval_total *= interval_length;
        self.stats.host_check_interval_total *= interval_length;

        if self.stats.total_scheduled_services > 0 {
            self.stats.average_service_check_interval = self.stats.service_check_interval_total
                as f64
                / f64::from(self.stats.total_scheduled_services);
        }
        if self.stats.total_scheduled_hosts > 0 {
            self.stats.average_host_check_interval = self.stats.host_check_interval_total as f64
                / f64::from(self.stats.total_scheduled_hosts);
        }
    }

    fn compute_service_spread(&mut self) {
        let sched = &self.config.scheduling;
        self.stats.max_service_check_spread = sched.max_service_check_spread;
        self.stats.service_inter_check_delay = inter_check_delay(
            sched.service_inter_check_delay_method,
            sched.service_inter_check_delay,
            self.stats.service_check_interval_total,
            self.stats.total_scheduled_services,
            sched.max_service_check_spread,
        );

        self.stats.service_interleave_factor = match sched.service_interleave_factor_method {
            InterleaveMethod::User => sched.service_interleave_factor,
            InterleaveMethod::Smart => {
                self.stats.average_scheduled_services_per_host.ceil() as u32
            }
        };

        debug!(
            "Service spread: delay {:.2}s, interleave factor {}",
            self.stats.service_inter_check_delay, self.stats.service_interleave_factor
        );
    }

    /// Walk the services in interleaved blocks and assign each schedulable
    /// one its preferred first check time.
    fn assign_service_check_times(&mut self, now: Timestamp) {
        let factor = self.stats.service_interleave_factor;
        if factor == 0 {
            return;
        }
        let total_blocks = interleave_blocks(self.stats.total_scheduled_services, factor);
        let delay = self.stats.service_inter_check_delay;

        let ids: Vec<ServiceId> = self.objects.services.keys().copied().collect();
        let periods = &self.collab.time_periods;

        let mut current_block: u32 = 0;
        let mut pos = 0;
        while pos < ids.len() {
            let mut index_in_block: u32 = 0;
            while index_in_block < factor && pos < ids.len() {
                let id = ids[pos];
                pos += 1;
                let Some(service) = self.objects.services.get_mut(&id) else {
                    continue;
                };
                if !service.should_be_scheduled {
                    continue;
                }
                // retained state already put this check in the future
                if service.next_check > now {
                    continue;
                }

                let mult_factor = current_block + index_in_block * total_blocks;
                index_in_block += 1;

                let mut next_check = now + (f64::from(mult_factor) * delay) as Timestamp;
                if let Some(period) = &service.check_period {
                    if !periods.is_valid(next_check, period) {
                        next_check = periods.next_valid(next_check, period);
                    }
                }
                service.next_check = next_check;

                if self.stats.first_service_check == 0
                    || next_check < self.stats.first_service_check
                {
                    self.stats.first_service_check = next_check;
                }
                if next_check > self.stats.last_service_check {
                    self.stats.last_service_check = next_check;
                }
            }
            current_block += 1;
        }
    }

    fn emit_service_check_events(&mut self, _now: Timestamp) {
        let ids: Vec<ServiceId> = self.objects.services.keys().copied().collect();
        for id in ids {
            let Some(service) = self.objects.services.get(&id) else {
                continue;
            };
            let (should, checks_enabled, next_check, options) = (
                service.should_be_scheduled,
                service.checks_enabled,
                service.next_check,
                service.check_options,
            );
            self.collab.persister.update_service_status(service);

            if !should {
                // a forced check queued before restart still gets scheduled
                let forced = !checks_enabled
                    && next_check != 0
                    && options & CHECK_OPTION_FORCE_EXECUTION != 0;
                if !forced {
                    continue;
                }
            }

            self.schedule(
                Schedule::once(EventCategory::ServiceCheck, next_check)
                    .with_payload(Payload::Service(id))
                    .with_options(options),
            );
        }
    }

    fn compute_host_spread(&mut self) {
        let sched = &self.config.scheduling;
        self.stats.max_host_check_spread = sched.max_host_check_spread;
        self.stats.host_inter_check_delay = inter_check_delay(
            sched.host_inter_check_delay_method,
            sched.host_inter_check_delay,
            self.stats.host_check_interval_total,
            self.stats.total_scheduled_hosts,
            sched.max_host_check_spread,
        );

        debug!("Host spread: delay {:.2}s", self.stats.host_inter_check_delay);
    }

    /// Hosts use a plain sequential spread, no interleaving.
    fn assign_host_check_times(&mut self, now: Timestamp) {
        let delay = self.stats.host_inter_check_delay;
        let ids: Vec<HostId> = self.objects.hosts.keys().copied().collect();
        let periods = &self.collab.time_periods;

        let mut mult_factor: u32 = 0;
        for id in ids {
            let Some(host) = self.objects.hosts.get_mut(&id) else {
                continue;
            };
            if !host.should_be_scheduled {
                continue;
            }
            if host.next_check > now {
                continue;
            }

            let mut next_check = now + (f64::from(mult_factor) * delay) as Timestamp;
            if let Some(period) = &host.check_period {
                if !periods.is_valid(next_check, period) {
                    next_check = periods.next_valid(next_check, period);
                }
            }
            host.next_check = next_check;

            if self.stats.first_host_check == 0 || next_check < self.stats.first_host_check {
                self.stats.first_host_check = next_check;
            }
            if next_check > self.stats.last_host_check {
                self.stats.last_host_check = next_check;
            }

            mult_factor += 1;
        }
    }

    fn emit_host_check_events(&mut self, _now: Timestamp) {
        let ids: Vec<HostId> = self.objects.hosts.keys().copied().collect();
        for id in ids {
            let Some(host) = self.objects.hosts.get(&id) else {
                continue;
            };
            let (should, checks_enabled, next_check, options) = (
                host.should_be_scheduled,
                host.checks_enabled,
                host.next_check,
                host.check_options,
            );
            self.collab.persister.update_host_status(host);

            if !should {
                let forced = !checks_enabled
                    && next_check != 0
                    && options & CHECK_OPTION_FORCE_EXECUTION != 0;
                if !forced {
                    continue;
                }
            }

            self.schedule(
                Schedule::once(EventCategory::HostCheck, next_check)
                    .with_payload(Payload::Host(id))
                    .with_options(options),
            );
        }
    }

    /// Queue the fixed recurring high-lane maintenance events.
    fn schedule_maintenance_events(&mut self, now: Timestamp) {
        let config = self.config.clone();

        if config.scheduling.auto_reschedule_checks {
            let interval = config.scheduling.auto_rescheduling_interval;
            self.schedule(Schedule::recurring_high(
                EventCategory::RescheduleChecks,
                now + interval as Timestamp,
                interval,
            ));
        }

        let reaper = config.checks.check_reaper_interval;
        self.schedule(Schedule::recurring_high(
            EventCategory::CheckReaper,
            now + reaper as Timestamp,
            reaper,
        ));

        if config.checks.check_orphaned_hosts || config.checks.check_orphaned_services {
            let interval = config.checks.orphan_check_interval;
            self.schedule(Schedule::recurring_high(
                EventCategory::OrphanCheck,
                now + interval as Timestamp,
                interval,
            ));
        }

        if config.freshness.check_service_freshness {
            let interval = config.freshness.service_freshness_check_interval;
            self.schedule(Schedule::recurring_high(
                EventCategory::ServiceFreshnessCheck,
                now + interval as Timestamp,
                interval,
            ));
        }

        if config.freshness.check_host_freshness {
            let interval = config.freshness.host_freshness_check_interval;
            self.schedule(Schedule::recurring_high(
                EventCategory::HostFreshnessCheck,
                now + interval as Timestamp,
                interval,
            ));
        }

        let status = config.status_update_interval;
        self.schedule(Schedule::recurring_high(
            EventCategory::StatusSave,
            now + status as Timestamp,
            status,
        ));

        if config.commands.check_external_commands {
            let interval = config.effective_command_check_interval();
            self.schedule(Schedule::recurring_high(
                EventCategory::CommandCheck,
                now + interval as Timestamp,
                interval,
            ));
        }

        if config.log_rotation_method != LogRotationMethod::None {
            let method = config.log_rotation_method;
            let clock = Arc::clone(&self.clock);
            let timing: TimingFn = Arc::new(move || next_rotation_time(method, clock.now()));
            let first = next_rotation_time(method, now);
            self.schedule(
                Schedule::recurring_high(EventCategory::LogRotation, first, 0)
                    .with_timing_fn(timing),
            );
        }

        if config.retention.retain_state_information
            && config.retention.retention_update_interval > 0
        {
            let interval = config.retention.retention_update_interval * 60;
            self.schedule(Schedule::recurring_high(
                EventCategory::RetentionSave,
                now + interval as Timestamp,
                interval,
            ));
        }
    }

    /// Human-readable projection of the computed schedule, with derived
    /// tuning suggestions. Purely informational; never feeds back into the
    /// schedule.
    pub fn projection_report(&self) -> String {
        use std::fmt::Write;

        let stats = &self.stats;
        let sched = &self.config.scheduling;
        let mut out = String::new();

        let method_name = |m: DelayMethod| match m {
            DelayMethod::None => "NONE",
            DelayMethod::Dumb => "DUMB",
            DelayMethod::Smart => "SMART",
            DelayMethod::User => "USER-SUPPLIED VALUE",
        };

        let _ = writeln!(out, "HOST SCHEDULING INFORMATION");
        let _ = writeln!(out, "---------------------------");
        let _ = writeln!(out, "Total hosts:                     {}", stats.total_hosts);
        let _ = writeln!(
            out,
            "Total scheduled hosts:           {}",
            stats.total_scheduled_hosts
        );
        let _ = writeln!(
            out,
            "Host inter-check delay method:   {}",
            method_name(sched.host_inter_check_delay_method)
        );
        let _ = writeln!(
            out,
            "Host inter-check delay:          {:.2} sec",
            stats.host_inter_check_delay
        );
        let _ = writeln!(
            out,
            "Max host check spread:           {} min",
            stats.max_host_check_spread
        );
        let _ = writeln!(
            out,
            "First scheduled check:           {}",
            if stats.total_scheduled_hosts == 0 {
                "N/A".to_string()
            } else {
                stats.first_host_check.to_string()
            }
        );
        let _ = writeln!(
            out,
            "Last scheduled check:            {}",
            if stats.total_scheduled_hosts == 0 {
                "N/A".to_string()
            } else {
                stats.last_host_check.to_string()
            }
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "SERVICE SCHEDULING INFORMATION");
        let _ = writeln!(out, "------------------------------");
        let _ = writeln!(
            out,
            "Total services:                  {}",
            stats.total_services
        );
        let _ = writeln!(
            out,
            "Total scheduled services:        {}",
            stats.total_scheduled_services
        );
        let _ = writeln!(
            out,
            "Service inter-check delay method: {}",
            method_name(sched.service_inter_check_delay_method)
        );
        let _ = writeln!(
            out,
            "Average service check interval:  {:.2} sec",
            stats.average_service_check_interval
        );
        let _ = writeln!(
            out,
            "Inter-check delay:               {:.2} sec",
            stats.service_inter_check_delay
        );
        let _ = writeln!(
            out,
            "Interleave factor:               {}",
            stats.service_interleave_factor
        );
        let _ = writeln!(
            out,
            "Max service check spread:        {} min",
            stats.max_service_check_spread
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "PERFORMANCE SUGGESTIONS");
        let _ = writeln!(out, "-----------------------");
        let mut suggestions = 0;

        // assume a 100% check burst and a bounded result backlog
        let mut max_reaper = (2000.0 * stats.service_inter_check_delay).floor();
        max_reaper = max_reaper.clamp(2.0, 30.0);
        let reaper = self.config.checks.check_reaper_interval;
        if (reaper as f64) > max_reaper {
            let _ = writeln!(
                out,
                "* Value for check_reaper_interval should be <= {} seconds",
                max_reaper as u64
            );
            suggestions += 1;
        }
        if reaper < 2 {
            let _ = writeln!(out, "* Value for check_reaper_interval should be >= 2 seconds");
            suggestions += 1;
        }

        // two concurrent-check estimates; the larger wins
        let min_concurrent1 = if stats.service_inter_check_delay == 0.0 {
            (reaper as f64 * 2.0).ceil()
        } else {
            (reaper as f64 * 2.0 / stats.service_inter_check_delay).ceil()
        };
        let min_concurrent2 = if stats.average_service_check_interval > 0.0 {
            (f64::from(stats.total_scheduled_services) / stats.average_service_check_interval
                * 1.25
                * reaper as f64
                * stats.average_service_execution_time)
                .ceil()
        } else {
            0.0
        };
        let min_concurrent = min_concurrent1.max(min_concurrent2);
        let max_parallel = self.config.checks.max_parallel_service_checks;
        if max_parallel != 0 && min_concurrent > f64::from(max_parallel) {
            let _ = writeln!(
                out,
                "* Value for max_parallel_service_checks should be >= {}",
                min_concurrent as u64
            );
            suggestions += 1;
        }

        if suggestions == 0 {
            let _ = writeln!(out, "I have no suggestions - things look okay.");
        }

        out
    }
}

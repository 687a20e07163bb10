//! Adaptive check rescheduling.
//!
//! Periodically smooths the check distribution inside a sliding window: if
//! any two checks would collide (one starts before the projected end of the
//! previous one), every check in the window is re-spaced evenly.

use log::debug;

use crate::clock::Timestamp;
use crate::engine::Engine;
use crate::events::{EventCategory, Lane};
use crate::objects::CHECK_OPTION_FORCE_EXECUTION;

/// Projected scheduling overhead of a single host check, in seconds.
const PROJECTED_HOST_CHECK_OVERHEAD: f64 = 0.1;
/// Projected scheduling overhead of a single service check, in seconds.
const PROJECTED_SERVICE_CHECK_OVERHEAD: f64 = 0.1;

impl Engine {
    /// Smooth the low-lane check schedule over the auto-rescheduling
    /// window. No-op unless at least one collision is projected.
    pub fn adjust_check_scheduling(&mut self) {
        let window = self.config.scheduling.auto_rescheduling_window;
        let window_start = self.now();
        let window_end = window_start + window as Timestamp;

        // first pass over the window: count checks, sum projected execution
        // time and look for a collision
        let mut total_checks: u32 = 0;
        let mut total_exec_time: f64 = 0.0;
        let mut last_check_time: Timestamp = 0;
        let mut last_check_exec_time: f64 = 0.0;
        let mut adjust = false;

        for event in self.queue.events(Lane::Low) {
            if event.run_time <= window_start {
                continue;
            }
            if event.run_time > window_end {
                break;
            }

            let overhead = match event.category {
                EventCategory::HostCheck => {
                    let Some(id) = event.payload.host_id() else {
                        continue;
                    };
                    if self.objects.host(id).is_none() {
                        continue;
                    }
                    PROJECTED_HOST_CHECK_OVERHEAD
                }
                EventCategory::ServiceCheck => {
                    let Some(id) = event.payload.service_id() else {
                        continue;
                    };
                    if self.objects.service(id).is_none() {
                        continue;
                    }
                    PROJECTED_SERVICE_CHECK_OVERHEAD
                }
                _ => continue,
            };

            // forced checks keep their requested time
            if event.options & CHECK_OPTION_FORCE_EXECUTION != 0 {
                continue;
            }

            // does the previous check bump into this one?
            if last_check_time as f64 + last_check_exec_time > event.run_time as f64 {
                adjust = true;
            }
            last_check_time = event.run_time;
            last_check_exec_time = overhead;
            total_exec_time += overhead;
            total_checks += 1;
        }

        if total_checks == 0 || !adjust {
            return;
        }

        // the projected execution time may not even fit in the window; in
        // that case compress it instead of spacing the checks out
        let (inter_check_delay, exec_time_factor) = if total_exec_time > window as f64 {
            (0.0, window as f64 / total_exec_time)
        } else {
            (
                (window as f64 - total_exec_time) / f64::from(total_checks),
                1.0,
            )
        };

        debug!(
            "Adjusting {} checks over a {}s window (delay {:.3}s, factor {:.3})",
            total_checks, window, inter_check_delay, exec_time_factor
        );

        // second pass: rewrite run times by position in the window
        let mut icd_offset = inter_check_delay / 2.0;
        let mut exec_time_offset: f64 = 0.0;

        for index in 0..self.queue.len(Lane::Low) {
            let Some(event) = self.queue.events(Lane::Low).get(index) else {
                break;
            };
            if event.run_time <= window_start {
                continue;
            }
            if event.run_time > window_end {
                break;
            }
            if event.options & CHECK_OPTION_FORCE_EXECUTION != 0 {
                continue;
            }

            let exec_time = match event.category {
                EventCategory::HostCheck => {
                    let Some(id) = event.payload.host_id() else {
                        continue;
                    };
                    let Some(host) = self.objects.host(id) else {
                        continue;
                    };
                    (host.execution_time + PROJECTED_HOST_CHECK_OVERHEAD) * exec_time_factor
                }
                EventCategory::ServiceCheck => {
                    let Some(id) = event.payload.service_id() else {
                        continue;
                    };
                    if self.objects.service(id).is_none() {
                        continue;
                    }
                    PROJECTED_SERVICE_CHECK_OVERHEAD * exec_time_factor
                }
                _ => continue,
            };

            let new_run_time =
                window_start + (exec_time_offset + icd_offset) as Timestamp;

            let category = event.category;
            let payload = event.payload.clone();
            if let Some(event) = self.queue.events_mut(Lane::Low).get_mut(index) {
                event.run_time = new_run_time;
            }
            match category {
                EventCategory::HostCheck => {
                    if let Some(id) = payload.host_id() {
                        if let Some(host) = self.objects.host_mut(id) {
                            host.next_check = new_run_time;
                        }
                        if let Some(host) = self.objects.host(id) {
                            self.collab.persister.update_host_status(host);
                        }
                    }
                }
                EventCategory::ServiceCheck => {
                    if let Some(id) = payload.service_id() {
                        if let Some(service) = self.objects.service_mut(id) {
                            service.next_check = new_run_time;
                        }
                        if let Some(service) = self.objects.service(id) {
                            self.collab.persister.update_service_status(service);
                        }
                    }
                }
                _ => {}
            }

            icd_offset += inter_check_delay;
            exec_time_offset += exec_time;
        }

        self.resort_and_notify(Lane::Low);
    }
}

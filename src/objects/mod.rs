//! Monitored-object model consumed by the scheduling engine.
//!
//! Hosts and services are owned here and referenced from timed events by id
//! only. The engine reads the check-scheduling fields and writes back
//! `next_check` / `should_be_scheduled`; everything else (state handling,
//! notification logic, persistence formats) belongs to external
//! collaborators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// No special check options.
pub const CHECK_OPTION_NONE: u32 = 0;
/// Run the check even if checks are disabled or out of period.
pub const CHECK_OPTION_FORCE_EXECUTION: u32 = 1;
/// Check was triggered by a freshness threshold.
pub const CHECK_OPTION_FRESHNESS_CHECK: u32 = 2;
/// Check was triggered by orphan detection.
pub const CHECK_OPTION_ORPHAN_CHECK: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub u64);

/// Whether the current state has been confirmed by enough rechecks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateType {
    Soft,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostState {
    Up,
    Down,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    /// Check interval in interval-length units (0 = never).
    pub check_interval: u32,
    /// Retry interval in interval-length units, used while in a soft
    /// non-up state.
    pub retry_interval: u32,
    pub checks_enabled: bool,
    /// Name of the time period during which this host may be checked.
    /// `None` means always.
    pub check_period: Option<String>,
    pub check_options: u32,
    pub should_be_scheduled: bool,
    /// Last measured check execution time in seconds.
    pub execution_time: f64,
    pub state_type: StateType,
    pub current_state: HostState,
    pub next_check: Timestamp,
    pub last_check: Timestamp,
    pub last_state_change: Timestamp,
    pub last_hard_state_change: Timestamp,
    pub last_notification: Timestamp,
    pub next_notification: Timestamp,
    pub last_state_history_update: Timestamp,
}

impl Host {
    pub fn new(id: HostId, name: impl Into<String>, check_interval: u32) -> Self {
        Self {
            id,
            name: name.into(),
            check_interval,
            retry_interval: 1,
            checks_enabled: true,
            check_period: None,
            check_options: CHECK_OPTION_NONE,
            should_be_scheduled: true,
            execution_time: 0.0,
            state_type: StateType::Hard,
            current_state: HostState::Up,
            next_check: 0,
            last_check: 0,
            last_state_change: 0,
            last_hard_state_change: 0,
            last_notification: 0,
            next_notification: 0,
            last_state_history_update: 0,
        }
    }

    /// Interval to push a skipped check out by: retry interval while in a
    /// soft problem state, check interval otherwise.
    pub fn reschedule_interval(&self, interval_length: u32) -> i64 {
        let units = if self.state_type == StateType::Soft && self.current_state != HostState::Up {
            self.retry_interval
        } else {
            self.check_interval
        };
        i64::from(units) * i64::from(interval_length)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub host_id: HostId,
    pub description: String,
    pub check_interval: u32,
    pub retry_interval: u32,
    pub checks_enabled: bool,
    pub check_period: Option<String>,
    pub check_options: u32,
    pub should_be_scheduled: bool,
    pub execution_time: f64,
    pub state_type: StateType,
    pub current_state: ServiceState,
    pub next_check: Timestamp,
    pub last_check: Timestamp,
    pub last_state_change: Timestamp,
    pub last_hard_state_change: Timestamp,
    pub last_notification: Timestamp,
    pub next_notification: Timestamp,
}

impl Service {
    pub fn new(
        id: ServiceId,
        host_id: HostId,
        description: impl Into<String>,
        check_interval: u32,
    ) -> Self {
        Self {
            id,
            host_id,
            description: description.into(),
            check_interval,
            retry_interval: 1,
            checks_enabled: true,
            check_period: None,
            check_options: CHECK_OPTION_NONE,
            should_be_scheduled: true,
            execution_time: 0.0,
            state_type: StateType::Hard,
            current_state: ServiceState::Ok,
            next_check: 0,
            last_check: 0,
            last_state_change: 0,
            last_hard_state_change: 0,
            last_notification: 0,
            next_notification: 0,
        }
    }

    pub fn reschedule_interval(&self, interval_length: u32) -> i64 {
        let units = if self.state_type == StateType::Soft && self.current_state != ServiceState::Ok
        {
            self.retry_interval
        } else {
            self.check_interval
        };
        i64::from(units) * i64::from(interval_length)
    }
}

/// All monitored objects, keyed by id. BTreeMaps keep iteration order
/// stable, which the interleaved spread walk relies on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectModel {
    pub hosts: BTreeMap<HostId, Host>,
    pub services: BTreeMap<ServiceId, Service>,
}

impl ObjectModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.id, host);
    }

    pub fn add_service(&mut self, service: Service) {
        self.services.insert(service.id, service);
    }

    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    pub fn host_mut(&mut self, id: HostId) -> Option<&mut Host> {
        self.hosts.get_mut(&id)
    }

    pub fn service(&self, id: ServiceId) -> Option<&Service> {
        self.services.get(&id)
    }

    pub fn service_mut(&mut self, id: ServiceId) -> Option<&mut Service> {
        self.services.get_mut(&id)
    }
}

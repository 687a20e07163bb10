//! Vigil - a host and service check scheduling engine.
//!
//! Vigil keeps a dual-lane queue of timed events (high-priority
//! maintenance events and low-priority check events), builds the initial
//! check schedule by spreading and interleaving first check times, and
//! dispatches due events in a loop that survives system clock jumps.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod objects;

pub use error::{Result, VigilError};

//! Runtrace Monitor - live tracking of agent executions and tasks
//!
//! A [`Monitor`] owns the mutable copy of one record, applies lifecycle
//! changes to it, notifies subscribers with snapshots and persists it to a
//! [`RuntimeRepository`](runtrace_core::RuntimeRepository). A
//! [`MonitorManager`] keeps monitors by id and reads through to storage.

mod config;
mod error;
mod event;
mod manager;
mod monitor;
mod record;
mod runnable;
mod task_monitor;

pub use config::{MonitorConfig, PersistPolicy, CHANNEL_CAPACITY_ENV, PERSIST_POLICY_ENV};
pub use error::{MonitorError, Result};
pub use event::{ChannelSubscriber, EventChannel, EventKind, MonitorEvent, Subscriber};
pub use manager::{ExecutionMonitorManager, MonitorManager, MonitorRequest, TaskMonitorManager};
pub use monitor::{Anomaly, ExecutionMonitor, Monitor, TaskMonitor};
pub use record::MonitoredRecord;
pub use runnable::{drive, Runnable};

//! `storaged`: a privileged block-storage topology daemon (§1 Overview).
//!
//! This crate is the `storagedd` binary's implementation. The module
//! layout mirrors the component list in §4: `event_source` is C1,
//! `reconcile` is C11, `teardown` is §4.11's force-teardown policy,
//! `poller` is C12, and `app`/`config` are the ambient wiring and
//! configuration that hold them together. C2 (sysfs reading), C3/C4
//! (mount tracking), C5 (the object registry), C6 (the entity update
//! pipeline), C7/C8 (inhibitors and authorization), C9 (the job engine)
//! and C10 (operation handlers) live in their own sibling crates.

mod app;
mod config;
mod event_source;
mod poller;
mod reconcile;
mod teardown;

pub use app::AppState;
pub use config::Config;
pub use event_source::{Action, EventSource, KernelEvent, Subsystem};
pub use poller::Poller;
pub use reconcile::{handle_event, synthesize_changed, synthesize_changed_on_all_devices, DaemonSignal, ReconcileInputs, Registries};
pub use teardown::force_teardown;

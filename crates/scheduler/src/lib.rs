//! Zonefit Scheduler Library
//!
//! Single background worker with cooperative cancellation, plus the bridge
//! that marshals closures onto the UI thread.
//!
//! The worker serializes every unit of work the highlight engine runs (page
//! loading, OCR coordination, auto-fit). Scheduling a unit cancels the one in
//! progress. Units read and mutate UI-owned state only through the bridge,
//! which waits for whichever comes first: the closure completing or the unit
//! being cancelled.
//!
//! # Example
//!
//! ```
//! use zonefit_scheduler::{ui_channel, WorkContext, WorkUnit, Worker, WorkerConfig};
//! use std::thread;
//! use std::time::Duration;
//!
//! let (bridge, ui_loop) = ui_channel(Vec::<String>::new());
//! let ui = thread::spawn(move || ui_loop.run());
//!
//! let worker = Worker::new(bridge, WorkerConfig::default());
//! worker
//!     .schedule(WorkUnit::new("greet", |ctx: &WorkContext<Vec<String>>| {
//!         ctx.check()?;
//!         ctx.run_on_ui(|log| log.push("hello from the worker".to_string()))?;
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! assert!(worker.wait_idle(Duration::from_secs(5)));
//! worker.shutdown();
//! drop(worker);
//!
//! assert_eq!(ui.join().unwrap(), vec!["hello from the worker".to_string()]);
//! ```

mod bridge;
mod cancel;
mod worker;

// Re-export public API
pub use bridge::{ui_channel, BridgeError, UiBridge, UiLoop};
pub use cancel::{CancellationToken, Cancelled};
pub use worker::{
    FailureHandler, ScheduleOptions, WorkContext, WorkError, WorkFailure, WorkUnit, Worker,
    WorkerConfig, WorkerStats,
};

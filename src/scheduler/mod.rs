//! Cron-driven detection runs.

pub mod cron;
pub mod engine;

pub use self::cron::DetectionSchedule;
pub use self::engine::{run_detection_loop, Retention};

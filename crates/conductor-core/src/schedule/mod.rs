//! Cron parsing and the due-job scheduler.

pub mod cron;
pub mod scheduler;

pub use cron::{CronError, CronParser, CronSchedule};
pub use scheduler::{JobCallback, Scheduler, SchedulerError};

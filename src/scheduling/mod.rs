pub mod scheduler;
pub mod stopping;

pub use scheduler::{SchedulerArm, TopicChoice, TopicScheduler};
pub use stopping::{StopPolicy, TopicStopReason};

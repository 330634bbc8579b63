pub mod fsrs;
pub mod queue;

pub use fsrs::{FsrsParams, ReviewRating};
pub use queue::{HandoffOutcome, QueueEntry, RetentionPolicy, RetentionQueue, RetentionReview};

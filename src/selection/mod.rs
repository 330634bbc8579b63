pub mod blueprint;
pub mod exposure;
pub mod selector;

pub use blueprint::{BlueprintPolicy, ShareTracker};
pub use exposure::ExposurePolicy;
pub use selector::{ItemSelector, SelectedItem, SelectionReason};

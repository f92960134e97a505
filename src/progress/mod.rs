pub mod bus;
pub mod cancel;
pub mod event;
pub mod store;

pub use bus::EventBus;
pub use cancel::CancelRegistry;
pub use event::{ProgressEvent, ProgressStatus};
pub use store::{ProgressStore, TaskSnapshot};

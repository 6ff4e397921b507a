mod broadcaster;
mod events;

pub use broadcaster::{EventHandler, ProgressBroadcaster, SubscriberId};
pub use events::{ProgressEvent, ProgressEventType};

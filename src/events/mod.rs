pub mod bus;
pub mod types;

pub use bus::{EventBus, Subscription};
pub use types::{job_topic, workflow_topic, Event, SYSTEM_TOPIC};

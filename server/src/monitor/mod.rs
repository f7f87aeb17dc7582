pub mod clock;
pub mod debounce;
pub mod poller;
pub mod probe;
pub mod service;
pub mod status;

pub use poller::{PollerSettings, StatusPoller};
pub use service::DeviceStatusService;

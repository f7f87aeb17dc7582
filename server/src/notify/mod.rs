pub mod alert;
pub mod broadcast;

pub use alert::AlertDispatcher;
pub use broadcast::StatusBroadcaster;

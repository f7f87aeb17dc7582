pub mod devices;
pub mod status_ws;

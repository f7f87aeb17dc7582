pub use super::device::Entity as Device;

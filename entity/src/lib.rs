//! `SeaORM` Entity definitions for the device registry.

pub mod prelude;

pub mod device;

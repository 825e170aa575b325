//! Domain types owned by the registry.

pub mod instance;

pub use instance::{Binding, Instance, User, UserType};

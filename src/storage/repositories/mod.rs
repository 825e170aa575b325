//! Row-level access to the registry tables.

pub mod binding;
pub mod instance;
pub mod user;

pub use binding::BindingRepository;
pub use instance::InstanceRepository;
pub use user::UserRepository;

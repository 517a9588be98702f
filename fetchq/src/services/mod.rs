//! Application services.

mod container;

pub use container::ServiceContainer;

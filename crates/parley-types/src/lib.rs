pub mod api;
pub mod events;
pub mod models;

pub use parley_core::Permission;

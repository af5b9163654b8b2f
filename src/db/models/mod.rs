//! Database models split into domain-specific modules.

pub mod account;
pub mod audit;
pub mod profile;
pub mod role;

pub use account::*;
pub use audit::*;
pub use profile::*;
pub use role::*;

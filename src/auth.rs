//! Auth-domain models: decoded claims, credential pairs, and secret wrappers.

pub mod claims;
pub mod credential;

pub use claims::*;
pub use credential::*;

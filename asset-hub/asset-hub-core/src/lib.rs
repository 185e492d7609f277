pub mod assets;
pub mod auth;
pub mod authz;
pub mod error;
pub mod identity;
pub mod importer;
pub mod model;
pub mod storage;
pub mod teams;

pub use error::{HubError, Result};

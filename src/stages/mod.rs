//! The named steps of the provisioning workflow, one module per stage.

pub mod credentials;
pub mod database;
pub mod dbinit;
pub mod fetch;
pub mod identity;
pub mod packages;
pub mod preflight;
pub mod render;
pub mod rollback;
pub mod services;
pub mod verify;

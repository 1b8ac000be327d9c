pub mod error;
pub mod models;
pub mod request;
pub mod safety_policy;
pub mod session;

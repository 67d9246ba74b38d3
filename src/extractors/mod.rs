//! Request extractors.

pub mod user;

pub use user::{RunAsUser, GUEST_USER, REMOTE_USER_HEADER};

//! Provides types that represent the user's request: what to run, where, and with which
//! credentials.

pub mod action;
pub mod credentials;
pub mod hosts;

#[doc(inline)]
pub use action::{Action, Direction, Transfer};

#[doc(inline)]
pub use credentials::{Credentials, Secret};

//! Device dialects.
//!
//! Each dialect provides a [`crate::Connector`] and the filesystem tables it
//! binds on a successful handshake.

pub mod efactor;
#[cfg(test)]
mod efactor_test;

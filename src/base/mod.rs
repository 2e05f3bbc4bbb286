//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): error codes for every layer of a request
//! - [`Timeline`](timeline::Timeline): the per-request diagnostic log

pub mod context;
pub mod neterror;
pub mod timeline;

#[cfg(test)]
mod tests;

//! HTTP request execution.
//!
//! | Type | Responsibility |
//! |------|----------------|
//! | [`RequestRunner`] | Drives one logical request through redirects and challenges |
//! | [`Transaction`] | One hop on an agent connection |
//! | [`redirect`] | Follow rules, method rewriting and credential stripping |
//! | [`Response`] | Final response with its body artifact |
//! | [`multipart`] | `multipart/form-data` encoding |

pub mod multipart;
pub mod redirect;
pub mod response;
pub mod runner;
pub mod transaction;

pub use response::Response;
pub use runner::{Outcome, RequestRunner, RunError, RunOutput};
pub use transaction::{Attempt, HopResponse, Transaction};

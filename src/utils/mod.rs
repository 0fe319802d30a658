//! Utility functions and helpers.

pub mod duration;
pub mod http;
pub mod retry;
pub mod url;

//! Translation between the public chat formats and the completion backend.
//!
//! Requests from either format are reduced to one canonical message sequence;
//! backend responses are rebuilt into the caller's format, either whole or as
//! a stream of lifecycle events. Nothing in here performs I/O except the
//! stream drivers, which only consume the byte stream they are given.

pub mod anthropic_types;
pub mod backend_types;
pub mod canonical;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

//! Contract types for comment events
//!
//! This module contains the wire types exchanged over the comments exchange
//! and the request/response bodies of the HTTP gateway.

pub mod comment_events_v1;
pub mod http_v1;

pub use comment_events_v1::*;
pub use http_v1::*;

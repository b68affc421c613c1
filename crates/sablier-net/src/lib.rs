//! # sablier-net
//!
//! Destination-aware request preparation and response validation. Nothing
//! here performs I/O by itself: a [`PreparedRequest`] is pure data until it
//! is handed to a [`Transport`], and the only production transport is a
//! thin reqwest adapter behind that trait.

pub mod batch;
pub mod bencode;
pub mod endpoint;
pub mod request;
pub mod responses;
pub mod transport;
pub mod validation;

mod error;

pub use batch::{BatchResponse, SubRequest, SubResponse, SubResult};
pub use endpoint::{Endpoint, EndpointKind};
pub use error::{NetError, Result};
pub use request::{Method, PreparedRequest, Target};
pub use transport::{HttpTransport, NetworkError, ResponseInfo, Transport};

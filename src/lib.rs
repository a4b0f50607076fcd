pub mod event;
pub mod property;
#[cfg(feature = "client")]
mod api;

pub use event::Event;
pub use property::Value;

#[cfg(feature = "blocking")]
pub use api::blocking;
#[cfg(feature = "client")]
pub use api::{Api, ApiBuilder, ApiError, DecideResponse, EndpointKind};

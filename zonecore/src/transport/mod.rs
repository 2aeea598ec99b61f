//! UDP reliable transport (spec.md §4.3, §4.4, §6). Grounded on
//! `neutronium::net`: the `NetworkError`/`ErrorType` taxonomy from
//! `flux::shared`, the framing style of `neutronium::net::frame`, and the
//! `mio`-driven event loop of `neutronium::net::endpoint::Endpoint`.

pub mod buffer;
pub mod endpoint;
pub mod limiter;
pub mod reliable;
pub mod wire;

pub use wire::{ErrorType, NetworkError, NetworkResult};

//! can-transport: CAN bus abstractions and the per-interface frame hub
//!
//! This crate provides the [`CanBus`] trait with feature-gated backends, the
//! [`CanTransport`] hub that runs one receive thread per interface and routes
//! frames to registered consumers, and a [`BusRegistry`] that keeps at most one
//! open transport per interface name. The default build enables a `mock`
//! backend so that binaries and tests run on any host without CAN hardware.

mod types;
pub use types::{BusInfo, CanFilter, CanFrame, CanId, SlcanBitrate, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::CanBus;

mod transport;
pub use transport::{CanTransport, FrameHandler, KeyExtractor, TransportStats};

mod registry;
pub use registry::{Backend, BusRegistry};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, MockHandle, Responder};

#[cfg(feature = "slcan")]
mod slcan;

#[cfg(feature = "slcan")]
pub use slcan::SlcanBus;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub use crate::socketcan::SocketCanBus;

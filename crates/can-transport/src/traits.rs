use crate::{BusInfo, CanFilter, CanFrame, Result, TransportError};

/// A minimal blocking CAN bus interface.
///
/// Backends are `Send` so that a [`crate::CanTransport`] can move one handle
/// into its receive thread and keep another for transmitting.
pub trait CanBus: Send {
    /// Open a CAN interface by name (e.g., "can0", "/dev/ttyACM0").
    fn open(name: &str) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list available interfaces for this backend.
    fn list() -> Result<Vec<BusInfo>>
    where
        Self: Sized;

    /// Set acceptance filters if supported.
    fn set_filters(&mut self, _filters: &[CanFilter]) -> Result<()> {
        let _ = _filters;
        Err(TransportError::Unsupported("filters not supported"))
    }

    /// Receive one frame (blocking with optional timeout in milliseconds).
    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame>;

    /// Send one frame.
    fn send(&mut self, frame: &CanFrame) -> Result<()>;

    /// Second handle on the same physical medium.
    ///
    /// Frames sent through either handle reach the bus; frames received on
    /// the medium must be readable from the handle that calls `recv`.
    /// [`crate::CanTransport`] transmits on the clone, so frames sent through
    /// it must not come back on the original as received traffic.
    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;
}

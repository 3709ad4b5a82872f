use crate::{BusInfo, CanBus, CanFilter, CanFrame, CanId, Result, Timestamp, TransportError};
use socketcan::{
    CanFilter as RawFilter, CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Id,
    Socket, SocketOptions, StandardId,
};
use std::io::ErrorKind;
use std::time::Duration;

/// ARPHRD_CAN, the link type Linux reports for CAN netdevs.
const ARPHRD_CAN: &str = "280";

/// Raw SocketCAN interface (Linux).
pub struct SocketCanBus {
    iface: String,
    socket: CanSocket,
    timeout_ms: Option<u64>,
}

impl SocketCanBus {
    pub fn iface(&self) -> &str {
        &self.iface
    }

    fn to_raw(frame: &CanFrame) -> Result<RawFrame> {
        let id: Id = if frame.id.is_extended() {
            ExtendedId::new(frame.id.raw())
                .ok_or(TransportError::InvalidFrame("extended id"))?
                .into()
        } else {
            u16::try_from(frame.id.raw())
                .ok()
                .and_then(StandardId::new)
                .ok_or(TransportError::InvalidFrame("standard id"))?
                .into()
        };
        let raw = if frame.rtr {
            RawFrame::new_remote(id, usize::from(frame.len))
        } else {
            RawFrame::new(id, frame.payload())
        };
        raw.ok_or(TransportError::InvalidFrame("frame"))
    }

    fn from_raw(raw: &RawFrame) -> Result<CanFrame> {
        let id = match raw.id() {
            Id::Standard(s) => CanId::standard(s.as_raw()),
            Id::Extended(e) => CanId::extended(e.as_raw()),
        }
        .ok_or(TransportError::InvalidFrame("id range"))?;
        let mut frame = CanFrame::new(id, raw.data()).ok_or(TransportError::InvalidFrame("len"))?;
        frame.rtr = raw.is_remote_frame();
        frame.timestamp = Some(Timestamp::now());
        Ok(frame)
    }
}

fn io_err(e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::Io(e.to_string()),
    }
}

impl CanBus for SocketCanBus {
    fn open(name: &str) -> Result<Self> {
        let socket = CanSocket::open(name).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TransportError::InterfaceNotFound(name.to_string()),
            _ => TransportError::Io(format!("{name}: {e}")),
        })?;
        tracing::info!(iface = name, "socketcan open");
        Ok(Self {
            iface: name.to_string(),
            socket,
            timeout_ms: None,
        })
    }

    fn list() -> Result<Vec<BusInfo>> {
        let entries =
            std::fs::read_dir("/sys/class/net").map_err(|e| TransportError::Io(e.to_string()))?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let link_type = std::fs::read_to_string(entry.path().join("type")).unwrap_or_default();
            if link_type.trim() == ARPHRD_CAN {
                out.push(BusInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    driver: "socketcan".to_string(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn set_filters(&mut self, filters: &[CanFilter]) -> Result<()> {
        let raw: Vec<RawFilter> = filters
            .iter()
            .map(|f| RawFilter::new(f.id.raw(), f.mask))
            .collect();
        self.socket.set_filters(&raw).map_err(io_err)
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        if let Some(ms) = timeout_ms.filter(|ms| Some(*ms) != self.timeout_ms) {
            self.socket
                .set_read_timeout(Duration::from_millis(ms))
                .map_err(io_err)?;
            self.timeout_ms = Some(ms);
        }
        loop {
            let raw = self.socket.read_frame().map_err(io_err)?;
            if let RawFrame::Error(err) = &raw {
                tracing::debug!(iface = %self.iface, ?err, "bus error frame");
                continue;
            }
            return Self::from_raw(&raw);
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let raw = Self::to_raw(frame)?;
        self.socket.write_frame(&raw).map_err(io_err)
    }

    /// A second raw socket on the same interface, used for transmitting.
    ///
    /// Local loopback is off on the clone: the kernel would otherwise echo
    /// every frame it sends to the receiving socket of this process.
    fn try_clone(&self) -> Result<Self> {
        let mut clone = Self::open(&self.iface)?;
        clone.socket.set_loopback(false).map_err(io_err)?;
        if let Some(ms) = self.timeout_ms {
            clone
                .socket
                .set_read_timeout(Duration::from_millis(ms))
                .map_err(io_err)?;
            clone.timeout_ms = Some(ms);
        }
        Ok(clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    macro_rules! require_vcan0 {
        () => {{
            if !Path::new("/sys/class/net/vcan0").exists() {
                eprintln!("Skipping test: vcan0 interface not available");
                return;
            }
            "vcan0"
        }};
    }

    #[test]
    fn test_open_missing_interface_fails() {
        assert!(SocketCanBus::open("nonexistent_can99").is_err());
    }

    #[test]
    fn test_transmit_handle_is_not_echoed() {
        let iface = require_vcan0!();
        let mut rx = SocketCanBus::open(iface).unwrap();
        let mut tx = rx.try_clone().unwrap();
        let mut peer = SocketCanBus::open(iface).unwrap();

        let id = CanId::standard(0x01).unwrap();
        tx.send(&CanFrame::data8(id, [0xFF; 8])).unwrap();
        assert!(matches!(rx.recv(Some(50)), Err(TransportError::Timeout)));

        // frames from other senders still arrive
        let reply = CanId::standard(0x11).unwrap();
        peer.send(&CanFrame::data8(reply, [1; 8])).unwrap();
        assert_eq!(rx.recv(Some(200)).unwrap().id, reply);
    }
}

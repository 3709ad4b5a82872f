use crate::{BusInfo, CanBus, CanFilter, CanFrame, CanId, Result, SlcanBitrate, Timestamp, TransportError};
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

const SERIAL_BAUD: u32 = 115_200;
const DEFAULT_TIMEOUT_MS: u64 = 200;

/// SLCAN text protocol over serial (USB-CAN dongles and serial-attached motor buses)
pub struct SlcanBus {
    port_path: String,
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
    timeout_ms: u64,
}

impl SlcanBus {
    /// Open the port, set the CAN bitrate (default 1 Mbit/s) and open the channel.
    pub fn open_with(path: &str, bitrate: Option<SlcanBitrate>) -> Result<Self> {
        let mut port = serialport::new(path, SERIAL_BAUD)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        // Close, set bitrate, then open; a dongle that is already closed NAKs the first command.
        let _ = Self::write_cmd(&mut *port, b"C\r");
        let code = bitrate.unwrap_or(SlcanBitrate::B1M).code();
        Self::write_cmd(&mut *port, &[b'S', code, b'\r'])?;
        Self::write_cmd(&mut *port, b"O\r")?;
        tracing::info!(path, bitrate = ?bitrate, "slcan channel open");
        Ok(SlcanBus {
            port_path: path.to_string(),
            port,
            pending: Vec::with_capacity(64),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
    }

    pub fn path(&self) -> &str {
        &self.port_path
    }

    fn encode_frame(frame: &CanFrame) -> Result<Vec<u8>> {
        if frame.len > 8 {
            return Err(TransportError::InvalidFrame("dlc > 8"));
        }
        let mut out = Vec::with_capacity(32);
        let (kind, id) = match (frame.id.is_extended(), frame.rtr) {
            (false, false) => (b't', format!("{:03X}", frame.id.raw())),
            (false, true) => (b'r', format!("{:03X}", frame.id.raw())),
            (true, false) => (b'T', format!("{:08X}", frame.id.raw())),
            (true, true) => (b'R', format!("{:08X}", frame.id.raw())),
        };
        out.push(kind);
        out.extend_from_slice(id.as_bytes());
        out.push(b'0' + frame.len);
        if !frame.rtr {
            for b in frame.payload() {
                out.extend_from_slice(format!("{b:02X}").as_bytes());
            }
        }
        out.push(b'\r');
        Ok(out)
    }

    fn parse_frame(line: &[u8]) -> Result<CanFrame> {
        let kind = *line.first().ok_or(TransportError::InvalidFrame("empty"))?;
        let (id_len, extended, rtr) = match kind {
            b't' => (3, false, false),
            b'r' => (3, false, true),
            b'T' => (8, true, false),
            b'R' => (8, true, true),
            _ => return Err(TransportError::InvalidFrame("unknown header")),
        };
        if line.len() < 1 + id_len + 1 {
            return Err(TransportError::InvalidFrame("short header"));
        }
        let raw_id = u32::from_str_radix(hex_str(&line[1..1 + id_len])?, 16)
            .map_err(|_| TransportError::InvalidFrame("id"))?;
        let id = if extended {
            CanId::extended(raw_id)
        } else {
            u16::try_from(raw_id).ok().and_then(CanId::standard)
        }
        .ok_or(TransportError::InvalidFrame("id range"))?;

        let dlc = line[1 + id_len].wrapping_sub(b'0');
        if dlc > 8 {
            return Err(TransportError::InvalidFrame("dlc > 8"));
        }
        let mut data = [0u8; 8];
        if !rtr {
            let body = &line[2 + id_len..];
            if body.len() < usize::from(dlc) * 2 {
                return Err(TransportError::InvalidFrame("short data"));
            }
            for (i, byte) in data.iter_mut().take(usize::from(dlc)).enumerate() {
                *byte = u8::from_str_radix(hex_str(&body[i * 2..i * 2 + 2])?, 16)
                    .map_err(|_| TransportError::InvalidFrame("byte"))?;
            }
        }
        Ok(CanFrame {
            id,
            len: dlc,
            data,
            rtr,
            timestamp: Some(Timestamp::now()),
        })
    }

    fn write_cmd(port: &mut dyn SerialPort, cmd: &[u8]) -> Result<()> {
        port.write_all(cmd)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    /// Pop one complete `\r`-terminated line out of the receive buffer.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == b'\r')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        Some(line)
    }
}

fn hex_str(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| TransportError::InvalidFrame("utf8"))
}

impl CanBus for SlcanBus {
    fn open(path: &str) -> Result<Self> {
        Self::open_with(path, None)
    }

    fn list() -> Result<Vec<BusInfo>> {
        let ports = serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let driver = match p.port_type {
                    SerialPortType::UsbPort(_) => "slcan-serial",
                    _ => "serial",
                };
                BusInfo {
                    name: p.port_name,
                    driver: driver.to_string(),
                }
            })
            .collect())
    }

    fn set_filters(&mut self, _filters: &[CanFilter]) -> Result<()> {
        let _ = _filters;
        // SLCAN hardware filters are not standardized; ignore
        Err(TransportError::Unsupported("slcan filters not supported"))
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        if let Some(ms) = timeout_ms {
            if ms != self.timeout_ms {
                self.port
                    .set_timeout(Duration::from_millis(ms))
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                self.timeout_ms = ms;
            }
        }
        let mut buf = [0u8; 128];
        loop {
            while let Some(line) = self.take_line() {
                // Bare `\r` acks and `\x07` naks answer commands, not frames.
                if line.is_empty() || line == [0x07] {
                    continue;
                }
                return Self::parse_frame(&line);
            }
            match self.port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    return Err(TransportError::Timeout)
                }
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let line = Self::encode_frame(frame)?;
        self.port
            .write_all(&line)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    fn try_clone(&self) -> Result<Self> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(SlcanBus {
            port_path: self.port_path.clone(),
            port,
            pending: Vec::with_capacity(64),
            timeout_ms: self.timeout_ms,
        })
    }
}

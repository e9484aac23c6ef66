//! Tunnel Device
//!
//! The OS-provided packet stream the pump reads from and writes to, and
//! the provider that acquires it.

use crate::config::{PumpConfig, TunnelConfig};
use std::io;

/// Tunnel errors
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Failed to acquire tunnel device: {0}")]
    Acquire(String),

    #[error("Invalid tunnel configuration: {0}")]
    Config(String),

    #[error("Tunnel devices are not supported on this platform")]
    Unsupported,
}

/// A bidirectional raw IP packet stream.
///
/// Reads may return `Ok(0)` when nothing arrived within the device's poll
/// interval; that is not an error, it gives the reader a chance to notice
/// cancellation.
pub trait TunnelDevice: Send {
    /// Read one packet into `buf`
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one packet
    fn write(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Release the device. Later reads and writes fail.
    fn close(&mut self) -> io::Result<()>;

    /// True if `read` already waits out a poll interval before returning
    /// `Ok(0)`. The pump only pauses after idle reads from devices that
    /// return immediately.
    fn waits_for_input(&self) -> bool {
        false
    }
}

/// Acquires a configured tunnel device
pub trait TunnelProvider: Send + Sync {
    fn acquire(&self, config: &TunnelConfig) -> Result<Box<dyn TunnelDevice>, TunnelError>;
}

/// Device provider for the current platform
pub fn platform_provider(pump: &PumpConfig) -> Result<Box<dyn TunnelProvider>, TunnelError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(crate::linux::LinuxTunProvider::new(pump.idle_pause())))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pump;
        Err(TunnelError::Unsupported)
    }
}

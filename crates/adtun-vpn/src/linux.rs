//! Linux TUN device
//!
//! Only the interface itself (name, address, netmask, MTU) is configured
//! here. Routes, DNS servers, and per-application scoping belong to the
//! host's network setup and are logged for the operator.

use crate::config::TunnelConfig;
use crate::device::{TunnelDevice, TunnelError, TunnelProvider};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::{info, warn};

/// Creates TUN interfaces through `/dev/net/tun`
pub struct LinuxTunProvider {
    poll_interval: Duration,
}

impl LinuxTunProvider {
    /// `poll_interval` bounds how long a read blocks before returning 0
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl TunnelProvider for LinuxTunProvider {
    fn acquire(&self, config: &TunnelConfig) -> Result<Box<dyn TunnelDevice>, TunnelError> {
        let mut tun_config = tun::Configuration::default();
        tun_config
            .name(config.name.as_str())
            .address(config.address)
            .netmask(config.netmask())
            .mtu(i32::from(config.mtu))
            .up();

        tun_config.platform(|platform| {
            platform.packet_information(false);
        });

        let device =
            tun::create(&tun_config).map_err(|e| TunnelError::Acquire(e.to_string()))?;

        info!(
            "TUN {} up: {}/{} mtu {}",
            config.name, config.address, config.prefix_len, config.mtu
        );
        for route in &config.routes {
            info!("Route {} via {} is left to the host", route, config.name);
        }
        if !config.dns_servers.is_empty() {
            info!("DNS servers {:?} are left to the host", config.dns_servers);
        }
        if !config.allowed_applications.is_empty() {
            warn!(
                "Per-application scoping is not available on Linux, ignoring {:?}",
                config.allowed_applications
            );
        }

        let poll_timeout = i32::try_from(self.poll_interval.as_millis())
            .unwrap_or(i32::MAX)
            .max(1);

        Ok(Box::new(LinuxTunDevice {
            device: Some(device),
            poll_timeout,
        }))
    }
}

struct LinuxTunDevice {
    device: Option<tun::platform::Device>,
    /// poll(2) timeout in milliseconds
    poll_timeout: i32,
}

impl LinuxTunDevice {
    fn device(&mut self) -> io::Result<&mut tun::platform::Device> {
        self.device
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "tunnel device closed"))
    }
}

impl TunnelDevice for LinuxTunDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.poll_timeout;
        let device = self.device()?;

        let mut pollfd = libc::pollfd {
            fd: device.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pollfd is a valid, initialized struct and nfds is 1
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout) };

        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        if ready == 0 {
            return Ok(0);
        }
        if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("tunnel device poll revents {:#x}", pollfd.revents),
            ));
        }

        device.read(buf)
    }

    fn write(&mut self, packet: &[u8]) -> io::Result<()> {
        let written = self.device()?.write(packet)?;
        if written != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short tunnel write: {} of {} bytes", written, packet.len()),
            ));
        }
        Ok(())
    }

    fn waits_for_input(&self) -> bool {
        true
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the device closes its descriptor
        if self.device.take().is_some() {
            info!("TUN device closed");
        }
        Ok(())
    }
}

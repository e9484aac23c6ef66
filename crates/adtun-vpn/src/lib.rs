//! adtun Tunnel Layer
//!
//! Runs the filter against a live tunnel device.
//!
//! # Architecture
//!
//! ```text
//! control (start/stop/consent)
//!        │
//!        ▼
//! ┌───────────────┐  acquire   ┌────────────────┐
//! │ TunnelManager │──────────▶ │ TunnelProvider │
//! └───────┬───────┘            └───────┬────────┘
//!         │ spawns                     │ Box<dyn TunnelDevice>
//!         ▼                            ▼
//! ┌───────────────┐  read/write ┌──────────────┐
//! │  PacketPump   │◀──────────▶ │ TunnelDevice │
//! └───────┬───────┘             └──────────────┘
//!         │ classify
//!         ▼
//!   PacketFilter (adtun-filter)
//! ```
//!
//! Exactly one pump thread touches the device. Lifecycle state is owned by
//! the manager and only changed during start, stop, and the pump's own
//! teardown after a read failure.

mod config;
mod consent;
mod device;
mod manager;
mod pump;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, MIN_MTU, PumpConfig, Route, TunnelConfig, netmask};
pub use consent::{AutoConsent, ConsentGate, ConsentStatus, ConsentToken, RememberedConsent};
pub use device::{TunnelDevice, TunnelError, TunnelProvider, platform_provider};
pub use manager::{
    DisconnectReason, ManagerError, StartOutcome, TunnelEvent, TunnelManager, TunnelState,
};
pub use pump::{PacketPump, PumpExit, PumpStats, PumpStatsSnapshot, Verdict, classify};

#[cfg(target_os = "linux")]
pub use linux::LinuxTunProvider;

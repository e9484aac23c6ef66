//! Packet Pump
//!
//! The single worker loop between the tunnel device and the filter:
//! read a packet, classify it, write it back unchanged or drop it.
//!
//! Only I/O failures on the read side end the loop. Parse failures,
//! filter panics, and write failures are all absorbed here, and anything
//! that cannot be classified is forwarded.

use crate::config::PumpConfig;
use crate::device::TunnelDevice;
use adtun_filter::{BlockReason, Decision, PacketFilter};
use adtun_packet::Packet;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Pump statistics
#[derive(Debug, Default)]
pub struct PumpStats {
    pub packets_read: AtomicU64,
    pub forwarded: AtomicU64,
    pub dropped: AtomicU64,
    /// Forwarded without being understood
    pub unparsed: AtomicU64,
    pub write_failures: AtomicU64,
    pub idle_reads: AtomicU64,
}

/// Point-in-time copy of [`PumpStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStatsSnapshot {
    pub packets_read: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub unparsed: u64,
    pub write_failures: u64,
    pub idle_reads: u64,
}

impl PumpStats {
    pub fn snapshot(&self) -> PumpStatsSnapshot {
        PumpStatsSnapshot {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            unparsed: self.unparsed.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            idle_reads: self.idle_reads.load(Ordering::Relaxed),
        }
    }
}

impl PumpStatsSnapshot {
    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "read {} | forwarded {} | dropped {} | unparsed {} | write failures {}",
            self.packets_read, self.forwarded, self.dropped, self.unparsed, self.write_failures
        )
    }
}

/// Why the pump stopped
#[derive(Debug)]
pub enum PumpExit {
    /// The cancel flag was raised
    Cancelled,
    /// Reading from the device failed
    ReadFailure(io::Error),
}

/// What to do with one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    /// Not an IPv4 packet we can read; forwarded as-is
    Unparsed,
    Drop(BlockReason),
}

/// Classify raw packet bytes
pub fn classify(filter: &PacketFilter, bytes: &[u8]) -> Verdict {
    match Packet::parse(bytes) {
        Some(packet) => match filter.decide(&packet) {
            Decision::Forward => Verdict::Forward,
            Decision::Drop(reason) => Verdict::Drop(reason),
        },
        None => Verdict::Unparsed,
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Read/classify/forward loop over one device
pub struct PacketPump {
    device: Box<dyn TunnelDevice>,
    filter: Arc<PacketFilter>,
    buffer: Vec<u8>,
    idle_pause: Duration,
    cancel: Arc<AtomicBool>,
    stats: Arc<PumpStats>,
    released: bool,
}

impl PacketPump {
    pub fn new(
        device: Box<dyn TunnelDevice>,
        filter: Arc<PacketFilter>,
        config: &PumpConfig,
        cancel: Arc<AtomicBool>,
        stats: Arc<PumpStats>,
    ) -> Self {
        Self {
            device,
            filter,
            buffer: vec![0u8; config.buffer_size],
            idle_pause: config.idle_pause(),
            cancel,
            stats,
            released: false,
        }
    }

    /// Pump until cancelled or the device fails, then close the device.
    pub fn run(mut self) -> PumpExit {
        debug!("Packet pump started");
        let pause_when_idle = !self.device.waits_for_input();

        let exit = loop {
            if self.cancel.load(Ordering::SeqCst) {
                break PumpExit::Cancelled;
            }

            match self.device.read(&mut self.buffer) {
                Ok(0) => {
                    self.stats.idle_reads.fetch_add(1, Ordering::Relaxed);
                    if pause_when_idle {
                        thread::sleep(self.idle_pause);
                    }
                }
                Ok(len) => {
                    self.stats.packets_read.fetch_add(1, Ordering::Relaxed);
                    self.handle(len);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Tunnel read failed: {}", e);
                    break PumpExit::ReadFailure(e);
                }
            }
        };

        self.release();
        debug!("Packet pump stopped: {:?}", exit);
        exit
    }

    /// Close the device unless already done
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.device.close() {
            warn!("Closing tunnel device failed: {}", e);
        }
    }

    fn handle(&mut self, len: usize) {
        let filter = &self.filter;
        let packet = &self.buffer[..len];

        let verdict = match panic::catch_unwind(AssertUnwindSafe(|| classify(filter, packet))) {
            Ok(verdict) => verdict,
            Err(payload) => {
                error!(
                    "Classifier panicked on a {} byte packet, forwarding: {}",
                    len,
                    panic_message(payload.as_ref())
                );
                Verdict::Forward
            }
        };

        match verdict {
            Verdict::Drop(reason) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                info!(
                    protocol = %reason.protocol,
                    host = %reason.host,
                    dest = %reason.destination,
                    "blocked"
                );
            }
            Verdict::Unparsed => {
                self.stats.unparsed.fetch_add(1, Ordering::Relaxed);
                trace!("Unparseable {} byte packet, forwarding", len);
                self.forward(len);
            }
            Verdict::Forward => self.forward(len),
        }
    }

    fn forward(&mut self, len: usize) {
        match self.device.write(&self.buffer[..len]) {
            Ok(()) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Tunnel write failed, packet lost: {}", e);
            }
        }
    }
}

impl Drop for PacketPump {
    fn drop(&mut self) {
        // A pump that never ran (its thread failed to spawn) still owns the device
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Probe, Step};
    use adtun_filter::Blocklist;
    use adtun_packet::synth;
    use std::net::Ipv4Addr;
    use std::time::Instant;

    const AD_SERVER: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 10);

    fn filter() -> Arc<PacketFilter> {
        Arc::new(PacketFilter::new(Blocklist::builtin()))
    }

    fn run_script(probe: &Arc<Probe>, steps: Vec<Step>) -> (PumpExit, PumpStatsSnapshot) {
        run_script_with(probe, steps, &PumpConfig::default())
    }

    fn run_script_with(
        probe: &Arc<Probe>,
        steps: Vec<Step>,
        config: &PumpConfig,
    ) -> (PumpExit, PumpStatsSnapshot) {
        probe.push_steps(steps);
        probe.push_steps(vec![Step::Fail(io::ErrorKind::BrokenPipe)]);

        let stats = Arc::new(PumpStats::default());
        let pump = PacketPump::new(
            probe.device(),
            filter(),
            config,
            Arc::new(AtomicBool::new(false)),
            Arc::clone(&stats),
        );
        let exit = pump.run();
        (exit, stats.snapshot())
    }

    #[test]
    fn test_forward_and_drop() {
        let probe = Probe::new();
        let clean = synth::tls_packet(AD_SERVER, 443, "example.com");
        let blocked = synth::tls_packet(AD_SERVER, 443, "doubleclick.net");
        let dns = synth::dns_packet(Ipv4Addr::new(1, 1, 1, 1), "doubleclick.net");

        let (exit, stats) = run_script(
            &probe,
            vec![
                Step::Packet(clean.clone()),
                Step::Packet(blocked),
                Step::Packet(dns.clone()),
            ],
        );

        assert!(matches!(exit, PumpExit::ReadFailure(_)));
        assert_eq!(probe.written(), vec![clean, dns]);
        assert_eq!(stats.packets_read, 3);
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(probe.closes(), 1);
    }

    #[test]
    fn test_unparseable_is_forwarded_unchanged() {
        let probe = Probe::new();
        let garbage = vec![0x60, 0, 0, 0, 1, 2, 3];
        let short = vec![0x45; 10];

        let (_, stats) = run_script(
            &probe,
            vec![Step::Packet(garbage.clone()), Step::Packet(short.clone())],
        );

        assert_eq!(probe.written(), vec![garbage, short]);
        assert_eq!(stats.unparsed, 2);
        assert_eq!(stats.forwarded, 2);
    }

    #[test]
    fn test_idle_and_interrupted_reads_continue() {
        let probe = Probe::new();
        let clean = synth::tls_packet(AD_SERVER, 443, "example.com");

        let (exit, stats) = run_script(
            &probe,
            vec![Step::Idle, Step::Interrupted, Step::Idle, Step::Packet(clean.clone())],
        );

        assert!(matches!(exit, PumpExit::ReadFailure(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(stats.idle_reads, 2);
        assert_eq!(probe.written(), vec![clean]);
    }

    #[test]
    fn test_idle_pause_after_immediate_zero_read() {
        let probe = Probe::new();
        let config = PumpConfig {
            idle_pause_ms: 30,
            ..PumpConfig::default()
        };

        let begun = Instant::now();
        let (_, stats) = run_script_with(&probe, vec![Step::Idle, Step::Idle], &config);

        assert_eq!(stats.idle_reads, 2);
        assert!(begun.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_polling_device_is_not_paused_again() {
        let probe = Probe::new();
        probe.wait_for_input(true);
        let config = PumpConfig {
            idle_pause_ms: 500,
            ..PumpConfig::default()
        };

        let begun = Instant::now();
        let (_, stats) =
            run_script_with(&probe, vec![Step::Idle, Step::Idle, Step::Idle], &config);

        assert_eq!(stats.idle_reads, 3);
        assert!(begun.elapsed() < Duration::from_millis(500), "took {:?}", begun.elapsed());
    }

    #[test]
    fn test_pump_that_never_ran_closes_device() {
        let probe = Probe::new();
        let pump = PacketPump::new(
            probe.device(),
            filter(),
            &PumpConfig::default(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(PumpStats::default()),
        );

        drop(pump);
        assert_eq!(probe.reads(), 0);
        assert_eq!(probe.closes(), 1);
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let probe = Probe::new();
        probe.fail_writes(true);
        let clean = synth::tls_packet(AD_SERVER, 443, "example.com");

        let (exit, stats) = run_script(
            &probe,
            vec![Step::Packet(clean.clone()), Step::Packet(clean)],
        );

        assert!(matches!(exit, PumpExit::ReadFailure(_)));
        assert_eq!(stats.packets_read, 2);
        assert_eq!(stats.write_failures, 2);
        assert_eq!(stats.forwarded, 0);
        assert!(probe.written().is_empty());
    }

    #[test]
    fn test_cancel_before_read() {
        let probe = Probe::new();
        let cancel = Arc::new(AtomicBool::new(true));
        let pump = PacketPump::new(
            probe.device(),
            filter(),
            &PumpConfig::default(),
            cancel,
            Arc::new(PumpStats::default()),
        );

        assert!(matches!(pump.run(), PumpExit::Cancelled));
        assert_eq!(probe.reads(), 0);
        assert_eq!(probe.closes(), 1);
    }

    #[test]
    fn test_classify() {
        let filter = filter();

        assert_eq!(
            classify(&filter, &synth::tls_packet(AD_SERVER, 443, "example.com")),
            Verdict::Forward
        );
        assert!(matches!(
            classify(&filter, &synth::tls_packet(AD_SERVER, 443, "adswizz.com")),
            Verdict::Drop(_)
        ));
        assert_eq!(classify(&filter, &[]), Verdict::Unparsed);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }

    #[test]
    fn test_stats_format() {
        let snapshot = PumpStatsSnapshot {
            packets_read: 3,
            forwarded: 2,
            dropped: 1,
            ..PumpStatsSnapshot::default()
        };
        assert_eq!(
            snapshot.format(),
            "read 3 | forwarded 2 | dropped 1 | unparsed 0 | write failures 0"
        );
    }
}

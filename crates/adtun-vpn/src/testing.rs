//! In-memory tunnel devices for tests.

use crate::config::TunnelConfig;
use crate::device::{TunnelDevice, TunnelError, TunnelProvider};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Simulated poll interval of an idle device
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// One scripted read result
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Packet(Vec<u8>),
    Idle,
    Interrupted,
    Fail(io::ErrorKind),
}

/// Shared view of every device a [`Probe`] hands out
#[derive(Default)]
pub(crate) struct Probe {
    script: Mutex<VecDeque<Step>>,
    written: Mutex<Vec<Vec<u8>>>,
    acquires: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
    fail_acquire: AtomicBool,
    fail_writes: AtomicBool,
    waits_for_input: AtomicBool,
}

impl Probe {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_steps(&self, steps: Vec<Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub(crate) fn fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Report devices as blocking in poll, like the Linux TUN device
    pub(crate) fn wait_for_input(&self, waits: bool) {
        self.waits_for_input.store(waits, Ordering::SeqCst);
    }

    pub(crate) fn device(self: &Arc<Self>) -> Box<dyn TunnelDevice> {
        Box::new(FakeDevice {
            probe: Arc::clone(self),
            closed: false,
        })
    }

    pub(crate) fn provider(self: &Arc<Self>) -> Box<dyn TunnelProvider> {
        Box::new(FakeProvider {
            probe: Arc::clone(self),
        })
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    pub(crate) fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

struct FakeDevice {
    probe: Arc<Probe>,
    closed: bool,
}

impl TunnelDevice for FakeDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        self.probe.reads.fetch_add(1, Ordering::SeqCst);

        let step = self.probe.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Packet(bytes)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            Some(Step::Idle) => Ok(0),
            Some(Step::Interrupted) => Err(io::Error::from(io::ErrorKind::Interrupted)),
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            None => {
                // Nothing queued: block for one poll interval like a real device
                thread::sleep(POLL_INTERVAL);
                Ok(0)
            }
        }
    }

    fn write(&mut self, packet: &[u8]) -> io::Result<()> {
        if self.probe.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted write failure"));
        }
        self.probe.written.lock().unwrap().push(packet.to_vec());
        Ok(())
    }

    fn waits_for_input(&self) -> bool {
        self.probe.waits_for_input.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct FakeProvider {
    probe: Arc<Probe>,
}

impl TunnelProvider for FakeProvider {
    fn acquire(&self, _config: &TunnelConfig) -> Result<Box<dyn TunnelDevice>, TunnelError> {
        if self.probe.fail_acquire.load(Ordering::SeqCst) {
            return Err(TunnelError::Acquire("scripted acquire failure".into()));
        }
        self.probe.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(self.probe.device())
    }
}

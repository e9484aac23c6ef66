//! User Consent
//!
//! Some hosts require the user to approve a tunnel before one can be
//! created. The answer arrives later, out of band, and resumes the start
//! that asked for it through a [`ConsentToken`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether a start may proceed right away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentStatus {
    Granted,
    /// The user has to be asked first
    Required,
}

/// Identifies one pending start awaiting consent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsentToken(pub(crate) u64);

impl fmt::Display for ConsentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consent-{}", self.0)
    }
}

/// Host consent policy
pub trait ConsentGate: Send + Sync {
    fn check(&self) -> ConsentStatus;

    /// Told the user's answer once a prompt resolves
    fn record(&self, _granted: bool) {}
}

/// Never asks
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConsent;

impl ConsentGate for AutoConsent {
    fn check(&self) -> ConsentStatus {
        ConsentStatus::Granted
    }
}

/// Asks until the user grants once, then remembers the grant
#[derive(Debug, Default)]
pub struct RememberedConsent {
    granted: AtomicBool,
}

impl RememberedConsent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget an earlier grant
    pub fn revoke(&self) {
        self.granted.store(false, Ordering::SeqCst);
    }
}

impl ConsentGate for RememberedConsent {
    fn check(&self) -> ConsentStatus {
        if self.granted.load(Ordering::SeqCst) {
            ConsentStatus::Granted
        } else {
            ConsentStatus::Required
        }
    }

    fn record(&self, granted: bool) {
        if granted {
            self.granted.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_consent() {
        assert_eq!(AutoConsent.check(), ConsentStatus::Granted);
    }

    #[test]
    fn test_remembered_consent() {
        let gate = RememberedConsent::new();
        assert_eq!(gate.check(), ConsentStatus::Required);

        gate.record(false);
        assert_eq!(gate.check(), ConsentStatus::Required);

        gate.record(true);
        assert_eq!(gate.check(), ConsentStatus::Granted);

        gate.revoke();
        assert_eq!(gate.check(), ConsentStatus::Required);
    }

    #[test]
    fn test_token_display() {
        assert_eq!(ConsentToken(7).to_string(), "consent-7");
    }
}

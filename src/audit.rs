//! Audit notifications.
//!
//! The relay reports session starts and suspicious handshakes to an [`AuditSink`].
//! Sinks are fire-and-forget: they must not block, and nothing depends on them.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::{Address, CipherKind};

pub trait AuditSink: Send + Sync {
    fn session_started(&self, peer: SocketAddr, target: &Address, method: CipherKind) {
        let _ = (peer, target, method);
    }

    fn suspicious_activity(&self, peer: SocketAddr, activity: &str, detail: &str) {
        let _ = (peer, activity, detail);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {}

/// Emits events on the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn session_started(&self, peer: SocketAddr, target: &Address, method: CipherKind) {
        info!(
            target: "audit",
            event = "session_start",
            %peer,
            %target,
            method = method.name(),
            "session started"
        );
    }

    fn suspicious_activity(&self, peer: SocketAddr, activity: &str, detail: &str) {
        warn!(
            target: "audit",
            event = "suspicious_activity",
            %peer,
            activity,
            detail,
            "suspicious activity"
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records events for assertions.
    #[derive(Default)]
    pub struct RecordingAudit {
        pub events: Mutex<Vec<String>>,
    }

    impl AuditSink for RecordingAudit {
        fn session_started(&self, _peer: SocketAddr, target: &Address, _method: CipherKind) {
            self.events.lock().unwrap().push(format!("start {}", target));
        }

        fn suspicious_activity(&self, _peer: SocketAddr, activity: &str, _detail: &str) {
            self.events.lock().unwrap().push(format!("suspicious {}", activity));
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let target: Address = "example.com:80".parse().unwrap();
        NoopAudit.session_started(peer, &target, CipherKind::AES_256_GCM);
        NoopAudit.suspicious_activity(peer, "probe", "bad salt");
        TracingAudit.session_started(peer, &target, CipherKind::AES_256_GCM);
        TracingAudit.suspicious_activity(peer, "probe", "bad salt");
    }

    #[test]
    fn test_recording_audit() {
        let audit = RecordingAudit::default();
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        audit.session_started(peer, &"1.2.3.4:80".parse().unwrap(), CipherKind::AES_256_GCM);
        audit.suspicious_activity(peer, "handshake_error", "authentication failed");
        assert_eq!(
            *audit.events.lock().unwrap(),
            vec!["start 1.2.3.4:80", "suspicious handshake_error"]
        );
    }
}

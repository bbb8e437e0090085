//! Fan-out broker for Banter.
//!
//! The broker delivers one published frame to every current member of a
//! group, optionally excluding the publisher's own connection. Delivery is
//! best-effort per member: a failed enqueue never aborts delivery to the
//! remaining members.

use std::sync::Arc;

use banter_protocol::ServerFrame;
use tracing::{debug, trace, warn};

use crate::registry::GroupRegistry;

/// Outcome of one fan-out dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Members whose mailbox accepted the frame.
    pub delivered: usize,
    /// Members whose mailbox was already closed.
    pub failed: usize,
}

/// The fan-out broker.
///
/// Dispatch holds the registry's exclusive entry for the target group, so a
/// concurrent join or leave is either fully included or fully excluded, and
/// frames published to one group reach every member in publish order even
/// with multiple concurrent publishers.
pub struct FanoutBroker {
    registry: Arc<GroupRegistry>,
}

impl FanoutBroker {
    /// Create a broker over a registry.
    #[must_use]
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }

    /// Get the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Publish a frame to every member of `group_id` except `exclude`.
    ///
    /// Publishing to a group that does not exist delivers to nobody; that is
    /// the normal case for notifications to offline users.
    pub fn publish(
        &self,
        group_id: &str,
        frame: &ServerFrame,
        exclude: Option<&str>,
    ) -> FanoutReport {
        let report = self
            .registry
            .with_group(group_id, |group| {
                let mut report = FanoutReport::default();
                for (conn_id, mailbox) in group.iter() {
                    if exclude == Some(conn_id) {
                        continue;
                    }
                    if mailbox.send(frame.clone()).is_ok() {
                        report.delivered += 1;
                    } else {
                        // The member's session is tearing down; its leave
                        // will reach the registry shortly.
                        warn!(
                            group = %group_id,
                            connection = %conn_id,
                            "Dropped frame for closed connection"
                        );
                        report.failed += 1;
                    }
                }
                report
            })
            .unwrap_or_else(|| {
                debug!(group = %group_id, "Publish to non-existent group");
                FanoutReport::default()
            });

        trace!(
            group = %group_id,
            delivered = report.delivered,
            failed = report.failed,
            "Fan-out dispatch"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Mailbox;
    use banter_protocol::{Event, ServerFrame};
    use tokio::sync::mpsc;

    fn mailbox() -> (Mailbox, mpsc::UnboundedReceiver<ServerFrame>) {
        mpsc::unbounded_channel()
    }

    fn broker() -> FanoutBroker {
        FanoutBroker::new(Arc::new(GroupRegistry::new()))
    }

    #[test]
    fn test_publish_excludes_sender() {
        let broker = broker();
        let (tx_a, mut rx_a) = mailbox();
        let (tx_b, mut rx_b) = mailbox();
        let (tx_c, mut rx_c) = mailbox();

        broker.registry().join("general", "conn-a", tx_a).unwrap();
        broker.registry().join("general", "conn-b", tx_b).unwrap();
        broker.registry().join("general", "conn-c", tx_c).unwrap();

        let frame = ServerFrame::relay("hi", "alice");
        let report = broker.publish("general", &frame, Some("conn-a"));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), frame);
        assert_eq!(rx_c.try_recv().unwrap(), frame);

        // Delivered exactly once
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_publish_no_exclusion() {
        let broker = broker();
        let (tx, mut rx) = mailbox();
        broker.registry().join("feed", "conn-1", tx).unwrap();

        let frame = ServerFrame::Event(Event::new_message("bob", "hey"));
        let report = broker.publish("feed", &frame, None);
        assert_eq!(report.delivered, 1);
        assert_eq!(rx.try_recv().unwrap(), frame);
    }

    #[test]
    fn test_publish_missing_group_delivers_nothing() {
        let broker = broker();
        let report = broker.publish("nowhere", &ServerFrame::relay("x", "y"), None);
        assert_eq!(report, FanoutReport::default());
    }

    #[test]
    fn test_closed_member_does_not_abort_delivery() {
        let broker = broker();
        let (tx_a, rx_a) = mailbox();
        let (tx_b, mut rx_b) = mailbox();

        broker.registry().join("general", "conn-a", tx_a).unwrap();
        broker.registry().join("general", "conn-b", tx_b).unwrap();
        drop(rx_a); // conn-a's session died without leaving yet

        let frame = ServerFrame::relay("hi", "alice");
        let report = broker.publish("general", &frame, None);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(rx_b.try_recv().unwrap(), frame);
    }

    #[test]
    fn test_publish_order_preserved() {
        let broker = broker();
        let (tx, mut rx) = mailbox();
        broker.registry().join("general", "conn-1", tx).unwrap();

        for i in 0..10 {
            let frame = ServerFrame::relay(format!("m{i}"), "alice");
            broker.publish("general", &frame, None);
        }

        for i in 0..10 {
            match rx.try_recv().unwrap() {
                ServerFrame::Relay { message, .. } => assert_eq!(message, format!("m{i}")),
                other => panic!("Unexpected frame: {other:?}"),
            }
        }
    }
}

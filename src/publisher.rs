use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::DriftReport;

/// Message pushed to report stream subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Connected {
        timestamp: DateTime<Utc>,
        message: String,
    },
    DriftReport {
        timestamp: DateTime<Utc>,
        data: Box<DriftReport>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl StreamMessage {
    pub fn connected() -> Self {
        StreamMessage::Connected {
            timestamp: Utc::now(),
            message: "Connected to drift report stream".to_string(),
        }
    }

    pub fn heartbeat() -> Self {
        StreamMessage::Heartbeat { timestamp: Utc::now() }
    }

    pub fn pong() -> Self {
        StreamMessage::Pong { timestamp: Utc::now() }
    }
}

/// Best-effort fan-out of finished reports.
///
/// Publishing never waits on subscribers: a subscriber that falls more than
/// the channel capacity behind skips the oldest reports.
#[derive(Clone)]
pub struct ReportPublisher {
    broadcast_tx: broadcast::Sender<StreamMessage>,
}

impl ReportPublisher {
    pub fn new(channel_capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(channel_capacity.max(1));
        Self { broadcast_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Push one report; returns how many subscribers it reached
    pub fn publish(&self, report: &DriftReport) -> usize {
        let message = StreamMessage::DriftReport {
            timestamp: report.report_timestamp,
            data: Box::new(report.clone()),
        };
        // No subscribers is not an error
        let reached = self.broadcast_tx.send(message).unwrap_or(0);
        debug!(subscribers = reached, "Published drift report");
        reached
    }

    pub fn receiver_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }
}

impl Default for ReportPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use tokio::sync::broadcast::error::RecvError;

    fn make_report(total: usize) -> DriftReport {
        let mut report = fixtures::empty_report(Utc::now(), "v1");
        report.total_predictions = total;
        report
    }

    fn total_of(message: StreamMessage) -> usize {
        match message {
            StreamMessage::DriftReport { data, .. } => data.total_predictions,
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = ReportPublisher::new(4);
        assert_eq!(publisher.publish(&make_report(1)), 0);
    }

    #[tokio::test]
    async fn test_fan_out() {
        let publisher = ReportPublisher::new(8);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        assert_eq!(publisher.receiver_count(), 2);

        assert_eq!(publisher.publish(&make_report(42)), 2);
        assert_eq!(total_of(a.recv().await.unwrap()), 42);
        assert_eq!(total_of(b.recv().await.unwrap()), 42);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips() {
        let publisher = ReportPublisher::new(2);
        let mut slow = publisher.subscribe();

        for total in 0..5 {
            publisher.publish(&make_report(total));
        }

        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(total_of(slow.recv().await.unwrap()), 3);
        assert_eq!(total_of(slow.recv().await.unwrap()), 4);
    }

    #[test]
    fn test_message_tags() {
        let json = serde_json::to_value(StreamMessage::pong()).unwrap();
        assert_eq!(json["type"], "pong");

        let json = serde_json::to_value(StreamMessage::DriftReport {
            timestamp: Utc::now(),
            data: Box::new(make_report(7)),
        })
        .unwrap();
        assert_eq!(json["type"], "drift_report");
        assert_eq!(json["data"]["total_predictions"], 7);
    }
}

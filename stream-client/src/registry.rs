//! Subscription registry and connection-forming policy
//!
//! The registry maps normalized stream URNs to their subscriptions and
//! sequencers. Whether a connection should exist at all is decided from
//! the registry's size by [`connection_policy`].

use crate::error::StreamError;
use crate::sequencer::Sequencer;
use crate::session::Command;
use crate::state::ConnectionState;
use crate::subscription::{Subscription, SubscriptionEvent};
use std::collections::BTreeMap;
use stream_protocol::{EventId, StreamPosition, StreamUrn};
use tokio::sync::mpsc;

/// What the session should do after the registry changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionPolicy {
    /// Nothing registered but a connection exists or is being formed
    Disconnect,
    /// Subscriptions registered while idle
    Connect,
    /// Connected; send an updated aggregate subscribe
    Subscribe,
    /// A transition is in flight; it will re-evaluate when it lands
    Wait,
}

pub(crate) fn connection_policy(registered: usize, state: ConnectionState) -> ConnectionPolicy {
    match (registered, state) {
        (0, ConnectionState::Disconnected) => ConnectionPolicy::Wait,
        (0, _) => ConnectionPolicy::Disconnect,
        (_, ConnectionState::Disconnected) => ConnectionPolicy::Connect,
        (_, ConnectionState::Connected | ConnectionState::Streaming) => ConnectionPolicy::Subscribe,
        _ => ConnectionPolicy::Wait,
    }
}

/// Session-side state for one subscription
pub(crate) struct SubscriptionEntry {
    handle: Subscription,
    pub(crate) sequencer: Sequencer,
    /// Start already emitted on the current connection
    acked: bool,
}

impl SubscriptionEntry {
    pub(crate) fn handle(&self) -> &Subscription {
        &self.handle
    }

    pub(crate) fn is_acked(&self) -> bool {
        self.acked
    }

    pub(crate) fn start(&mut self) {
        self.acked = true;
        self.handle.emit(SubscriptionEvent::Start);
    }

    pub(crate) fn fail(&self, error: StreamError) {
        self.handle.emit(SubscriptionEvent::Error(error));
    }

    pub(crate) fn rewind_failed(&mut self, reason: String) {
        self.sequencer.reset();
        self.fail(StreamError::RewindFailed {
            stream_id: self.handle.key().to_string(),
            reason,
        });
    }

    pub(crate) fn position(&self) -> StreamPosition {
        self.sequencer.position(self.handle.urn().as_str())
    }

    pub(crate) fn finish(&self) {
        self.handle.finish();
    }
}

/// Summary of the registry, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegistryStats {
    pub total: usize,
    pub started: usize,
    pub rewinding: usize,
}

impl std::fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} subscriptions ({} started, {} rewinding)",
            self.total, self.started, self.rewinding
        )
    }
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: BTreeMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `urn`, or return the existing subscription for it.
    ///
    /// The flag is true when a new subscription was created.
    pub(crate) fn register(
        &mut self,
        urn: StreamUrn,
        resume_seq: Option<u64>,
        resume_event_id: Option<EventId>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> (Subscription, bool) {
        let key = urn.normalized();
        if let Some(entry) = self.entries.get(&key) {
            return (entry.handle.clone(), false);
        }

        let handle = Subscription::new(urn, commands);
        self.entries.insert(
            key,
            SubscriptionEntry {
                handle: handle.clone(),
                sequencer: Sequencer::resume_at(resume_seq, resume_event_id),
                acked: false,
            },
        );
        (handle, true)
    }

    pub(crate) fn get_mut(&mut self, stream_id: &str) -> Option<&mut SubscriptionEntry> {
        self.entries.get_mut(&StreamUrn::from(stream_id).normalized())
    }

    pub(crate) fn remove(&mut self, stream_id: &str) -> Option<SubscriptionEntry> {
        self.entries.remove(&StreamUrn::from(stream_id).normalized())
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SubscriptionEntry> {
        self.entries.values_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resume points of every registered stream, for an aggregate subscribe
    pub(crate) fn positions(&self) -> Vec<StreamPosition> {
        self.entries.values().map(SubscriptionEntry::position).collect()
    }

    /// A new connection has to acknowledge every subscription again
    pub(crate) fn reset_acks(&mut self) {
        for entry in self.entries.values_mut() {
            entry.acked = false;
        }
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        RegistryStats {
            total: self.entries.len(),
            started: self.entries.values().filter(|e| e.acked).count(),
            rewinding: self
                .entries
                .values()
                .filter(|e| e.sequencer.is_rewinding())
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::Observable;
    use rstest::rstest;

    fn channel() -> mpsc::UnboundedSender<Command> {
        mpsc::unbounded_channel().0
    }

    #[rstest]
    #[case(0, ConnectionState::Disconnected, ConnectionPolicy::Wait)]
    #[case(0, ConnectionState::Streaming, ConnectionPolicy::Disconnect)]
    #[case(0, ConnectionState::Reconnecting, ConnectionPolicy::Disconnect)]
    #[case(1, ConnectionState::Disconnected, ConnectionPolicy::Connect)]
    #[case(2, ConnectionState::Connected, ConnectionPolicy::Subscribe)]
    #[case(2, ConnectionState::Streaming, ConnectionPolicy::Subscribe)]
    #[case(1, ConnectionState::Connecting, ConnectionPolicy::Wait)]
    #[case(1, ConnectionState::Disconnecting, ConnectionPolicy::Wait)]
    fn test_connection_policy(
        #[case] registered: usize,
        #[case] state: ConnectionState,
        #[case] expected: ConnectionPolicy,
    ) {
        assert_eq!(connection_policy(registered, state), expected);
    }

    #[test]
    fn test_register_is_idempotent_across_classifiers() {
        let mut registry = SubscriptionRegistry::new();
        let (first, created) = registry.register("urn:a:user=1".into(), None, None, channel());
        assert!(created);
        let (second, created) =
            registry.register("urn:a:user=1:personalStream".into(), None, None, channel());
        assert!(!created);

        assert!(first.same_as(&second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_positions_carry_resume_points() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("urn:a".into(), Some(5), Some(EventId::from(50_u64)), channel());
        registry.register("urn:b".into(), None, None, channel());

        assert_eq!(
            registry.positions(),
            vec![
                StreamPosition::at("urn:a", Some(5), Some(EventId::from(50_u64))),
                StreamPosition::new("urn:b"),
            ]
        );
    }

    #[test]
    fn test_lookup_normalizes_stream_id() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("urn:a:user=1".into(), None, None, channel());

        assert!(registry.get_mut("urn:a:user=1:personalStream").is_some());
        assert!(registry.get_mut("urn:unknown").is_none());
        assert!(registry.remove("urn:a:user=1").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rewind_failed_resets_and_reports() {
        let mut registry = SubscriptionRegistry::new();
        let (handle, _) = registry.register("urn:a".into(), Some(3), None, channel());
        let mut events = handle.events().unwrap();

        let entry = registry.get_mut("urn:a").unwrap();
        entry.sequencer.ingest(6, None);
        entry.rewind_failed("too old".to_string());

        assert_eq!(entry.sequencer.last_sequence(), None);
        assert!(!entry.sequencer.is_rewinding());
        match events.try_recv() {
            Some(SubscriptionEvent::Error(error)) => {
                assert_eq!(error.kind(), crate::error::ErrorKind::RewindFailed)
            }
            other => panic!("expected rewind error, got {:?}", other),
        }
    }

    #[test]
    fn test_acks_and_stats() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("urn:a".into(), None, None, channel());
        registry.register("urn:b".into(), None, None, channel());

        registry.get_mut("urn:a").unwrap().start();
        assert_eq!(registry.stats().started, 1);
        assert_eq!(
            registry.stats().to_string(),
            "2 subscriptions (1 started, 0 rewinding)"
        );

        registry.reset_acks();
        assert!(registry.iter_mut().all(|entry| !entry.is_acked()));
    }
}

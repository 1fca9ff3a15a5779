//! Per-community channel gating.
//!
//! Each community has at most one active channel. Only messages in that
//! channel may receive generated replies. Losing the gateway connection for
//! a community clears its active channel; regaining it does not restore one.

use kanna_core::{ChannelId, CommunityId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// Gating state of a single community.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No channel may receive replies.
    #[default]
    Inactive,
    /// Only this channel may receive replies.
    Active(ChannelId),
}

impl SessionState {
    /// Returns the active channel, if any.
    #[must_use]
    pub fn active_channel(&self) -> Option<&ChannelId> {
        match self {
            Self::Active(channel) => Some(channel),
            Self::Inactive => None,
        }
    }

    /// Returns true if a channel is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    /// Returns true if `channel_id` is the active channel.
    #[must_use]
    pub fn allows(&self, channel_id: &ChannelId) -> bool {
        self.active_channel() == Some(channel_id)
    }
}

/// Tracks which channel, if any, is allowed to talk back in each community.
///
/// Every operation takes one exclusive (or shared, for reads) section over
/// the state map, so concurrent events for a community never interleave.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<CommunityId, SessionState>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `channel_id` the community's active channel.
    ///
    /// Replaces any previously active channel, which is returned.
    pub fn activate(
        &self,
        community_id: &CommunityId,
        channel_id: &ChannelId,
    ) -> Option<ChannelId> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let previous = sessions.insert(
            community_id.clone(),
            SessionState::Active(channel_id.clone()),
        );
        let previous = previous.and_then(|state| state.active_channel().cloned());

        info!(
            community = %community_id,
            channel = %channel_id,
            previous = ?previous.as_ref().map(ChannelId::as_str),
            "activated channel"
        );
        previous
    }

    /// Returns true iff `channel_id` is the community's active channel.
    #[must_use]
    pub fn is_allowed(&self, community_id: &CommunityId, channel_id: &ChannelId) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(community_id)
            .is_some_and(|state| state.allows(channel_id))
    }

    /// Clears the community's active channel, returning it if one was set.
    pub fn deactivate(&self, community_id: &CommunityId) -> Option<ChannelId> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let state = sessions.get_mut(community_id)?;
        let previous = std::mem::take(state);
        match previous {
            SessionState::Active(channel) => {
                info!(community = %community_id, channel = %channel, "deactivated channel");
                Some(channel)
            }
            SessionState::Inactive => None,
        }
    }

    /// Applies a connectivity notification for the community.
    ///
    /// Losing connectivity deactivates; regaining it changes nothing.
    pub fn on_connectivity_change(&self, community_id: &CommunityId, still_connected: bool) {
        if still_connected {
            debug!(community = %community_id, "connectivity regained, gating unchanged");
            return;
        }
        if let Some(channel) = self.deactivate(community_id) {
            info!(
                community = %community_id,
                channel = %channel,
                "connectivity lost, channel released"
            );
        }
    }

    /// Returns the community's current state.
    #[must_use]
    pub fn state(&self, community_id: &CommunityId) -> SessionState {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(community_id).cloned().unwrap_or_default()
    }

    /// Returns the community's active channel, if any.
    #[must_use]
    pub fn active_channel(&self, community_id: &CommunityId) -> Option<ChannelId> {
        self.state(community_id).active_channel().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids() -> (CommunityId, ChannelId, ChannelId) {
        (
            CommunityId::from("g1"),
            ChannelId::from("c1"),
            ChannelId::from("c2"),
        )
    }

    #[test]
    fn unknown_community_is_not_allowed() {
        let registry = SessionRegistry::new();
        let (g, c1, _) = ids();

        assert!(!registry.is_allowed(&g, &c1));
        assert_eq!(registry.state(&g), SessionState::Inactive);
    }

    #[test]
    fn activate_allows_only_that_channel() {
        let registry = SessionRegistry::new();
        let (g, c1, c2) = ids();

        assert_eq!(registry.activate(&g, &c1), None);
        assert!(registry.is_allowed(&g, &c1));
        assert!(!registry.is_allowed(&g, &c2));
        assert!(!registry.is_allowed(&CommunityId::from("g2"), &c1));
    }

    #[test]
    fn activate_switches_channel() {
        let registry = SessionRegistry::new();
        let (g, c1, c2) = ids();

        registry.activate(&g, &c1);
        assert_eq!(registry.activate(&g, &c2), Some(c1.clone()));

        assert!(!registry.is_allowed(&g, &c1));
        assert!(registry.is_allowed(&g, &c2));
    }

    #[test]
    fn activate_is_idempotent() {
        let registry = SessionRegistry::new();
        let (g, c1, _) = ids();

        registry.activate(&g, &c1);
        registry.activate(&g, &c1);
        assert_eq!(registry.state(&g), SessionState::Active(c1));
    }

    #[test]
    fn deactivate_clears_and_is_idempotent() {
        let registry = SessionRegistry::new();
        let (g, c1, _) = ids();

        assert_eq!(registry.deactivate(&g), None);
        registry.activate(&g, &c1);
        assert_eq!(registry.deactivate(&g), Some(c1.clone()));
        assert_eq!(registry.deactivate(&g), None);
        assert!(!registry.is_allowed(&g, &c1));
        assert_eq!(registry.state(&g), SessionState::Inactive);
    }

    #[test]
    fn connectivity_loss_blocks_every_channel() {
        let registry = SessionRegistry::new();
        let (g, c1, c2) = ids();

        registry.activate(&g, &c1);
        registry.on_connectivity_change(&g, false);

        assert!(!registry.is_allowed(&g, &c1));
        assert!(!registry.is_allowed(&g, &c2));
    }

    #[test]
    fn connectivity_regain_does_not_reactivate() {
        let registry = SessionRegistry::new();
        let (g, c1, _) = ids();

        registry.activate(&g, &c1);
        registry.on_connectivity_change(&g, true);
        assert!(registry.is_allowed(&g, &c1));

        registry.on_connectivity_change(&g, false);
        registry.on_connectivity_change(&g, true);
        assert!(!registry.is_allowed(&g, &c1));
        assert_eq!(registry.active_channel(&g), None);
    }

    #[test]
    fn communities_are_independent() {
        let registry = SessionRegistry::new();
        let (g1, c1, c2) = ids();
        let g2 = CommunityId::from("g2");

        registry.activate(&g1, &c1);
        registry.activate(&g2, &c2);
        registry.deactivate(&g1);

        assert!(!registry.is_allowed(&g1, &c1));
        assert!(registry.is_allowed(&g2, &c2));
    }

    #[test]
    fn concurrent_activations_leave_exactly_one_channel() {
        let registry = Arc::new(SessionRegistry::new());
        let g = CommunityId::from("g1");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let g = g.clone();
                std::thread::spawn(move || {
                    registry.activate(&g, &ChannelId::new(format!("c{i}")));
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }

        let allowed = (0..8)
            .filter(|i| registry.is_allowed(&g, &ChannelId::new(format!("c{i}"))))
            .count();
        assert_eq!(allowed, 1);
    }
}

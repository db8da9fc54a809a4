// Per-channel commitment state machine for a bidirectional off-chain
// payment protocol.
//
// Written in 2024 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Persistence contract: a channel must survive a restart without
//! losing revocation secrets or in-flight HTLC state, and pending
//! upstream relay obligations must be recoverable even if the node
//! crashes between settling a downstream HTLC and forwarding its
//! resolution upstream.

use std::collections::BTreeMap;

use crate::channel::ChannelState;
use crate::primitives::{ChannelId, HtlcId};
use crate::wire::PaymentPreimage;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum StorageError {
    /// no channel is persisted under id {0}
    NotFound(ChannelId),
}

/// What must be durably recorded about a resolved HTLC before its
/// resolution can be safely relayed upstream, in case the process
/// dies before the relay completes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PendingRelay {
    Fulfilled { htlc_id: HtlcId, payment_preimage: PaymentPreimage },
    Failed { htlc_id: HtlcId },
}

/// Storage contract a channel relies on to survive a restart.
///
/// Implementations must make `put_channel` durable before the call
/// returns: the state machine calls it immediately after folding a new
/// commitment, and assumes on recovery that the last successful
/// `put_channel` reflects reality.
pub trait ChannelStorage {
    fn get_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<ChannelState, StorageError>;

    fn put_channel(
        &mut self,
        channel_id: ChannelId,
        state: ChannelState,
    ) -> Result<(), StorageError>;

    fn add_pending_relay(
        &mut self,
        channel_id: ChannelId,
        relay: PendingRelay,
    ) -> Result<(), StorageError>;

    fn remove_pending_relay(
        &mut self,
        channel_id: ChannelId,
        htlc_id: HtlcId,
    ) -> Result<(), StorageError>;

    fn list_pending_relay(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<PendingRelay>, StorageError>;
}

/// In-memory [`ChannelStorage`] for tests and single-process
/// deployments; durability is whatever the process's lifetime
/// provides.
#[derive(Default)]
pub struct MemoryStorage {
    channels: BTreeMap<ChannelId, ChannelState>,
    pending_relay: BTreeMap<ChannelId, Vec<PendingRelay>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelStorage for MemoryStorage {
    fn get_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<ChannelState, StorageError> {
        self.channels
            .get(&channel_id)
            .cloned()
            .ok_or(StorageError::NotFound(channel_id))
    }

    fn put_channel(
        &mut self,
        channel_id: ChannelId,
        state: ChannelState,
    ) -> Result<(), StorageError> {
        self.channels.insert(channel_id, state);
        Ok(())
    }

    fn add_pending_relay(
        &mut self,
        channel_id: ChannelId,
        relay: PendingRelay,
    ) -> Result<(), StorageError> {
        self.pending_relay.entry(channel_id).or_default().push(relay);
        Ok(())
    }

    fn remove_pending_relay(
        &mut self,
        channel_id: ChannelId,
        htlc_id: HtlcId,
    ) -> Result<(), StorageError> {
        if let Some(list) = self.pending_relay.get_mut(&channel_id) {
            list.retain(|relay| match relay {
                PendingRelay::Fulfilled { htlc_id: id, .. }
                | PendingRelay::Failed { htlc_id: id } => *id != htlc_id,
            });
        }
        Ok(())
    }

    fn list_pending_relay(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<PendingRelay>, StorageError> {
        Ok(self.pending_relay.get(&channel_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use amplify::DumbDefault;

    use super::*;

    #[test]
    fn roundtrips_channel_state() {
        let mut storage = MemoryStorage::new();
        let id = ChannelId::dumb_default();
        let state = ChannelState::dumb_default();
        storage.put_channel(id, state.clone()).unwrap();
        assert_eq!(storage.get_channel(id).unwrap().stage, state.stage);
    }

    #[test]
    fn pending_relay_add_and_remove() {
        let mut storage = MemoryStorage::new();
        let id = ChannelId::dumb_default();
        storage
            .add_pending_relay(
                id,
                PendingRelay::Failed { htlc_id: 7 },
            )
            .unwrap();
        assert_eq!(storage.list_pending_relay(id).unwrap().len(), 1);
        storage.remove_pending_relay(id, 7).unwrap();
        assert!(storage.list_pending_relay(id).unwrap().is_empty());
    }

    #[test]
    fn missing_channel_is_an_error() {
        let storage = MemoryStorage::new();
        let id = ChannelId::dumb_default();
        assert!(matches!(
            storage.get_channel(id),
            Err(StorageError::NotFound(_))
        ));
    }
}

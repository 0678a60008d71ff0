//! A live client session: hub connection, cache, and accessible-set view.
//!
//! Every change to the cache (initial fetch, pushed event, confirmed local
//! mutation) re-runs the projection. When the set of accessible lists moves,
//! the new set is announced to the hub so room membership follows access.

use std::collections::BTreeSet;

use taskshare_proto::ids::{ListId, UserId};
use taskshare_proto::wire::{HubEvent, Operation, Payload};

use crate::cache::{Cache, CacheUpdate};
use crate::client::{ClientError, HubClient};
use crate::projector::{AccessibleSet, project};

/// A connected client with a live cache.
pub struct Session {
    client: HubClient,
    cache: Cache,
    view: AccessibleSet,
    announced: Option<BTreeSet<ListId>>,
}

impl Session {
    /// Fetches the initial snapshot and subscribes to every accessible list.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the snapshot or subscription round trip
    /// fails.
    pub async fn start(client: HubClient) -> Result<Self, ClientError> {
        let mut session = Self {
            cache: Cache::new(client.user_id().clone()),
            client,
            view: AccessibleSet::default(),
            announced: None,
        };
        session.reload().await?;
        Ok(session)
    }

    /// Replaces the cache with a fresh snapshot from the hub.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the snapshot cannot be fetched.
    pub async fn reload(&mut self) -> Result<(), ClientError> {
        match self.client.request(Operation::Snapshot).await? {
            Payload::Snapshot(snapshot) => {
                self.update(&CacheUpdate::Loaded(snapshot)).await
            }
            other => Err(ClientError::Protocol(format!(
                "expected snapshot, got {other:?}"
            ))),
        }
    }

    /// Performs `op` and folds the confirmed payload into the cache.
    ///
    /// # Errors
    ///
    /// Returns the hub's failure or a transport error; the cache is left
    /// untouched on failure.
    pub async fn perform(&mut self, op: Operation) -> Result<Payload, ClientError> {
        let payload = self.client.request(op).await?;
        self.update(&CacheUpdate::Confirmed(payload.clone())).await?;
        Ok(payload)
    }

    /// Waits for the next hub event and folds it into the cache.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] when the hub goes away.
    pub async fn next_change(&mut self) -> Result<HubEvent, ClientError> {
        let event = self.client.next_event().await?;
        self.update(&CacheUpdate::Event(event.clone())).await?;
        Ok(event)
    }

    /// The authenticated user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        self.client.user_id()
    }

    /// Current cache snapshot.
    #[must_use]
    pub const fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Current accessible-set projection.
    #[must_use]
    pub const fn view(&self) -> &AccessibleSet {
        &self.view
    }

    /// The underlying hub connection.
    #[must_use]
    pub const fn client(&self) -> &HubClient {
        &self.client
    }

    /// Closes the hub connection.
    pub async fn close(self) {
        self.client.close().await;
    }

    async fn update(&mut self, update: &CacheUpdate) -> Result<(), ClientError> {
        self.cache = self.cache.apply(update);
        self.view = project(&self.cache, self.client.user_id());

        let wanted = self.view.subscriptions();
        if self.announced.as_ref() == Some(&wanted) {
            return Ok(());
        }
        let ack = self.client.subscribe(wanted.iter().copied()).await?;
        tracing::debug!(
            joined = ack.joined.len(),
            left = ack.left.len(),
            "list subscriptions updated"
        );
        self.announced = Some(wanted);
        Ok(())
    }
}

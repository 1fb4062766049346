//! Room membership index.
//!
//! `<ns>:rooms:<room>` holds the members of a room and
//! `<ns>:memberships:<id>` the rooms of a connection. Both sides are
//! written in one transaction; concurrent joins and leaves from other
//! processes resolve through the datastore's idempotent set operations.
//! The empty room name is the default room.

use std::collections::HashSet;
use std::sync::Arc;

use crate::datastore::{Command, Datastore};
use crate::store::{KeyNamespacer, StoreResult};

pub struct RoomIndex {
    keys: KeyNamespacer,
    datastore: Arc<dyn Datastore>,
}

impl RoomIndex {
    pub fn new(keys: KeyNamespacer, datastore: Arc<dyn Datastore>) -> Self {
        Self { keys, datastore }
    }

    pub async fn join(&self, id: &str, room: &str) -> StoreResult<()> {
        self.datastore
            .exec_atomic(vec![
                Command::sadd(self.keys.room(room), id),
                Command::sadd(self.keys.memberships(id), room),
            ])
            .await?;
        tracing::debug!(id = %id, room = %room, "Joined room");
        Ok(())
    }

    /// Leaving a room the id is not in succeeds.
    pub async fn leave(&self, id: &str, room: &str) -> StoreResult<()> {
        self.datastore
            .exec_atomic(vec![
                Command::srem(self.keys.room(room), id),
                Command::srem(self.keys.memberships(id), room),
            ])
            .await?;
        tracing::debug!(id = %id, room = %room, "Left room");
        Ok(())
    }

    /// Snapshot; may be stale as soon as it returns.
    pub async fn members_of(&self, room: &str) -> StoreResult<HashSet<String>> {
        Ok(self.datastore.smembers(&self.keys.room(room)).await?)
    }

    pub async fn rooms_of(&self, id: &str) -> StoreResult<HashSet<String>> {
        Ok(self.datastore.smembers(&self.keys.memberships(id)).await?)
    }

    /// Remove the id from every room it joined; returns how many rooms.
    pub async fn leave_all(&self, id: &str) -> StoreResult<usize> {
        let rooms = self.rooms_of(id).await?;

        let mut commands: Vec<Command> = rooms
            .iter()
            .map(|room| Command::srem(self.keys.room(room), id))
            .collect();
        commands.push(Command::del(self.keys.memberships(id)));
        self.datastore.exec_atomic(commands).await?;

        if !rooms.is_empty() {
            tracing::debug!(id = %id, rooms = rooms.len(), "Left all rooms");
        }
        Ok(rooms.len())
    }
}

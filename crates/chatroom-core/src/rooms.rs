//! Registry of rooms for one client.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
    api::Requester, channel::RealtimeClient, config::RoomOptions, env::Environment,
    error::ChatError, room::Room,
};

struct Registry<E: Environment> {
    live: HashMap<String, Arc<Room<E>>>,
    /// Rooms whose release is still running. Their channel is not free yet.
    releasing: HashMap<String, Arc<Room<E>>>,
}

/// Hands out one [`Room`] per name.
pub struct Rooms<E: Environment> {
    env: E,
    realtime: Arc<dyn RealtimeClient>,
    requester: Arc<dyn Requester>,
    registry: Mutex<Registry<E>>,
}

impl<E: Environment> Rooms<E> {
    /// Create an empty registry.
    pub fn new(env: E, realtime: Arc<dyn RealtimeClient>, requester: Arc<dyn Requester>) -> Self {
        Self {
            env,
            realtime,
            requester,
            registry: Mutex::new(Registry { live: HashMap::new(), releasing: HashMap::new() }),
        }
    }

    /// Get or create the room `name`.
    ///
    /// Repeat calls return the same room. Asking for an existing room with
    /// different options fails. While a previous room of the same name is
    /// still releasing, the call waits for that release before creating the
    /// replacement.
    pub async fn get(&self, name: &str, options: RoomOptions) -> Result<Arc<Room<E>>, ChatError> {
        loop {
            let pending = {
                let mut registry = self.registry.lock();

                if let Some(room) = registry.live.get(name) {
                    if room.options() != &options {
                        return Err(ChatError::InvalidArgument(format!(
                            "room {name} already exists with different options"
                        )));
                    }
                    return Ok(Arc::clone(room));
                }

                match registry.releasing.get(name) {
                    Some(pending) => Arc::clone(pending),
                    None => {
                        let room = Arc::new(Room::new(
                            self.env.clone(),
                            name,
                            options,
                            self.realtime.as_ref(),
                            Arc::clone(&self.requester),
                        )?);
                        registry.live.insert(name.to_string(), Arc::clone(&room));
                        return Ok(room);
                    },
                }
            };

            tracing::debug!(room = name, "waiting for previous room to finish releasing");
            // Releases are serialized per room, so this returns once the
            // running release has completed.
            pending.release().await;
            self.forget_released(name, &pending);
        }
    }

    /// Release the room `name` and forget it. Unknown names are ignored.
    pub async fn release(&self, name: &str) {
        let room = {
            let mut registry = self.registry.lock();
            let room = registry.live.remove(name);
            if let Some(room) = &room {
                registry.releasing.insert(name.to_string(), Arc::clone(room));
            }
            room.or_else(|| registry.releasing.get(name).cloned())
        };

        match room {
            Some(room) => {
                room.release().await;
                self.forget_released(name, &room);
            },
            None => tracing::debug!(room = name, "release of unknown room ignored"),
        }
    }

    fn forget_released(&self, name: &str, room: &Arc<Room<E>>) {
        let mut registry = self.registry.lock();
        if registry.releasing.get(name).is_some_and(|pending| Arc::ptr_eq(pending, room)) {
            registry.releasing.remove(name);
        }
    }

    /// Number of live rooms.
    pub fn count(&self) -> usize {
        self.registry.lock().live.len()
    }

    /// Identity of the local client.
    pub fn client_id(&self) -> String {
        self.realtime.client_id()
    }
}

impl<E: Environment> fmt::Debug for Rooms<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("Rooms")
            .field("live", &registry.live.keys().collect::<Vec<_>>())
            .field("releasing", &registry.releasing.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

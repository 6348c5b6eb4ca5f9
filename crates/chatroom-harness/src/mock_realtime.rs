//! In-memory realtime client handing out [`MockChannel`]s.

use std::{collections::HashMap, fmt, sync::Arc};

use chatroom_core::{Channel, ChannelOptions, RealtimeClient};
use parking_lot::Mutex;

use crate::mock_channel::MockChannel;

/// Realtime client whose channels are [`MockChannel`]s.
///
/// Asking twice for the same name returns the same channel until it has been
/// released.
pub struct MockRealtime {
    client_id: String,
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
}

impl MockRealtime {
    /// Client identified as `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), channels: Mutex::new(HashMap::new()) }
    }

    /// The mock behind channel `name`, if it was ever requested.
    pub fn mock_channel(&self, name: &str) -> Option<Arc<MockChannel>> {
        self.channels.lock().get(name).cloned()
    }

    /// Number of channels handed out and not replaced.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

impl RealtimeClient for MockRealtime {
    fn client_id(&self) -> String {
        self.client_id.clone()
    }

    fn channel(&self, name: &str, options: ChannelOptions) -> Arc<dyn Channel> {
        let mut channels = self.channels.lock();
        let reusable = channels.get(name).filter(|c| c.release_calls() == 0).cloned();
        reusable.unwrap_or_else(|| {
            let channel = Arc::new(MockChannel::new(name, self.client_id.clone(), options));
            channels.insert(name.to_string(), Arc::clone(&channel));
            channel
        })
    }
}

impl fmt::Debug for MockRealtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRealtime")
            .field("client_id", &self.client_id)
            .field("channels", &self.channels.lock().len())
            .finish()
    }
}

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// A single successful reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Latest-value cell for one named measurement producer.
///
/// Drivers write into their channel on every successful poll; the publisher
/// reads whatever is current at publish time (pull model, no queueing). A
/// channel that has never had a successful read yields `None` and consumers
/// skip it.
#[derive(Debug)]
pub struct Channel {
    name: String,
    latest: Mutex<Option<Sample>>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            latest: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, value: f64, timestamp: DateTime<Utc>) {
        *self.latest.lock().unwrap() = Some(Sample { value, timestamp });
    }

    pub fn latest(&self) -> Option<Sample> {
        *self.latest.lock().unwrap()
    }
}

/// All measurement channels known to this node.
///
/// Registration happens strictly before the scheduler starts; afterwards the
/// set is fixed and only the sample inside each channel changes.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Arc<Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent per name: registering an existing name returns the
    /// original channel.
    pub fn register(&mut self, name: &str) -> Arc<Channel> {
        if let Some(existing) = self.get(name) {
            return existing.clone();
        }
        let channel = Arc::new(Channel::new(name));
        self.channels.push(channel.clone());
        channel
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Channel>> {
        self.channels.iter().find(|c| c.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }
}

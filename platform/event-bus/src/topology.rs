//! Exchange/queue topology declarations

/// A queue and the routing keys that bind it to its exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_keys: Vec<String>,
}

/// A durable, directly-routed exchange and its bound queues
///
/// Both producer and consumer declare the same topology at startup so that
/// neither depends on the other having run first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queues: Vec<QueueBinding>,
}

impl Topology {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queues: Vec::new(),
        }
    }

    /// Bind a queue under one or more routing keys
    ///
    /// Binding the same queue twice merges the routing keys.
    pub fn bind<I, S>(mut self, queue: impl Into<String>, routing_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = queue.into();
        let keys: Vec<String> = routing_keys.into_iter().map(Into::into).collect();

        match self.queues.iter_mut().find(|b| b.queue == queue) {
            Some(binding) => {
                for key in keys {
                    if !binding.routing_keys.contains(&key) {
                        binding.routing_keys.push(key);
                    }
                }
            }
            None => self.queues.push(QueueBinding {
                queue,
                routing_keys: keys,
            }),
        }
        self
    }

    /// Every routing key bound on this exchange, deduplicated, in binding order
    pub fn routing_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in self.queues.iter().flat_map(|b| b.routing_keys.iter()) {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    pub fn queue(&self, name: &str) -> Option<&QueueBinding> {
        self.queues.iter().find(|b| b.queue == name)
    }
}

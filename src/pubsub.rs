use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::AbortHandle;

/// Per-subscriber queue capacity
pub const DEFAULT_QUEUE_SIZE: usize = 256;

/// Crawl progress events. The serde representation is the live wire format:
/// `{"Name":"PageReport","Data":{...}}` and `{"Name":"CrawlEnd","Data":42}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "Name", content = "Data")]
pub enum Message {
    PageReport(PageReportMessage),
    CrawlEnd(usize),
}

impl Message {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PageReportMessage {
    pub status_code: u16,
    #[serde(rename = "URL")]
    pub url: String,
    pub crawled: usize,
    pub discovered: usize,
    pub crawling: bool,
}

/// Topic carrying the events of a project's crawl
pub fn crawl_topic(project_id: i64) -> String {
    format!("crawl-{}", project_id)
}

/// Identifies one registration, used to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberHandle {
    id: u64,
    topic: String,
}

impl SubscriberHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// A registration whose messages are pulled by its owner
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriberHandle,
    receiver: mpsc::Receiver<Message>,
}

impl Subscription {
    pub fn handle(&self) -> &SubscriberHandle {
        &self.handle
    }

    /// Next message in publish order, `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

struct Entry {
    id: u64,
    sender: mpsc::Sender<Message>,
    delivery: Option<AbortHandle>,
}

/// Topic based fan-out of crawl events.
///
/// Every subscriber owns a bounded queue. Publishing never waits: when a
/// subscriber's queue is full the new message is dropped for that subscriber
/// only, so a stalled viewer cannot hold up the crawl or other viewers.
pub struct Broker {
    next_id: AtomicU64,
    queue_size: usize,
    topics: Mutex<HashMap<String, Vec<Entry>>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::with_queue_size(DEFAULT_QUEUE_SIZE)
    }

    pub fn with_queue_size(queue_size: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            queue_size: queue_size.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_handle(&self, topic: &str) -> SubscriberHandle {
        SubscriberHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            topic: topic.to_string(),
        }
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let handle = self.new_handle(topic);
        let (sender, receiver) = mpsc::channel(self.queue_size);

        self.topics().entry(topic.to_string()).or_default().push(Entry {
            id: handle.id,
            sender,
            delivery: None,
        });

        tracing::debug!(topic, subscriber = handle.id, "Subscriber registered");

        Subscription { handle, receiver }
    }

    /// Registers a callback driven by a dedicated delivery task. Messages are
    /// handed to the callback one at a time, in publish order.
    pub fn subscribe_with<F, Fut>(&self, topic: &str, mut callback: F) -> SubscriberHandle
    where
        F: FnMut(Message) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = self.new_handle(topic);
        let (sender, mut receiver) = mpsc::channel(self.queue_size);

        let delivery = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                callback(message).await;
            }
        });

        self.topics().entry(topic.to_string()).or_default().push(Entry {
            id: handle.id,
            sender,
            delivery: Some(delivery.abort_handle()),
        });

        tracing::debug!(topic, subscriber = handle.id, "Callback subscriber registered");

        handle
    }

    /// Removes a registration. Messages still queued for it are dropped.
    pub fn unsubscribe(&self, handle: &SubscriberHandle) -> bool {
        let mut topics = self.topics();
        let Some(entries) = topics.get_mut(&handle.topic) else {
            return false;
        };

        let Some(pos) = entries.iter().position(|e| e.id == handle.id) else {
            return false;
        };

        let entry = entries.remove(pos);
        if let Some(delivery) = entry.delivery {
            delivery.abort();
        }
        if entries.is_empty() {
            topics.remove(&handle.topic);
        }

        tracing::debug!(topic = %handle.topic, subscriber = handle.id, "Subscriber removed");
        true
    }

    /// Delivers a message to every subscriber of the topic without waiting.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, topic: &str, message: Message) -> usize {
        let mut topics = self.topics();
        let Some(entries) = topics.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        entries.retain(|entry| match entry.sender.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(topic, subscriber = entry.id, "Subscriber queue full, dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        if entries.is_empty() {
            topics.remove(topic);
        }

        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics().get(topic).map_or(0, Vec::len)
    }
}

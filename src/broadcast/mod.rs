/// Fan-out of auction events to subscribers. Best-effort by contract: the
/// engine logs publish failures and moves on, correctness never depends on
/// delivery.
// region:    --- Imports
use crate::auction::events::AuctionEvent;
use crate::error::AuctionError;
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::sync::{Arc, Mutex};
use tracing::info;

// endregion: --- Imports

// region:    --- Broadcaster Trait

#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    /// Publish one event, keyed by listing id so subscribers can filter.
    async fn publish(&self, event: &AuctionEvent) -> Result<(), AuctionError>;
}

// endregion: --- Broadcaster Trait

// region:    --- Kafka Broadcaster

pub const EVENTS_TOPIC: &str = "auction-events";

#[derive(Clone)]
pub struct KafkaBroadcaster {
    producer: Arc<FutureProducer>,
    brokers: String,
}

impl KafkaBroadcaster {
    pub fn new(brokers: &str) -> Result<Self, AuctionError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| AuctionError::Internal(format!("producer creation error: {e:?}")))?;

        Ok(KafkaBroadcaster {
            producer: Arc::new(producer),
            brokers: brokers.to_string(),
        })
    }

    /// Ensure the events topic exists. Called once at startup.
    pub async fn create_topic(
        &self,
        num_partitions: i32,
        replication_factor: i32,
    ) -> Result<(), AuctionError> {
        info!("{:<12} --> creating topic: {}", "Broadcast", EVENTS_TOPIC);

        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| AuctionError::Internal(format!("admin client creation failed: {e:?}")))?;

        let new_topic = NewTopic::new(
            EVENTS_TOPIC,
            num_partitions,
            TopicReplication::Fixed(replication_factor),
        );

        admin_client
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| AuctionError::Internal(format!("topic creation failed: {e:?}")))?;
        Ok(())
    }
}

#[async_trait]
impl EventBroadcaster for KafkaBroadcaster {
    async fn publish(&self, event: &AuctionEvent) -> Result<(), AuctionError> {
        let key = event.listing_id().to_string();
        let payload = serde_json::to_string(event)
            .map_err(|e| AuctionError::Internal(e.to_string()))?;
        info!(
            "{:<12} --> publishing to {}: key={}",
            "Broadcast", EVENTS_TOPIC, key
        );

        let record = FutureRecord::to(EVENTS_TOPIC).key(&key).payload(&payload);
        self.producer
            .send(record, std::time::Duration::from_secs(0))
            .await
            .map_err(|(e, _)| AuctionError::Internal(format!("error sending message: {e:?}")))?;
        Ok(())
    }
}

// endregion: --- Kafka Broadcaster

// region:    --- Memory Broadcaster

/// Records published events in memory. Test double for the fan-out transport.
#[derive(Default)]
pub struct MemoryBroadcaster {
    events: Mutex<Vec<AuctionEvent>>,
}

impl MemoryBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuctionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBroadcaster for MemoryBroadcaster {
    async fn publish(&self, event: &AuctionEvent) -> Result<(), AuctionError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// endregion: --- Memory Broadcaster

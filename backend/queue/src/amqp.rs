//! RabbitMQ transport.
//!
//! Wire contract: a durable queue on the default exchange, routing key equal
//! to the queue name, JSON task record bodies, persistent delivery mode.
//! There is no reply path; results travel through the filesystem.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery as LapinDelivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info, warn};

use fastocr_config::{AppSettings, ConfigStore};
use fastocr_core::{Acker, Delivery, TaskConsumer, TaskQueue, TaskRecord};

/// Upper bound on establishing a broker connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// AMQP persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Broker coordinates taken from the settings snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpSettings {
    pub host: String,
    pub port: u16,
    pub queue: String,
}

impl AmqpSettings {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            host: settings.rabbitmq_host.clone(),
            port: settings.rabbitmq_port,
            queue: settings.rabbitmq_queue.clone(),
        }
    }

    /// Connection URI on the default vhost with the broker's default credentials.
    pub fn uri(&self) -> String {
        format!("amqp://{}:{}/%2f", self.host, self.port)
    }
}

async fn connect(settings: &AmqpSettings) -> Result<Connection> {
    let uri = settings.uri();
    let conn = tokio::time::timeout(
        CONNECT_TIMEOUT,
        Connection::connect(&uri, ConnectionProperties::default()),
    )
    .await
    .with_context(|| format!("Timed out connecting to RabbitMQ at {}:{}", settings.host, settings.port))?
    .with_context(|| format!("Failed to connect to RabbitMQ at {}:{}", settings.host, settings.port))?;
    Ok(conn)
}

async fn declare_queue(channel: &Channel, queue: &str) -> Result<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare queue '{queue}'"))?;
    Ok(())
}

enum SettingsSource {
    Fixed(AmqpSettings),
    Live(Arc<ConfigStore>),
}

/// Publishes task records, opening a short-lived connection per message.
///
/// A broker that is down at submit time therefore fails just the file being
/// published, and the server holds no connection state between uploads.
pub struct AmqpPublisher {
    source: SettingsSource,
}

impl AmqpPublisher {
    pub fn new(settings: AmqpSettings) -> Self {
        Self {
            source: SettingsSource::Fixed(settings),
        }
    }

    /// Follow the settings store: each publish uses the broker coordinates of
    /// the snapshot current at that moment.
    pub fn live(config: Arc<ConfigStore>) -> Self {
        Self {
            source: SettingsSource::Live(config),
        }
    }

    fn settings(&self) -> AmqpSettings {
        match &self.source {
            SettingsSource::Fixed(settings) => settings.clone(),
            SettingsSource::Live(config) => AmqpSettings::from_settings(&config.get()),
        }
    }
}

#[async_trait]
impl TaskQueue for AmqpPublisher {
    fn name(&self) -> &str {
        "amqp"
    }

    async fn publish(&self, task: &TaskRecord) -> Result<()> {
        let settings = self.settings();
        let conn = connect(&settings).await?;
        let channel = conn.create_channel().await.context("Failed to open AMQP channel")?;
        declare_queue(&channel, &settings.queue).await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        let body = task.to_vec()?;
        let confirmation = channel
            .basic_publish(
                "",
                &settings.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .context("Failed to publish task")?
            .await
            .context("Failed to receive publisher confirm")?;

        if let Err(e) = conn.close(200, "OK").await {
            debug!(error = %e, "Error closing AMQP connection after publish");
        }

        if confirmation.is_nack() {
            bail!("Broker rejected task {}", task.task_id);
        }

        info!(task_id = %task.task_id, queue = %settings.queue, "Sent task to RabbitMQ");
        Ok(())
    }
}

/// Acknowledges one AMQP delivery.
struct AmqpAcker {
    delivery: LapinDelivery,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.delivery
            .ack(BasicAckOptions::default())
            .await
            .context("Failed to acknowledge delivery")
    }
}

/// A worker's long-lived subscription to the work queue.
pub struct AmqpConsumer {
    _conn: Connection,
    consumer: Consumer,
}

impl AmqpConsumer {
    /// Connect, declare the queue durable, bound unacknowledged deliveries
    /// to `prefetch`, and start consuming.
    pub async fn connect(settings: &AmqpSettings, prefetch: u16, consumer_tag: &str) -> Result<Self> {
        info!(host = %settings.host, port = settings.port, "Connecting to RabbitMQ");
        let conn = connect(settings).await?;
        let channel = conn.create_channel().await.context("Failed to open AMQP channel")?;
        declare_queue(&channel, &settings.queue).await?;

        channel
            .basic_qos(prefetch.max(1), BasicQosOptions::default())
            .await
            .context("Failed to set prefetch")?;
        info!(prefetch = prefetch.max(1), "Worker prefetch window set");

        let consumer = channel
            .basic_consume(
                &settings.queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to consume from '{}'", settings.queue))?;

        Ok(Self {
            _conn: conn,
            consumer,
        })
    }
}

#[async_trait]
impl TaskConsumer for AmqpConsumer {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let next = self.consumer.next().await?;
        Some(match next {
            Ok(mut delivery) => {
                let body = std::mem::take(&mut delivery.data);
                Ok(Delivery::new(body, AmqpAcker { delivery }))
            }
            Err(e) => {
                warn!(error = %e, "AMQP consumer error");
                Err(anyhow::Error::new(e).context("AMQP consumer stream failed"))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_snapshot() {
        let settings = AppSettings {
            rabbitmq_host: "mq.internal".into(),
            rabbitmq_port: 5673,
            rabbitmq_queue: "ocr".into(),
            ..Default::default()
        };
        let amqp = AmqpSettings::from_settings(&settings);
        assert_eq!(amqp.queue, "ocr");
        assert_eq!(amqp.uri(), "amqp://mq.internal:5673/%2f");
    }

    #[tokio::test]
    async fn publish_to_unreachable_broker_fails() {
        // Nothing listens on port 1.
        let publisher = AmqpPublisher::new(AmqpSettings {
            host: "127.0.0.1".into(),
            port: 1,
            queue: "ocr_tasks".into(),
        });
        let task = TaskRecord::new(
            uuid::Uuid::new_v4(),
            "a.png",
            std::path::Path::new("/tmp/a.png"),
            "sk",
        );
        assert!(publisher.publish(&task).await.is_err());
    }

    #[tokio::test]
    async fn live_publisher_follows_settings_updates() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().join("app_config.json")).await);
        let publisher = AmqpPublisher::live(Arc::clone(&config));
        assert_eq!(publisher.settings().port, 5672);

        config
            .update(&serde_json::json!({ "rabbitmq_host": "mq2", "rabbitmq_port": "5673" }))
            .await
            .unwrap();
        let settings = publisher.settings();
        assert_eq!(settings.host, "mq2");
        assert_eq!(settings.port, 5673);
    }
}

//! Minimal consumer: one topic, a pool of three workers, ack on success.

use std::time::Duration;

use quark_kafka::{KafkaConfiguration, kafka_broker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,librdkafka=warn".into()),
        )
        .init();

    let cluster = vec![
        std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
    ];
    let broker = kafka_broker(KafkaConfiguration::default(), &cluster)?;

    broker
        .topic("chat.0")
        .pool_size(3)
        .handle_fn(|_writer, event| {
            Box::pin(async move {
                tracing::info!(
                    topic = %event.topic,
                    id = %event.message.id,
                    correlation = %event.message.metadata.correlation_id,
                    bytes = event.message.len(),
                    "message received"
                );
                true
            })
        });

    tokio::select! {
        served = broker.listen_and_serve() => served?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("draining");
            broker.shutdown(Duration::from_secs(10)).await?;
        }
    }
    Ok(())
}

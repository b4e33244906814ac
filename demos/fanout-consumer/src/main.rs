//! Fan-out and failure routing: one inbound topic feeding two outbound
//! topics, with failed messages cycling through a retry topic until they
//! land on the dead-letter topic.

use std::time::Duration;

use quark_core::QuarkError;
use quark_core::topics::{dead_letter_topic, retry_topic};
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

    // every chat.0 message is forwarded to both downstream topics
    broker
        .topic("chat.0")
        .group("chat-fanout")
        .pool_size(3)
        .max_retries(3)
        .retry_backoff(Duration::from_millis(500))
        .handle_fn(|mut writer, event| {
            Box::pin(async move {
                match writer.write(&event.message.data, &["chat.1", "chat.2"]).await {
                    Ok(published) => {
                        tracing::info!(published, id = %event.message.id, "fanned out");
                        true
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "fan-out failed");
                        false
                    }
                }
            })
        });

    // payments cycle through retry.payments.executed until the redelivery
    // budget runs out, then a fresh message parks them on the dead letter
    broker
        .topics([
            "payments.executed".to_string(),
            retry_topic("payments.executed"),
        ])
        .group("payments-audit")
        .max_retries(3)
        .handle_fn(|mut writer, event| {
            Box::pin(async move {
                if !event.message.is_empty() {
                    tracing::info!(id = %event.message.id, "payment audited");
                    return true;
                }

                let mut failed = event.message.clone();
                failed.event_type = retry_topic("payments.executed");
                match writer.write_retry(&mut failed).await {
                    Ok(()) => true,
                    Err(QuarkError::MessageRedeliveredTooMuch) => {
                        // a fresh message starts a new causal chain on the
                        // dead letter, with its own redelivery budget
                        let parking = dead_letter_topic("payments.executed");
                        let parked = writer.write(&failed.data, &[parking.as_str()]).await;
                        tracing::error!(id = %failed.id, "payment dead-lettered");
                        parked.is_ok()
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "retry publish failed");
                        false
                    }
                }
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

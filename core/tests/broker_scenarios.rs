//! End-to-end runtime scenarios against the in-memory driver.

use std::sync::Arc;
use std::time::Duration;

use quark_core::{Broker, Message, QuarkError};
use quark_testing::{InMemoryFeed, InMemoryPublisher, InMemoryRecord, in_memory_worker_factory};

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn fan_out_preserves_correlation_and_redelivery() {
    quark_testing::init_tracing();
    let publisher = InMemoryPublisher::new();
    let feed = InMemoryFeed::new();
    let broker = Arc::new(
        Broker::builder()
            .cluster(["localhost:9092"])
            .publisher(publisher.clone())
            .worker_factory(in_memory_worker_factory(Arc::clone(&feed)))
            .retry_backoff(Duration::from_millis(5))
            .build(),
    );

    broker
        .topic("chat.0")
        .pool_size(1)
        .handle_fn(|mut writer, _event| {
            Box::pin(async move { writer.write(b"hi", &["chat.1", "chat.2"]).await.is_ok() })
        });

    feed.push(InMemoryRecord::new(
        "chat.0",
        Message::from_parent("root-corr", "in-1", "chat.0", b"payload".to_vec()),
    ));

    let serving = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.listen_and_serve().await })
    };

    wait_until(|| publisher.len() == 2).await;
    assert!(broker.shutdown(Duration::from_secs(5)).await.is_ok());
    assert!(matches!(serving.await, Ok(Ok(()))));

    let sent = publisher.sent();
    let types: Vec<&str> = sent.iter().map(|m| m.event_type.as_str()).collect();
    assert_eq!(types, ["chat.1", "chat.2"]);
    for message in &sent {
        assert_eq!(message.metadata.redelivery_count, 0);
        assert_eq!(message.metadata.correlation_id, "root-corr");
        assert_eq!(message.data, b"hi");
    }
}

#[tokio::test]
async fn graceful_shutdown_drains_every_pool() {
    let feed = InMemoryFeed::new();
    let broker = Arc::new(
        Broker::builder()
            .cluster(["localhost:9092"])
            .worker_factory(in_memory_worker_factory(Arc::clone(&feed)))
            .build(),
    );

    broker
        .topic("orders.placed")
        .pool_size(3)
        .handle_fn(|_writer, _event| Box::pin(async { true }));
    broker
        .topic("orders.cancelled")
        .pool_size(3)
        .handle_fn(|_writer, _event| Box::pin(async { true }));

    let serving = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.listen_and_serve().await })
    };

    {
        let broker = Arc::clone(&broker);
        wait_until(move || broker.running_supervisors() == 2 && broker.running_workers() == 6)
            .await;
    }

    assert!(broker.shutdown(Duration::from_secs(10)).await.is_ok());
    assert_eq!(broker.running_supervisors(), 0);
    assert_eq!(broker.running_workers(), 0);
    assert!(matches!(serving.await, Ok(Ok(()))));

    // the broker stays closed
    assert!(matches!(
        broker.listen_and_serve().await,
        Err(QuarkError::BrokerClosed)
    ));
}

#[tokio::test]
async fn handler_decision_drives_the_acknowledgement() {
    let feed = InMemoryFeed::new();
    let broker = Arc::new(
        Broker::builder()
            .cluster(["localhost:9092"])
            .worker_factory(in_memory_worker_factory(Arc::clone(&feed)))
            .build(),
    );

    broker
        .topic("chat.0")
        .pool_size(1)
        .handle_fn(|_writer, event| Box::pin(async move { event.message.data == b"ok" }));

    feed.push(InMemoryRecord::new(
        "chat.0",
        Message::new("rec-1", "chat.0", b"ok".to_vec()),
    ));
    feed.push(InMemoryRecord::new(
        "chat.0",
        Message::new("rec-2", "chat.0", b"broken".to_vec()),
    ));

    let serving = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.listen_and_serve().await })
    };

    {
        let feed = Arc::clone(&feed);
        wait_until(move || feed.acks().len() == 2).await;
    }
    assert!(broker.shutdown(Duration::from_secs(5)).await.is_ok());
    assert!(matches!(serving.await, Ok(Ok(()))));

    assert_eq!(
        feed.acks(),
        vec![("rec-1".to_string(), true), ("rec-2".to_string(), false)]
    );
}

#[tokio::test]
async fn invalid_subscription_short_circuits_serving() {
    let feed = InMemoryFeed::new();
    let broker = Broker::builder()
        .cluster(["localhost:9092"])
        .worker_factory(in_memory_worker_factory(feed))
        .build();

    // no handler registered
    broker.topic("chat.0").pool_size(1);

    assert!(matches!(
        broker.listen_and_serve().await,
        Err(QuarkError::NotEnoughHandlers)
    ));
    assert_eq!(broker.running_supervisors(), 0);
    assert_eq!(broker.running_workers(), 0);
}

#[tokio::test]
async fn missing_worker_factory_reports_the_provider() {
    let broker = Broker::builder().cluster(["localhost:9092"]).build();
    broker
        .topic("chat.0")
        .pool_size(2)
        .handle_fn(|_writer, _event| Box::pin(async { true }));

    let result = broker.listen_and_serve().await;
    assert!(matches!(
        result,
        Err(QuarkError::Multiple { errors })
            if errors.iter().all(|e| matches!(e, QuarkError::ProviderNotValid { .. }))
    ));
}

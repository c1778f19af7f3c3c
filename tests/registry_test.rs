use bytes::Bytes;
use producer_registry::broker::InMemoryBroker;
use producer_registry::{
    Error, FlushConfig, ProducerRegistry, ServiceInstanceId, TopicBinding, TopicDescriptor,
};
use std::sync::Arc;

fn new_registry(broker: &Arc<InMemoryBroker>) -> ProducerRegistry {
    ProducerRegistry::new(broker.clone(), FlushConfig::default())
}

#[tokio::test]
async fn test_register_twice_returns_same_producers() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let instance = ServiceInstanceId::from("orders-service");
    let topic = TopicDescriptor::<String>::of("orders").unwrap();

    let first = registry
        .register(
            instance.clone(),
            vec![TopicBinding::new(topic.clone()).erase()],
        )
        .await
        .unwrap();
    let second = registry
        .register(
            instance.clone(),
            vec![TopicBinding::new(topic.clone()).erase()],
        )
        .await
        .unwrap();

    let p1 = first.producer(&topic).unwrap();
    let p2 = second.producer(&topic).unwrap();

    assert!(Arc::ptr_eq(&p1, &p2));
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_reregistering_ignores_new_topic_list() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let instance = ServiceInstanceId::from("orders-service");
    let orders = TopicDescriptor::<String>::of("orders").unwrap();
    let extra = TopicDescriptor::<String>::of("extra").unwrap();

    registry
        .register(
            instance.clone(),
            vec![TopicBinding::new(orders.clone()).erase()],
        )
        .await
        .unwrap();

    // The idempotent fast path wins; the new declaration is not applied.
    let second = registry
        .register(
            instance.clone(),
            vec![TopicBinding::new(extra.clone()).erase()],
        )
        .await
        .unwrap();

    assert!(second.producer(&orders).is_ok());
    assert!(matches!(
        second.producer(&extra),
        Err(Error::UnregisteredTopic { .. })
    ));
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_distinct_instances_get_independent_channels() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let topic = TopicDescriptor::<String>::of("orders").unwrap();

    let reg_a = registry
        .register(
            ServiceInstanceId::from("service-a"),
            vec![TopicBinding::new(topic.clone()).erase()],
        )
        .await
        .unwrap();
    let _reg_b = registry
        .register(
            ServiceInstanceId::from("service-b"),
            vec![TopicBinding::new(topic.clone()).erase()],
        )
        .await
        .unwrap();

    assert_eq!(broker.open_count(), 2);

    reg_a
        .producer(&topic)
        .unwrap()
        .send(&"from-a".to_string())
        .await
        .unwrap();

    let channels = broker.channels_for("orders").await;
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].write_count().await, 1);
    assert_eq!(channels[1].write_count().await, 0);
}

#[tokio::test]
async fn test_get_fails_for_unregistered_instance() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let topic = TopicDescriptor::<String>::of("orders").unwrap();

    let result = registry
        .get(&ServiceInstanceId::from("never-registered"), &topic)
        .await;

    assert!(matches!(result, Err(Error::UnregisteredTopic { .. })));
}

#[tokio::test]
async fn test_get_fails_for_undeclared_topic() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let instance = ServiceInstanceId::from("orders-service");
    let orders = TopicDescriptor::<String>::of("orders").unwrap();
    let shipments = TopicDescriptor::<String>::of("shipments").unwrap();

    registry
        .register(
            instance.clone(),
            vec![TopicBinding::new(orders).erase()],
        )
        .await
        .unwrap();

    let result = registry.get(&instance, &shipments).await;
    assert!(matches!(result, Err(Error::UnregisteredTopic { .. })));
}

#[tokio::test]
async fn test_get_fails_for_mismatched_record_type() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let instance = ServiceInstanceId::from("orders-service");
    let as_string = TopicDescriptor::<String>::of("orders").unwrap();
    let as_u64 = TopicDescriptor::<u64>::of("orders").unwrap();

    registry
        .register(
            instance.clone(),
            vec![TopicBinding::new(as_string).erase()],
        )
        .await
        .unwrap();

    let result = registry.get(&instance, &as_u64).await;
    assert!(matches!(result, Err(Error::UnregisteredTopic { .. })));
}

#[tokio::test]
async fn test_one_id_with_two_record_types_is_rejected() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let instance = ServiceInstanceId::from("orders-service");
    let as_string = TopicDescriptor::<String>::of("orders").unwrap();
    let as_u64 = TopicDescriptor::<u64>::of("orders").unwrap();

    let result = registry
        .register(
            instance.clone(),
            vec![
                TopicBinding::new(as_string.clone()).erase(),
                TopicBinding::new(as_u64).erase(),
            ],
        )
        .await;

    assert!(matches!(result, Err(Error::DuplicateTopic { .. })));
    // No partial registration took place.
    assert_eq!(broker.open_count(), 0);
    let lookup = registry.get(&instance, &as_string).await;
    assert!(matches!(lookup, Err(Error::UnregisteredTopic { .. })));
}

#[tokio::test]
async fn test_exact_duplicate_declarations_collapse() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let topic = TopicDescriptor::<String>::of("orders").unwrap();

    let registration = registry
        .register(
            ServiceInstanceId::from("orders-service"),
            vec![
                TopicBinding::new(topic.clone()).erase(),
                TopicBinding::new(topic.clone()).erase(),
            ],
        )
        .await
        .unwrap();

    assert!(registration.producer(&topic).is_ok());
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_concurrent_register_opens_one_channel_per_topic() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = Arc::new(new_registry(&broker));
    let instance = ServiceInstanceId::from("orders-service");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        let instance = instance.clone();
        handles.push(tokio::spawn(async move {
            let orders = TopicDescriptor::<String>::of("orders").unwrap();
            let shipments = TopicDescriptor::<String>::of("shipments").unwrap();
            registry
                .register(
                    instance,
                    vec![
                        TopicBinding::new(orders).erase(),
                        TopicBinding::new(shipments).erase(),
                    ],
                )
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(broker.open_count(), 2);
}

#[tokio::test]
async fn test_send_touches_only_its_own_channel() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let instance = ServiceInstanceId::from("orders-service");
    let orders = TopicDescriptor::<String>::of("orders").unwrap();
    let shipments = TopicDescriptor::<String>::of("shipments").unwrap();

    registry
        .register(
            instance.clone(),
            vec![
                TopicBinding::new(orders.clone()).erase(),
                TopicBinding::new(shipments.clone()).erase(),
            ],
        )
        .await
        .unwrap();

    let producer = registry.get(&instance, &orders).await.unwrap();
    producer.send(&"x".to_string()).await.unwrap();

    let orders_channel = broker.channel_for("orders").await.unwrap();
    let shipments_channel = broker.channel_for("shipments").await.unwrap();

    assert_eq!(
        orders_channel.writes().await,
        vec![(None, Bytes::from_static(b"\"x\""))]
    );
    assert_eq!(shipments_channel.write_count().await, 0);
}

#[tokio::test]
async fn test_register_rolls_back_on_channel_open_failure() {
    let broker = Arc::new(InMemoryBroker::new());
    let registry = new_registry(&broker);
    let instance = ServiceInstanceId::from("orders-service");
    let orders = TopicDescriptor::<String>::of("orders").unwrap();
    let shipments = TopicDescriptor::<String>::of("shipments").unwrap();

    broker.fail_opens_after(1);

    let result = registry
        .register(
            instance.clone(),
            vec![
                TopicBinding::new(orders.clone()).erase(),
                TopicBinding::new(shipments.clone()).erase(),
            ],
        )
        .await;
    assert!(matches!(result, Err(Error::BrokerUnavailable(_))));

    // The channel opened before the failure was closed again, and the
    // registry holds nothing for the instance.
    let channels = broker.channels().await;
    assert_eq!(channels.len(), 1);
    assert!(channels[0].is_closed());
    let lookup = registry.get(&instance, &orders).await;
    assert!(matches!(lookup, Err(Error::UnregisteredTopic { .. })));

    // A later attempt starts from a clean slate.
    broker.fail_opens(false);
    let registration = registry
        .register(
            instance.clone(),
            vec![
                TopicBinding::new(orders.clone()).erase(),
                TopicBinding::new(shipments).erase(),
            ],
        )
        .await
        .unwrap();
    assert!(registration.producer(&orders).is_ok());
    assert_eq!(broker.open_count(), 3);
}

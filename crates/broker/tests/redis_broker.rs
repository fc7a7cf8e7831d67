//! Pub/sub against a live server.
//!
//! Run with `REDIS_URL=redis://localhost:6379 cargo test -p skein-broker --features redis -- --ignored`.

#![cfg(feature = "redis")]

use std::time::Duration;

use serde_json::json;
use skein_broker::{MessageBroker, Payload};
use skein_core::new_job_id;
use skein_store::{RedisStore, StoreConfig};

fn connect() -> MessageBroker<RedisStore> {
    let config = StoreConfig::from_env().expect("invalid store config");
    MessageBroker::new(RedisStore::connect(config).expect("redis not reachable"))
}

#[test]
#[ignore]
fn publish_reaches_channel_and_pattern_subscribers() {
    let broker = connect();
    let prefix = format!("skein-test:{}", new_job_id());
    let channel = format!("{prefix}:updates");
    let pattern = format!("{prefix}:*");

    let exact = broker.subscribe(&[channel.as_str()]).unwrap();
    let glob = broker.psubscribe(&[pattern.as_str()]).unwrap();

    let mut data = Payload::new();
    data.insert("x".to_string(), json!(1));
    assert_eq!(broker.publish(&channel, data.clone()).unwrap(), 2);

    let wait = Duration::from_secs(2);
    assert_eq!(exact.recv_timeout(wait).unwrap().data, data);
    assert_eq!(glob.recv_timeout(wait).unwrap().channel, channel);
}

#[test]
#[ignore]
fn foreign_payloads_arrive_as_fallback_messages() {
    let broker = connect();
    let channel = format!("skein-test:{}", new_job_id());
    let mut sub = broker.subscribe(&[channel.as_str()]).unwrap();

    broker.publish_raw(&channel, b"hello world").unwrap();
    let message = sub.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(message.raw(), Some("hello world"));

    sub.unsubscribe(&[]).unwrap();
    assert_eq!(broker.publish_raw(&channel, b"gone").unwrap(), 0);

    sub.close();
    assert!(sub.recv().is_none());
}

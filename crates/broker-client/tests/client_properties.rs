//! Property-based tests for the client against the mock broker.
//!
//! Each case runs a fresh broker on its own runtime and checks the client
//! against a `BTreeMap` model.

use broker_client::{
    BrokerClient, ClientConfig, ClientError, Entries, KeystoreTokenProvider, TransportConfig,
};
use broker_crypto::{KeyStore, MemoryKeyStore};
use broker_harness::{MemoryConnector, MockBroker, SimEnv};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Set(String, String),
    Get(String),
    List,
    DropConnections,
}

fn key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.-]{0,7}"
}

fn value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.:=-][a-zA-Z0-9 _.:=-]{0,23}"
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (key(), value()).prop_map(|(k, v)| Op::Set(k, v)),
        3 => key().prop_map(Op::Get),
        2 => Just(Op::List),
        1 => Just(Op::DropConnections),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn client_matches_model(seed in any::<u64>(), ops in prop::collection::vec(op(), 1..24)) {
        runtime().block_on(async {
            let env = SimEnv::with_seed(seed);
            let keys = MemoryKeyStore::new([1u8; 32]);
            let broker = MockBroker::new(env.clone(), keys.authority().unwrap());
            let connector = MemoryConnector::new(broker.clone());
            let config = ClientConfig::new("com.example.dbapp")
                .with_transport(TransportConfig::development());
            let client = BrokerClient::new(
                config,
                connector,
                KeystoreTokenProvider::new(env.clone(), keys),
                env,
            )
            .unwrap();

            let mut model = Entries::new();

            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        prop_assert!(client.set(&k, &v).await);
                        model.insert(k, v);
                    },
                    Op::Get(k) => {
                        prop_assert_eq!(client.get(&k).await, model.get(&k).cloned());
                    },
                    Op::List => {
                        prop_assert_eq!(client.list_as_map().await, Some(model.clone()));
                    },
                    Op::DropConnections => broker.drop_connections(),
                }
            }

            prop_assert_eq!(broker.entries(), model);
            Ok(())
        })?;
    }

    #[test]
    fn injected_delimiters_fail_before_io(
        prefix in key(),
        delimiter in prop::sample::select(vec![" ", "\n", "\r", "\t", "=", ","]),
        suffix in "[a-z]{0,4}",
    ) {
        runtime().block_on(async {
            let env = SimEnv::with_seed(0);
            let keys = MemoryKeyStore::new([1u8; 32]);
            let broker = MockBroker::new(env.clone(), keys.authority().unwrap());
            let connector = MemoryConnector::new(broker.clone());
            let client = BrokerClient::new(
                ClientConfig::new("com.example.dbapp"),
                connector.clone(),
                KeystoreTokenProvider::new(env.clone(), keys),
                env,
            )
            .unwrap();

            let bad_key = format!("{prefix}{delimiter}{suffix}");
            let set = client.try_set(&bad_key, "x").await;
            let get = client.try_get(&bad_key).await;
            prop_assert!(matches!(set, Err(ClientError::InvalidArgument(_))));
            prop_assert!(matches!(get, Err(ClientError::InvalidArgument(_))));

            prop_assert_eq!(connector.opens(), 0);
            prop_assert!(broker.wire_log().is_empty());
            Ok(())
        })?;
    }
}

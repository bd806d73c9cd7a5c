//! Shared helpers for the integration suites

use std::sync::Arc;

use serde_json::Value;

use quokka::client::Client;
use quokka::provider::Provider;
use quokka::server::Node;
use quokka::transport::{LocalClientTransport, LocalExchange};

/// A node with one provider (id 1) on an in-process exchange, plus a
/// client for it.
#[allow(dead_code)]
pub struct Harness {
    pub exchange: Arc<LocalExchange>,
    pub node: Arc<Node>,
    pub provider: Arc<Provider>,
    pub client: Client,
}

/// Stand up a provider from a JSON config, registered at `addr` on a
/// fresh exchange.
pub fn harness(addr: &str, config: Value) -> Harness {
    let exchange = LocalExchange::new();
    let provider = Provider::with_config(config).unwrap();
    let node = Node::new();
    node.add_provider(1, provider.clone()).unwrap();
    exchange.register(addr, node.clone());

    let transport = Arc::new(LocalClientTransport::new(
        exchange.clone(),
        addr,
        &format!("{}#client", addr),
    ));
    let client = Client::new(transport, 1);

    Harness {
        exchange,
        node,
        provider,
        client,
    }
}

/// Add another node (provider id 1) to an existing exchange.
#[allow(dead_code)]
pub fn join(exchange: &Arc<LocalExchange>, addr: &str, config: Value) -> Harness {
    let provider = Provider::with_config(config).unwrap();
    let node = Node::new();
    node.add_provider(1, provider.clone()).unwrap();
    exchange.register(addr, node.clone());

    let transport = Arc::new(LocalClientTransport::new(
        exchange.clone(),
        addr,
        &format!("{}#client", addr),
    ));
    let client = Client::new(transport, 1);

    Harness {
        exchange: exchange.clone(),
        node,
        provider,
        client,
    }
}

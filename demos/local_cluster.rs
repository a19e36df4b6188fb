//! # Example: Local Cluster
//!
//! Three compute nodes and a console share one in-memory cluster:
//! 1. the nodes elect the greatest id as master and agree on a topology
//! 2. the console prepares a document configuration and starts the computation
//! 3. every node's task gossips through the broadcast messenger and finishes
//! 4. the console switches the topology to a ring, cleans up and destroys the cluster
//!
//! Run with: `cargo run --example local_cluster --features logging`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use clustervisor::node::{Config, Node, NodeDescriptor, NodeId};
use clustervisor::store::MemoryCluster;
use clustervisor::task::{WorkerConfiguration, dependencies::names};
use clustervisor::worker::{BroadcastMessenger, ComputationState};
use clustervisor::{LogWriter, PluginRegistry, Subscribe, TaskError, TaskFn};

const DOCUMENT: &str = r#"{ "task": "gossip", "rounds": ${rounds} }"#;

fn plugins() -> PluginRegistry {
    PluginRegistry::new().with("gossip", |setup| {
        let node = setup.dependencies.get::<NodeId>(names::NODE_ID)?;
        let messenger = setup
            .dependencies
            .get::<BroadcastMessenger>(names::BROADCAST_MESSENGER)?;
        let rounds = setup
            .document
            .and_then(|d| d.get("rounds"))
            .and_then(|r| r.as_u64())
            .unwrap_or(1);

        Ok(TaskFn::arc("gossip", move |ctx: CancellationToken| {
            let (node, messenger) = (node.clone(), messenger.clone());
            async move {
                let id = messenger.subscribe({
                    let node = node.clone();
                    move |payload: &Bytes| {
                        println!("[{node}] heard {}", String::from_utf8_lossy(payload));
                    }
                });
                for round in 0..rounds {
                    if ctx.is_cancelled() {
                        return Err(TaskError::Canceled);
                    }
                    let text = format!("{node}#{round}");
                    messenger
                        .send(Bytes::from(text))
                        .map_err(|e| TaskError::Fail { error: e.to_string() })?;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                messenger.unsubscribe(id);
                Ok(())
            }
        }))
    })
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for {what}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,clustervisor=debug".into()),
        )
        .init();

    let cfg = Config {
        grace: Duration::from_secs(5),
        propagation_delay: Duration::from_millis(100),
        ..Config::default()
    };
    let cluster = MemoryCluster::new();

    let mut nodes = Vec::new();
    for id in ["node-1", "node-2", "node-3"] {
        let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
        let node = Node::builder(cluster.clone(), NodeDescriptor::compute(id))
            .with_config(cfg.clone())
            .with_subscribers(subs)
            .with_plugins(plugins())
            .build()?;
        node.start()?;
        nodes.push(node);
    }
    let console = Node::builder(cluster.clone(), NodeDescriptor::satellite("console"))
        .with_config(cfg.clone())
        .build()?;
    console.start()?;

    wait_for("workers attached", || {
        nodes
            .iter()
            .all(|n| n.worker().is_some_and(|w| w.is_attached()))
    })
    .await?;

    let topology = console.topology_client();
    println!(
        "master: {:?}, topology: {:?}",
        topology.master_id()?,
        topology.topology_type()?
    );

    let client = console.worker_client();
    let properties = BTreeMap::from([("rounds".to_string(), "3".to_string())]);
    client
        .prepare_configuration(&WorkerConfiguration::document(DOCUMENT, properties))
        .await?;
    wait_for("configured", || {
        client.computation_state().ok() == Some(ComputationState::Configured)
    })
    .await?;

    client.start_computation()?;
    wait_for("finished", || {
        client.computation_state().ok() == Some(ComputationState::Finished)
    })
    .await?;
    println!("node states: {:?}", client.node_states()?);

    topology.set_topology_type("ring")?;
    wait_for("ring", || {
        nodes.iter().all(|n| {
            n.topology()
                .and_then(|t| t.topology_type())
                .is_some_and(|k| k == "ring")
        })
    })
    .await?;
    println!("graph: {:?}", topology.graph()?);

    client.clean_configuration()?;
    wait_for("clean", || {
        client.computation_state().ok() == Some(ComputationState::None)
    })
    .await?;

    client.destroy_cluster()?;
    for node in nodes.iter().chain(std::iter::once(&console)) {
        node.destroyed().cancelled().await;
        node.shutdown().await?;
    }
    println!("cluster destroyed");
    Ok(())
}

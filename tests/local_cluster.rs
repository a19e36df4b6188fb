//! Multi-node scenarios: several nodes share one in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use clustervisor::node::{Config, Node, NodeDescriptor, NodeId};
use clustervisor::store::MemoryCluster;
use clustervisor::task::{WorkerConfiguration, dependencies::names};
use clustervisor::worker::{ComputationState, ComputeTopologyProvider, QueryCache, WorkerState};
use clustervisor::{BackoffPolicy, JitterPolicy, PluginRegistry, TaskError, TaskFn};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Logs go to the test writer; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn config() -> Config {
    Config {
        grace: Duration::from_secs(5),
        readiness: BackoffPolicy {
            first: Duration::from_millis(5),
            max: Duration::from_millis(10),
            factor: 1.0,
            jitter: JitterPolicy::None,
        },
        readiness_attempts: 500,
        cancel_grace: Duration::from_millis(500),
        unicast_advert_delay: Duration::from_millis(20),
        unicast_advert_period: Duration::from_millis(50),
        query_period: Duration::from_millis(20),
        ..Config::default()
    }
}

fn failed(e: impl ToString) -> TaskError {
    TaskError::Fail {
        error: e.to_string(),
    }
}

fn plugins() -> PluginRegistry {
    PluginRegistry::new()
        .with("report", |setup| {
            let node = setup.dependencies.get::<NodeId>(names::NODE_ID)?;
            let agents = setup
                .dependencies
                .get::<ComputeTopologyProvider>(names::COMPUTE_TOPOLOGY)?;
            let cache = setup.dependencies.get::<QueryCache>(names::QUERY_CACHE)?;
            Ok(TaskFn::arc("report", move |_ctx: CancellationToken| {
                let (node, agents, cache) = (node.clone(), agents.clone(), cache.clone());
                async move {
                    agents
                        .register_agent(&format!("agent-{node}"))
                        .map_err(failed)?;
                    cache.set_value(serde_json::json!({ "node": node.as_str() }));
                    cache.publish_now().map_err(failed)?;
                    Ok(())
                }
            }))
        })
        .with("forever", |_setup| {
            Ok(TaskFn::arc("forever", |ctx: CancellationToken| async move {
                ctx.cancelled().await;
                Err::<(), _>(TaskError::Canceled)
            }))
        })
        .with("crash", |_setup| {
            Ok(TaskFn::arc("crash", |_ctx: CancellationToken| async {
                Err::<(), _>(TaskError::Fatal {
                    error: "diverged".into(),
                })
            }))
        })
}

async fn until(what: &str, mut cond: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

async fn start_node(cluster: &Arc<MemoryCluster>, id: &str) -> Node {
    init_tracing();
    let node = Node::builder(cluster.clone(), NodeDescriptor::compute(id))
        .with_config(config())
        .with_plugins(plugins())
        .build()
        .unwrap();
    node.start().unwrap();
    node
}

async fn start_cluster(ids: &[&str]) -> (Arc<MemoryCluster>, Vec<Node>) {
    let cluster = MemoryCluster::new();
    let mut nodes = Vec::new();
    for id in ids {
        nodes.push(start_node(&cluster, id).await);
    }
    until("every worker attached", || {
        nodes
            .iter()
            .all(|n| n.worker().is_some_and(|w| w.is_attached()))
    })
    .await;
    (cluster, nodes)
}

fn all_in(nodes: &[Node], state: WorkerState) -> bool {
    nodes
        .iter()
        .all(|n| n.worker().is_some_and(|w| w.state() == state))
}

async fn shutdown(nodes: Vec<Node>) {
    for node in nodes {
        node.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_elect_and_finish_a_computation() {
    let (_cluster, nodes) = start_cluster(&["A", "B", "C"]).await;
    for n in &nodes {
        let topology = n.topology().unwrap();
        assert_eq!(topology.master_id().unwrap(), Some(NodeId::from("C")));
        assert_eq!(topology.neighbours().unwrap().len(), 3);
    }

    let client = nodes[0].worker_client();
    client
        .prepare_configuration(&WorkerConfiguration::plugin("report"))
        .await
        .unwrap();
    until("every node configured", || all_in(&nodes, WorkerState::Configured)).await;
    assert_eq!(
        client.computation_state().unwrap(),
        ComputationState::Configured
    );

    client.start_computation().unwrap();
    until("global FINISHED", || {
        client.computation_state().unwrap() == ComputationState::Finished
    })
    .await;
    assert!(
        client
            .node_states()
            .unwrap()
            .values()
            .all(|s| *s == ComputationState::Finished)
    );

    let worker = nodes[1].worker().unwrap();
    assert_eq!(worker.compute_topology().agents().unwrap().len(), 3);
    assert_eq!(worker.query_cache().query().unwrap().len(), 3);
    assert!(
        worker
            .compute_topology()
            .are_neighbours("agent-A", "agent-C")
            .unwrap()
    );

    client.clean_configuration().unwrap();
    until("every node stopped", || all_in(&nodes, WorkerState::Stopped)).await;
    assert_eq!(client.computation_state().unwrap(), ComputationState::None);
    assert!(worker.query_cache().query().unwrap().is_empty());

    shutdown(nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_computation_can_be_cleaned() {
    let (_cluster, nodes) = start_cluster(&["A", "B"]).await;
    let client = nodes[0].worker_client();
    client
        .prepare_configuration(&WorkerConfiguration::plugin("forever"))
        .await
        .unwrap();
    until("every node configured", || all_in(&nodes, WorkerState::Configured)).await;

    client.start_computation().unwrap();
    until("every node executing", || all_in(&nodes, WorkerState::Executing)).await;
    assert!(client.is_computation_running().unwrap());

    client.pause_computation().unwrap();
    until("every node paused", || all_in(&nodes, WorkerState::Paused)).await;
    client.resume_computation().unwrap();
    until("every node executing", || all_in(&nodes, WorkerState::Executing)).await;

    client.stop_computation().unwrap();
    until("every node cancelled", || all_in(&nodes, WorkerState::Cancelled)).await;
    until("every task ended", || {
        nodes
            .iter()
            .all(|n| !n.worker().unwrap().computation().is_task_running())
    })
    .await;

    client.clean_configuration().unwrap();
    until("every node stopped", || all_in(&nodes, WorkerState::Stopped)).await;
    assert_eq!(client.computation_state().unwrap(), ComputationState::None);

    shutdown(nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn task_failure_is_published_by_the_master() {
    let (_cluster, nodes) = start_cluster(&["A", "B"]).await;
    let client = nodes[0].worker_client();
    client
        .prepare_configuration(&WorkerConfiguration::plugin("crash"))
        .await
        .unwrap();
    until("every node configured", || all_in(&nodes, WorkerState::Configured)).await;

    client.start_computation().unwrap();
    until("every node failed", || all_in(&nodes, WorkerState::Failed)).await;
    assert_eq!(client.computation_state().unwrap(), ComputationState::Failed);

    let failure = client.computation_error().unwrap().unwrap();
    assert_eq!(failure.kind, "task_fatal");
    assert_eq!(failure.node, NodeId::from("B"));
    assert!(
        client
            .node_states()
            .unwrap()
            .values()
            .all(|s| *s == ComputationState::Failed)
    );

    client.clean_configuration().unwrap();
    until("every node stopped", || all_in(&nodes, WorkerState::Stopped)).await;
    assert!(client.computation_error().unwrap().is_none());

    shutdown(nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_node_joins_a_running_computation() {
    let (cluster, mut nodes) = start_cluster(&["M"]).await;
    let client = nodes[0].worker_client();
    client
        .prepare_configuration(&WorkerConfiguration::plugin("forever"))
        .await
        .unwrap();
    until("configured", || all_in(&nodes, WorkerState::Configured)).await;
    client.start_computation().unwrap();
    until("executing", || all_in(&nodes, WorkerState::Executing)).await;

    nodes.push(start_node(&cluster, "B").await);
    until("late node executing", || all_in(&nodes, WorkerState::Executing)).await;
    assert_eq!(
        nodes[1].topology().unwrap().master_id().unwrap(),
        Some(NodeId::from("M"))
    );

    client.stop_computation().unwrap();
    until("every node cancelled", || all_in(&nodes, WorkerState::Cancelled)).await;
    shutdown(nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn master_departure_elects_a_new_master() {
    let (_cluster, mut nodes) = start_cluster(&["A", "B", "C"]).await;
    let c = nodes.pop().unwrap();
    c.shutdown().await.unwrap();

    until("re-election", || {
        nodes.iter().all(|n| {
            let t = n.topology().unwrap();
            t.master_id().ok().flatten() == Some(NodeId::from("B"))
                && t.neighbours().is_ok_and(|ns| ns.len() == 2)
        })
    })
    .await;
    assert!(nodes[1].topology().unwrap().is_local_node_master().unwrap());

    shutdown(nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn destroy_stops_every_node() {
    let (_cluster, nodes) = start_cluster(&["A", "B"]).await;
    nodes[0].worker_client().destroy_cluster().unwrap();

    for node in &nodes {
        tokio::time::timeout(Duration::from_secs(2), node.destroyed().cancelled())
            .await
            .unwrap();
        assert!(node.lifecycle().is_terminated() || !node.lifecycle().is_running());
    }
    shutdown(nodes).await;
}

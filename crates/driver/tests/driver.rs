//! Driver scenarios against the simulated network.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use zw_domain::config::Config;
use zw_domain::{CommandClass, InterviewStage, NodeId, NodeStatus};
use zw_node::{InterviewOutcome, JsonFileStore, MemoryStore, NodeEvent, ValueStore};
use zw_protocol::TransmissionError;
use zw_driver::{Driver, DriverError, Scenario, SimulatedNetwork};

fn config() -> Config {
    let mut config = Config::default();
    config.interview.retry_delay_ms = 5;
    config.interview.attempts = 5;
    config.scheduler.transaction_timeout_ms = 1_000;
    config
}

struct Setup {
    driver: Arc<Driver>,
    network: Arc<SimulatedNetwork>,
    scheduler: tokio::task::JoinHandle<()>,
}

impl Setup {
    fn new(scenario: &str, config: &Config, store: Arc<dyn ValueStore>) -> Self {
        let network = Arc::new(SimulatedNetwork::new(Scenario::from_toml(scenario).unwrap()));
        let driver = Driver::new(config, network.clone(), store);
        let scheduler = driver.start();
        for id in network.node_ids() {
            driver.add_node(id);
        }
        Self {
            driver,
            network,
            scheduler,
        }
    }

    async fn stop(self) {
        self.driver.shutdown();
        self.scheduler.await.unwrap();
    }
}

fn drain(rx: &mut broadcast::Receiver<NodeEvent>) -> Vec<NodeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

const SWITCH: &str = r#"
    [[nodes]]
    id = 2
    supported = [0x25, 0x86]
    firmware = { major = 2, minor = 1 }
"#;

#[tokio::test]
async fn transient_failures_are_retried() {
    let scenario = r#"
        [[nodes]]
        id = 2
        supported = [0x25, 0x86]

        [[nodes.failures]]
        probe = "node_info"
        error = "no_ack"
        times = 2
    "#;
    let setup = Setup::new(scenario, &config(), Arc::new(MemoryStore::new()));

    let outcome = setup.driver.interview_node(NodeId(2)).await.unwrap();
    assert_eq!(outcome, InterviewOutcome::Complete);

    let node = setup.driver.node(NodeId(2)).unwrap();
    {
        let n = node.lock();
        assert_eq!(n.stage(), InterviewStage::Complete);
        assert_eq!(n.status(), NodeStatus::Alive);
        assert!(n.is_ready());
    }
    setup.stop().await;
}

#[tokio::test]
async fn exhausted_retries_publish_a_soft_failure() {
    let scenario = r#"
        [[nodes]]
        id = 2
        supported = [0x25]

        [[nodes.failures]]
        probe = "node_info"
        error = "no_ack"
        times = 10
    "#;
    let mut cfg = config();
    cfg.interview.attempts = 2;
    let setup = Setup::new(scenario, &cfg, Arc::new(MemoryStore::new()));
    let mut rx = setup.driver.subscribe();

    let outcome = setup.driver.interview_node(NodeId(2)).await.unwrap();
    assert_eq!(
        outcome,
        InterviewOutcome::Incomplete {
            stage: InterviewStage::ProtocolInfo,
            error: TransmissionError::NoAck,
        }
    );

    let failed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, NodeEvent::InterviewFailed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(failed[0], NodeEvent::InterviewFailed { fatal: false, .. }));
    assert!(!setup.driver.is_interviewing(NodeId(2)));
    setup.stop().await;
}

#[tokio::test]
async fn sleeping_node_resumes_on_wake_up() {
    let scenario = r#"
        [[nodes]]
        id = 7
        listening = false
        asleep = true
        supported = [0x84, 0x86, 0x80]
    "#;
    let setup = Setup::new(scenario, &config(), Arc::new(MemoryStore::new()));
    let mut rx = setup.driver.subscribe();

    let outcome = setup.driver.interview_node(NodeId(7)).await.unwrap();
    assert_eq!(
        outcome,
        InterviewOutcome::Incomplete {
            stage: InterviewStage::ProtocolInfo,
            error: TransmissionError::Timeout,
        }
    );
    let node = setup.driver.node(NodeId(7)).unwrap();
    assert_eq!(node.lock().status(), NodeStatus::Asleep);

    // An asleep node is not retried, so no soft failure either.
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, NodeEvent::InterviewFailed { .. })));

    setup.network.wake(NodeId(7));
    let handle = setup.driver.on_wake_up(NodeId(7)).unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), InterviewOutcome::Complete);

    let events = drain(&mut rx);
    assert!(events.contains(&NodeEvent::Ready {
        node_id: NodeId(7),
        from_cache: false,
    }));
    assert_eq!(node.lock().status(), NodeStatus::Awake);

    // Finished nodes are not interviewed again on the next wake-up.
    assert!(setup.driver.on_wake_up(NodeId(7)).is_none());
    setup.driver.on_sleep(NodeId(7));
    assert_eq!(node.lock().status(), NodeStatus::Asleep);
    setup.stop().await;
}

#[tokio::test]
async fn removal_is_rejected_while_interviewing() {
    let scenario = r#"
        latency_ms = 30

        [[nodes]]
        id = 2
        supported = [0x25, 0x86]
    "#;
    let store = Arc::new(MemoryStore::new());
    let setup = Setup::new(scenario, &config(), store.clone());

    let handle = setup.driver.spawn_interview(NodeId(2));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(matches!(
        setup.driver.remove_node(NodeId(2)),
        Err(DriverError::InterviewInProgress(NodeId(2)))
    ));
    // A second interview of the same node is refused too.
    assert!(matches!(
        setup.driver.interview_node(NodeId(2)).await,
        Err(DriverError::InterviewInProgress(NodeId(2)))
    ));

    assert_eq!(handle.await.unwrap().unwrap(), InterviewOutcome::Complete);
    assert!(!store.is_empty());

    setup.driver.remove_node(NodeId(2)).unwrap();
    assert!(setup.driver.node(NodeId(2)).is_none());
    assert!(setup.driver.cache().node_ids().is_empty());
    assert!(matches!(
        setup.driver.remove_node(NodeId(2)),
        Err(DriverError::NodeNotFound(NodeId(2)))
    ));
    // A removed node cannot be claimed again.
    assert!(matches!(
        setup.driver.spawn_interview(NodeId(2)).await.unwrap(),
        Err(DriverError::NodeNotFound(NodeId(2)))
    ));
    setup.stop().await;
}

#[tokio::test]
async fn single_cc_interview_waits_for_the_slot() {
    let scenario = r#"
        latency_ms = 30

        [[nodes]]
        id = 2
        supported = [0x25, 0x86]
    "#;
    let setup = Setup::new(scenario, &config(), Arc::new(MemoryStore::new()));

    let handle = setup.driver.spawn_interview(NodeId(2));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(matches!(
        setup.driver.interview_cc(NodeId(2), 0, CommandClass::SWITCH_BINARY).await,
        Err(DriverError::InterviewInProgress(NodeId(2)))
    ));

    assert_eq!(handle.await.unwrap().unwrap(), InterviewOutcome::Complete);
    setup
        .driver
        .interview_cc(NodeId(2), 0, CommandClass::SWITCH_BINARY)
        .await
        .unwrap();
    setup.stop().await;
}

#[tokio::test]
async fn cancelled_refresh_releases_the_node() {
    let scenario = r#"
        latency_ms = 200

        [[nodes]]
        id = 2
        supported = [0x25, 0x86]
    "#;
    let setup = Setup::new(scenario, &config(), Arc::new(MemoryStore::new()));

    let cut_short =
        tokio::time::timeout(Duration::from_millis(50), setup.driver.refresh_info(NodeId(2))).await;
    assert!(cut_short.is_err());

    let node = setup.driver.node(NodeId(2)).unwrap();
    {
        let n = node.lock();
        assert!(!n.refresh_pending());
        assert!(!n.is_interviewing());
    }
    assert!(!setup.driver.is_interviewing(NodeId(2)));

    // A new refresh starts real work instead of returning `None` at once.
    let again =
        tokio::time::timeout(Duration::from_millis(50), setup.driver.refresh_info(NodeId(2))).await;
    assert!(again.is_err());

    setup.driver.remove_node(NodeId(2)).unwrap();
    assert!(setup.driver.node(NodeId(2)).is_none());
    setup.stop().await;
}

#[tokio::test]
async fn refresh_is_a_no_op_while_one_is_pending() {
    let scenario = r#"
        latency_ms = 30

        [[nodes]]
        id = 2
        supported = [0x25, 0x86]
    "#;
    let setup = Setup::new(scenario, &config(), Arc::new(MemoryStore::new()));
    assert_eq!(
        setup.driver.interview_node(NodeId(2)).await.unwrap(),
        InterviewOutcome::Complete
    );

    let driver = setup.driver.clone();
    let first = tokio::spawn(async move { driver.refresh_info(NodeId(2)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(setup.driver.refresh_info(NodeId(2)).await.unwrap().is_none());
    assert_eq!(
        first.await.unwrap().unwrap(),
        Some(InterviewOutcome::Complete)
    );

    let node = setup.driver.node(NodeId(2)).unwrap();
    assert!(!node.lock().refresh_pending());
    assert_eq!(node.lock().stage(), InterviewStage::Complete);
    setup.stop().await;
}

#[tokio::test]
async fn completed_nodes_restore_ready_from_cache() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let setup = Setup::new(SWITCH, &config(), store);
        assert_eq!(
            setup.driver.interview_node(NodeId(2)).await.unwrap(),
            InterviewOutcome::Complete
        );
        setup.stop().await;
    }

    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let network = Arc::new(SimulatedNetwork::new(Scenario::from_toml(SWITCH).unwrap()));
    let driver = Driver::new(&config(), network.clone(), store);
    let mut rx = driver.subscribe();

    assert_eq!(driver.restore_from_cache().unwrap(), vec![NodeId(2)]);
    assert_eq!(
        drain(&mut rx),
        vec![NodeEvent::Ready {
            node_id: NodeId(2),
            from_cache: true,
        }]
    );

    let node = driver.node(NodeId(2)).unwrap();
    assert_eq!(node.lock().stage(), InterviewStage::Complete);
    assert!(node.lock().is_ready());

    // Nothing to resume, and no traffic needed for a finished node.
    assert!(driver.resume_incomplete().is_empty());
    let scheduler = driver.start();
    assert_eq!(
        driver.interview_node(NodeId(2)).await.unwrap(),
        InterviewOutcome::Complete
    );
    assert_eq!(network.transmissions(), 0);
    driver.shutdown();
    scheduler.await.unwrap();
}

#[tokio::test]
async fn interview_all_covers_every_node() {
    let scenario = r#"
        [[nodes]]
        id = 2
        supported = [0x25, 0x86]

        [[nodes]]
        id = 3
        supported = [0x26, 0x86]

        [[nodes]]
        id = 4
        listening = false
        asleep = true
        supported = [0x84]
    "#;
    let setup = Setup::new(scenario, &config(), Arc::new(MemoryStore::new()));

    let results = setup.driver.interview_all().await;
    let ids: Vec<NodeId> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![NodeId(2), NodeId(3), NodeId(4)]);

    let complete = results
        .iter()
        .filter(|(_, r)| matches!(r, Ok(InterviewOutcome::Complete)))
        .count();
    assert_eq!(complete, 2);
    assert_eq!(setup.driver.nodes()[2].status, NodeStatus::Asleep);
    setup.stop().await;
}

#[tokio::test]
async fn unknown_nodes_are_reported() {
    let setup = Setup::new(SWITCH, &config(), Arc::new(MemoryStore::new()));
    assert!(matches!(
        setup.driver.interview_node(NodeId(99)).await,
        Err(DriverError::NodeNotFound(NodeId(99)))
    ));
    assert!(setup.driver.on_wake_up(NodeId(99)).is_none());
    setup.stop().await;
}

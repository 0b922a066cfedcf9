//! `zwave-host simulate`: interview every node of a scenario file and print
//! the resulting node table.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use zw_domain::config::{Config, ConfigSeverity};
use zw_node::{InterviewOutcome, JsonFileStore, MemoryStore, ValueStore};

use crate::driver::{Driver, InterviewResult};
use crate::sim::{Scenario, SimulatedNetwork};

pub async fn run(config: Config, scenario_path: &Path, persist: bool) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!(field = %issue.field, "{}", issue.message),
            ConfigSeverity::Error => tracing::error!(field = %issue.field, "{}", issue.message),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("config has errors, run `zwave-host config validate`");
    }

    let scenario = Scenario::load(scenario_path)
        .with_context(|| format!("loading scenario {}", scenario_path.display()))?;
    let network = Arc::new(SimulatedNetwork::new(scenario));

    let store: Arc<dyn ValueStore> = if persist {
        Arc::new(
            JsonFileStore::open(&config.storage.cache_dir)
                .with_context(|| format!("opening cache in {}", config.storage.cache_dir.display()))?,
        )
    } else {
        Arc::new(MemoryStore::new())
    };

    let driver = Driver::new(&config, network.clone(), store);
    let scheduler = driver.start();

    let restored = driver.restore_from_cache()?;
    for id in network.node_ids() {
        driver.add_node(id);
    }
    tracing::info!(
        nodes = network.node_ids().len(),
        restored = restored.len(),
        "interviewing simulated network"
    );

    for (id, result) in driver.interview_all().await {
        report(id, &result);
    }

    // Sleeping nodes announce themselves once; their interviews resume.
    for id in network.node_ids() {
        if !network.is_asleep(id) {
            continue;
        }
        network.wake(id);
        if let Some(handle) = driver.on_wake_up(id) {
            let result = handle.await.context("interview task panicked")?;
            report(id, &result);
        }
    }

    let nodes = driver.nodes();
    println!("{}", serde_json::to_string_pretty(&nodes)?);

    driver.shutdown();
    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "scheduler task ended abnormally");
    }
    Ok(())
}

fn report(id: zw_domain::NodeId, result: &InterviewResult) {
    match result {
        Ok(InterviewOutcome::Complete) => tracing::info!(node_id = %id, "interview complete"),
        Ok(InterviewOutcome::Incomplete { stage, error }) => {
            tracing::warn!(node_id = %id, stage = ?stage, error = %error, "interview incomplete")
        }
        Err(e) => tracing::error!(node_id = %id, error = %e, "interview failed"),
    }
}

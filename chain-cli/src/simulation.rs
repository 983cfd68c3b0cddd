//! Shards and clients running in one process

use crate::{SimulationResult, SimulationSettings};
use chain_client::{shard_accounts, Client, OutcomeReport, WorkloadGenerator};
use chain_core::{Balance, BlockNumber, Clock, ShardId, SystemClock, Transaction};
use chain_network::{HubConfig, LocalHub};
use chain_node::{Committee, LocalBeaconChain};
use chain_vm::{Account, MemoryLedger, SharedLedger};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Final state of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSummary {
    pub shard_id: ShardId,
    pub height: BlockNumber,
    pub total_balance: Balance,
}

/// Result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutcome {
    /// Every client settled before the deadline
    pub finished: bool,
    pub elapsed_ms: u128,
    pub initial_supply: Balance,
    pub final_supply: Balance,
    pub shards: Vec<ShardSummary>,
    /// Completed transfers per second
    pub throughput: f64,
    pub rollback_rate: f64,
    pub average_latency_secs: Option<f64>,
    pub max_latency_secs: Option<u64>,
    pub min_latency_secs: Option<u64>,
    /// All clients combined
    pub report: OutcomeReport,
    pub clients: Vec<OutcomeReport>,
}

/// A running simulation
pub struct Simulation {
    settings: SimulationSettings,
    hub: Arc<LocalHub>,
    beacon: Arc<LocalBeaconChain>,
    committees: Vec<Committee>,
    clients: Vec<Arc<Client>>,
    client_tasks: Vec<JoinHandle<()>>,
    initial_supply: Balance,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("shards", &self.committees.len())
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl Simulation {
    /// Start with a generated workload per client
    pub fn start(settings: SimulationSettings) -> SimulationResult<Self> {
        settings.validate()?;
        let mut workloads = Vec::with_capacity(settings.client_count as usize);
        for client_id in 0..settings.client_count {
            let seed = settings.seed.wrapping_add(u64::from(client_id));
            let mut generator = WorkloadGenerator::new(settings.workload_config(), seed)?;
            workloads.push(generator.generate(client_id));
        }
        Self::start_with_workloads(settings, workloads)
    }

    /// Start with one explicit workload per client
    pub fn start_with_workloads(
        settings: SimulationSettings,
        workloads: Vec<Vec<Transaction>>,
    ) -> SimulationResult<Self> {
        settings.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let hub = Arc::new(LocalHub::new(
            HubConfig::new().with_encoding(settings.encode_messages),
        )?);
        let beacon = Arc::new(LocalBeaconChain::new(clock.clone()));
        let cancel = CancellationToken::new();

        let balance = Balance::from(settings.initial_balance);
        let mut committees = Vec::with_capacity(settings.shard_count as usize);
        let mut initial_supply: Balance = 0;
        for shard_id in 0..settings.shard_count {
            let accounts =
                shard_accounts(shard_id, settings.accounts_per_shard, settings.shard_count)
                    .into_iter()
                    .map(|address| (address, Account::with_balance(balance)));
            let ledger = SharedLedger::new(MemoryLedger::with_accounts(accounts));
            initial_supply += ledger.total_balance();

            committees.push(Committee::start(
                shard_id,
                settings.committee.clone(),
                hub.clone(),
                beacon.clone(),
                clock.clone(),
                ledger,
                &cancel,
            )?);
        }

        let mut clients = Vec::with_capacity(workloads.len());
        let mut client_tasks = Vec::with_capacity(workloads.len());
        for (client_id, workload) in (0u32..).zip(workloads) {
            let client = Arc::new(Client::new(
                settings.client_config(client_id),
                workload,
                hub.clone(),
                clock.clone(),
            )?);
            let inbox = hub.register(client.endpoint());
            let runner = client.clone();
            let client_cancel = cancel.clone();
            client_tasks.push(tokio::spawn(async move {
                if let Err(e) = runner.run(inbox, client_cancel).await {
                    warn!("Client {} exited: {}", client_id, e);
                }
            }));
            clients.push(client);
        }

        info!(
            "Simulation started: {} shards, {} clients, supply {}",
            committees.len(),
            clients.len(),
            initial_supply
        );
        Ok(Self {
            settings,
            hub,
            beacon,
            committees,
            clients,
            client_tasks,
            initial_supply,
            cancel,
        })
    }

    pub fn hub(&self) -> &Arc<LocalHub> {
        &self.hub
    }

    pub fn beacon(&self) -> &Arc<LocalBeaconChain> {
        &self.beacon
    }

    pub fn committee(&self, shard_id: ShardId) -> Option<&Committee> {
        self.committees.get(shard_id as usize)
    }

    pub fn clients(&self) -> &[Arc<Client>] {
        &self.clients
    }

    pub fn is_finished(&self) -> bool {
        self.clients.iter().all(|client| client.is_finished())
    }

    /// Wait for every client to settle or for the deadline, then stop
    pub async fn run_to_completion(self) -> SimulationResult<SimulationOutcome> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.settings.max_duration_secs);
        while !self.is_finished() && started.elapsed() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        let finished = self.is_finished();
        if !finished {
            warn!("Simulation stopped at the {:?} deadline with transfers in flight", deadline);
        }
        self.shutdown(finished, started.elapsed()).await
    }

    async fn shutdown(self, finished: bool, elapsed: Duration) -> SimulationResult<SimulationOutcome> {
        self.cancel.cancel();
        for task in self.client_tasks {
            if let Err(e) = task.await {
                warn!("Client task ended abnormally: {}", e);
            }
        }

        let mut shards = Vec::with_capacity(self.committees.len());
        for committee in self.committees {
            shards.push(ShardSummary {
                shard_id: committee.shard_id(),
                height: committee.height(),
                total_balance: committee.ledger().total_balance(),
            });
            committee.shutdown().await;
        }

        let clients: Vec<OutcomeReport> = self.clients.iter().map(|client| client.report()).collect();
        let mut report = OutcomeReport::default();
        for client in &clients {
            report.merge(client);
        }
        let final_supply = shards.iter().map(|shard| shard.total_balance).sum();

        info!(
            "Simulation done in {:?}: {} completed, {} rolled back, {} failed, {} in flight",
            elapsed, report.completed, report.rolled_back, report.failed, report.in_flight
        );
        info!(
            "Throughput {:.2} tx/s, rollback rate {:.3}, average latency {:?}s",
            report.throughput,
            report.rollback_rate,
            report.latency.average_secs()
        );
        Ok(SimulationOutcome {
            finished,
            elapsed_ms: elapsed.as_millis(),
            initial_supply: self.initial_supply,
            final_supply,
            shards,
            throughput: report.throughput,
            rollback_rate: report.rollback_rate,
            average_latency_secs: report.latency.average_secs(),
            max_latency_secs: report.latency.max_secs,
            min_latency_secs: report.latency.min_secs,
            report,
            clients,
        })
    }
}

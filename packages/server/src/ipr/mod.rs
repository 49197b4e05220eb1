//! Instance Pool Registry (IPR): the in-memory mirror of active worker VMs
//! (spec.md §2, §3).
//!
//! Design Notes (spec.md §9): "In-process instance table (IPR) is shared
//! mutable state; give it a single owner goroutine/task that serialises
//! reservations and releases, with other components communicating through
//! a request channel or a mutex." This is the task/channel form: a single
//! actor task owns a `HashMap<String, InstanceEntry>`; every other
//! component talks to it through [`IprHandle`], whose methods send a
//! command and await the reply on a oneshot channel.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::db::models::InstanceState;

/// A read-only snapshot of one instance, returned to callers that don't
/// need to mutate the registry (the reconcile loop, status endpoints).
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub name: String,
    pub pool_name: String,
    pub address: String,
    pub state: InstanceState,
    pub total_cores_mcpu: i64,
    pub free_cores_mcpu: i64,
    pub failed_request_count: u32,
    pub last_heartbeat: DateTime<Utc>,
}

struct InstanceEntry {
    pool_name: String,
    address: String,
    state: InstanceState,
    total_cores_mcpu: i64,
    free_cores_mcpu: i64,
    failed_request_count: u32,
    last_heartbeat: DateTime<Utc>,
}

impl InstanceEntry {
    fn snapshot(&self, name: &str) -> InstanceSnapshot {
        InstanceSnapshot {
            name: name.to_string(),
            pool_name: self.pool_name.clone(),
            address: self.address.clone(),
            state: self.state,
            total_cores_mcpu: self.total_cores_mcpu,
            free_cores_mcpu: self.free_cores_mcpu,
            failed_request_count: self.failed_request_count,
            last_heartbeat: self.last_heartbeat,
        }
    }
}

enum Command {
    Register {
        name: String,
        pool_name: String,
        address: String,
        total_cores_mcpu: i64,
    },
    /// First-fit reservation: picks the active instance in `pool_name`
    /// with the least free capacity that still satisfies `cores_mcpu`
    /// (spec.md §4.3: "first-fit over instances ordered by (free_cores_mcpu
    /// ascending, name ascending)"), reserves the cores in-memory, and
    /// replies with the chosen instance name.
    Reserve {
        pool_name: String,
        cores_mcpu: i64,
        reply: oneshot::Sender<Option<String>>,
    },
    /// Compensates a reservation whose `schedule_job` call failed, or
    /// releases cores on job completion.
    Release {
        name: String,
        cores_mcpu: i64,
    },
    Heartbeat {
        name: String,
    },
    RecordFailure {
        name: String,
        reply: oneshot::Sender<u32>,
    },
    SetState {
        name: String,
        state: InstanceState,
    },
    Remove {
        name: String,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<InstanceSnapshot>>,
    },
}

/// Cheaply cloneable front for the IPR actor. Every clone shares the same
/// underlying task, so reservations across concurrent callers (the
/// scheduler loop and completion ingest) are serialized through the
/// actor's single-threaded mailbox — no lock needed.
#[derive(Clone)]
pub struct IprHandle {
    tx: mpsc::Sender<Command>,
}

impl IprHandle {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(rx));
        Self { tx }
    }

    pub async fn register(&self, name: String, pool_name: String, address: String, total_cores_mcpu: i64) {
        let _ = self
            .tx
            .send(Command::Register {
                name,
                pool_name,
                address,
                total_cores_mcpu,
            })
            .await;
    }

    /// Reserves cores against the best-fit active instance in `pool_name`.
    /// Returns `None` if no instance currently has enough free capacity.
    pub async fn reserve(&self, pool_name: &str, cores_mcpu: i64) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Reserve {
                pool_name: pool_name.to_string(),
                cores_mcpu,
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Returns cores reserved by [`IprHandle::reserve`] that were never
    /// dispatched (the `schedule_job` call reported `WrongState`), or
    /// releases cores held by a completed/unscheduled attempt.
    pub async fn release(&self, name: &str, cores_mcpu: i64) {
        let _ = self
            .tx
            .send(Command::Release {
                name: name.to_string(),
                cores_mcpu,
            })
            .await;
    }

    pub async fn heartbeat(&self, name: &str) {
        let _ = self
            .tx
            .send(Command::Heartbeat { name: name.to_string() })
            .await;
    }

    /// Increments the instance's failure counter and returns the new
    /// count, for the reconcile loop's sustained-failure threshold.
    pub async fn record_failure(&self, name: &str) -> u32 {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::RecordFailure {
                name: name.to_string(),
                reply,
            })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn set_state(&self, name: &str, state: InstanceState) {
        let _ = self
            .tx
            .send(Command::SetState {
                name: name.to_string(),
                state,
            })
            .await;
    }

    pub async fn remove(&self, name: &str) {
        let _ = self.tx.send(Command::Remove { name: name.to_string() }).await;
    }

    pub async fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

async fn run(mut rx: mpsc::Receiver<Command>) {
    let mut instances: HashMap<String, InstanceEntry> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Register {
                name,
                pool_name,
                address,
                total_cores_mcpu,
            } => {
                instances.insert(
                    name,
                    InstanceEntry {
                        pool_name,
                        address,
                        state: InstanceState::Pending,
                        total_cores_mcpu,
                        free_cores_mcpu: total_cores_mcpu,
                        failed_request_count: 0,
                        last_heartbeat: Utc::now(),
                    },
                );
            }
            Command::Reserve {
                pool_name,
                cores_mcpu,
                reply,
            } => {
                let mut candidates: Vec<(&String, &InstanceEntry)> = instances
                    .iter()
                    .filter(|(_, e)| {
                        e.pool_name == pool_name
                            && e.state == InstanceState::Active
                            && e.free_cores_mcpu >= cores_mcpu
                    })
                    .collect();
                candidates.sort_by(|a, b| {
                    a.1.free_cores_mcpu
                        .cmp(&b.1.free_cores_mcpu)
                        .then_with(|| a.0.cmp(b.0))
                });
                let chosen = candidates.first().map(|(name, _)| (*name).clone());
                if let Some(name) = &chosen {
                    if let Some(entry) = instances.get_mut(name) {
                        entry.free_cores_mcpu -= cores_mcpu;
                    }
                }
                let _ = reply.send(chosen);
            }
            Command::Release { name, cores_mcpu } => {
                if let Some(entry) = instances.get_mut(&name) {
                    entry.free_cores_mcpu = (entry.free_cores_mcpu + cores_mcpu).min(entry.total_cores_mcpu);
                }
            }
            Command::Heartbeat { name } => {
                if let Some(entry) = instances.get_mut(&name) {
                    entry.last_heartbeat = Utc::now();
                    entry.failed_request_count = 0;
                }
            }
            Command::RecordFailure { name, reply } => {
                let count = if let Some(entry) = instances.get_mut(&name) {
                    entry.failed_request_count += 1;
                    entry.failed_request_count
                } else {
                    0
                };
                let _ = reply.send(count);
            }
            Command::SetState { name, state } => {
                if let Some(entry) = instances.get_mut(&name) {
                    entry.state = state;
                }
            }
            Command::Remove { name } => {
                instances.remove(&name);
            }
            Command::Snapshot { reply } => {
                let snapshot = instances.iter().map(|(name, e)| e.snapshot(name)).collect();
                let _ = reply.send(snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_picks_best_fit_instance() {
        let ipr = IprHandle::spawn();
        ipr.register("a".into(), "default".into(), "10.0.0.1".into(), 16_000).await;
        ipr.register("b".into(), "default".into(), "10.0.0.2".into(), 16_000).await;
        ipr.set_state("a", InstanceState::Active).await;
        ipr.set_state("b", InstanceState::Active).await;

        // Drain instance "a" down to 2000 free so it's the tighter fit.
        ipr.reserve("default", 14_000).await;

        let chosen = ipr.reserve("default", 1_000).await;
        assert_eq!(chosen, Some("a".to_string()));
    }

    #[tokio::test]
    async fn reserve_returns_none_when_no_capacity() {
        let ipr = IprHandle::spawn();
        ipr.register("a".into(), "default".into(), "10.0.0.1".into(), 1_000).await;
        ipr.set_state("a", InstanceState::Active).await;
        let chosen = ipr.reserve("default", 2_000).await;
        assert_eq!(chosen, None);
    }

    #[tokio::test]
    async fn release_restores_capacity() {
        let ipr = IprHandle::spawn();
        ipr.register("a".into(), "default".into(), "10.0.0.1".into(), 1_000).await;
        ipr.set_state("a", InstanceState::Active).await;
        ipr.reserve("default", 1_000).await;
        assert_eq!(ipr.reserve("default", 1_000).await, None);
        ipr.release("a", 1_000).await;
        assert_eq!(ipr.reserve("default", 1_000).await, Some("a".to_string()));
    }
}

//! Tenant admission control.
//!
//! At most `max_active_users` tenants hold an active slot; the rest queue
//! FIFO on first-queued order. A slot is released only when the tenant's
//! total non-terminal job count reaches zero, so a tenant chaining
//! workflows does not bounce through the queue.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a tenant stands with respect to the slot pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionState {
    /// Holds a slot; its jobs are dispatchable.
    Active,
    /// Has non-terminal jobs but no slot.
    Queued,
    /// No non-terminal jobs.
    Idle,
}

#[derive(Debug)]
struct Tenant {
    workflows: HashSet<Uuid>,
    non_terminal_jobs: usize,
    state: AdmissionState,
    /// Monotonic admission order, for deterministic scheduling fairness.
    admitted_seq: Option<u64>,
}

impl Tenant {
    fn new() -> Self {
        Self {
            workflows: HashSet::new(),
            non_terminal_jobs: 0,
            state: AdmissionState::Idle,
            admitted_seq: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantSnapshot {
    pub active_users: usize,
    pub queued_users: usize,
    pub max_active_users: usize,
}

struct Inner {
    tenants: HashMap<String, Tenant>,
    wait_queue: VecDeque<String>,
    active_count: usize,
    admission_counter: u64,
}

impl Inner {
    fn admit(&mut self, user_id: &str, max_active: usize) {
        self.admission_counter += 1;
        let seq = self.admission_counter;
        if let Some(tenant) = self.tenants.get_mut(user_id) {
            tenant.state = AdmissionState::Active;
            tenant.admitted_seq = Some(seq);
            self.active_count += 1;
            info!(
                user_id,
                active = self.active_count,
                max_active,
                "Tenant admitted"
            );
        } else {
            warn!(user_id, "Admission for unknown tenant ignored");
        }
    }

    fn admit_next(&mut self, max_active: usize) -> bool {
        match self.wait_queue.pop_front() {
            Some(next) => {
                self.admit(&next, max_active);
                true
            }
            None => false,
        }
    }
}

pub struct TenantManager {
    max_active_users: usize,
    inner: Mutex<Inner>,
}

impl TenantManager {
    pub fn new(max_active_users: usize) -> Self {
        info!(max_active_users, "Tenant manager initialized");
        Self {
            max_active_users,
            inner: Mutex::new(Inner {
                tenants: HashMap::new(),
                wait_queue: VecDeque::new(),
                active_count: 0,
                admission_counter: 0,
            }),
        }
    }

    /// Account a submitted workflow against its tenant and admit or queue.
    ///
    /// Idempotent by (user, workflow): re-registering a known workflow
    /// changes nothing. A tenant that is already Active or Queued keeps its
    /// position.
    pub fn register(
        &self,
        user_id: &str,
        workflow_id: Uuid,
        job_count: usize,
    ) -> AdmissionState {
        let mut inner = self.inner.lock();

        let state = {
            let tenant = inner
                .tenants
                .entry(user_id.to_string())
                .or_insert_with(Tenant::new);
            if !tenant.workflows.insert(workflow_id) {
                return tenant.state;
            }
            tenant.non_terminal_jobs += job_count;
            tenant.state
        };

        match state {
            AdmissionState::Active | AdmissionState::Queued => state,
            AdmissionState::Idle => {
                if inner.active_count < self.max_active_users {
                    inner.admit(user_id, self.max_active_users);
                    AdmissionState::Active
                } else {
                    if let Some(tenant) = inner.tenants.get_mut(user_id) {
                        tenant.state = AdmissionState::Queued;
                    }
                    inner.wait_queue.push_back(user_id.to_string());
                    info!(
                        user_id,
                        queue_depth = inner.wait_queue.len(),
                        "Tenant queued, no slot available"
                    );
                    AdmissionState::Queued
                }
            }
        }
    }

    /// Account one of the tenant's jobs reaching a terminal state.
    ///
    /// Returns whether a queued tenant was admitted as a result, so the
    /// scheduler knows new work may have become dispatchable.
    pub fn on_job_terminal(&self, user_id: &str) -> bool {
        let mut inner = self.inner.lock();

        let (drained, state) = {
            let Some(tenant) = inner.tenants.get_mut(user_id) else {
                return false;
            };
            tenant.non_terminal_jobs = tenant.non_terminal_jobs.saturating_sub(1);
            (tenant.non_terminal_jobs == 0, tenant.state)
        };
        if !drained {
            return false;
        }

        match state {
            AdmissionState::Active => {
                if let Some(tenant) = inner.tenants.get_mut(user_id) {
                    tenant.state = AdmissionState::Idle;
                    tenant.admitted_seq = None;
                }
                inner.active_count -= 1;
                info!(user_id, "Tenant drained, slot released");
                inner.admit_next(self.max_active_users)
            }
            AdmissionState::Queued => {
                // Drained while waiting (everything cancelled): leave the
                // queue without ever taking a slot.
                if let Some(tenant) = inner.tenants.get_mut(user_id) {
                    tenant.state = AdmissionState::Idle;
                }
                inner.wait_queue.retain(|queued| queued != user_id);
                debug!(user_id, "Queued tenant drained, removed from queue");
                false
            }
            AdmissionState::Idle => false,
        }
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.inner
            .lock()
            .tenants
            .get(user_id)
            .map(|t| t.state == AdmissionState::Active)
            .unwrap_or(false)
    }

    /// Active tenants in admission order.
    pub fn active_ordered(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut active: Vec<(u64, String)> = inner
            .tenants
            .iter()
            .filter_map(|(user, tenant)| tenant.admitted_seq.map(|seq| (seq, user.clone())))
            .collect();
        active.sort_by_key(|(seq, _)| *seq);
        active.into_iter().map(|(_, user)| user).collect()
    }

    pub fn snapshot(&self) -> TenantSnapshot {
        let inner = self.inner.lock();
        TenantSnapshot {
            active_users: inner.active_count,
            queued_users: inner.wait_queue.len(),
            max_active_users: self.max_active_users,
        }
    }
}

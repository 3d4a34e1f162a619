//! Credential pool: per-model FIFO queues with quota bookkeeping,
//! write-through status persistence, and periodic recovery.
//!
//! Locking discipline: queue guards before status guards before the
//! retired set, everywhere. The retired set is only ever locked with no
//! map guard held by collecting pending work into locals first.

pub mod entry;
pub mod persistence;
#[cfg(test)]
mod tests;

pub use entry::{RetiredToken, SsoId, TokenEntry, TokenStatus};

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{self, Tier};
use crate::{AppError, AppResult};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Single source of truth for which credential serves the next request
/// for a given model family.
pub struct CredentialPool {
    /// Model family → FIFO of credentials. The head serves requests until
    /// it is exhausted or retired.
    queues: DashMap<String, VecDeque<TokenEntry>>,
    /// Session identity → family → persisted validity record.
    status: DashMap<String, HashMap<String, TokenStatus>>,
    /// Credentials removed from their queue, awaiting recovery.
    retired: Mutex<HashSet<RetiredToken>>,
    status_path: PathBuf,
}

impl CredentialPool {
    /// Opens the pool, restoring persisted status records. Queues start
    /// empty; callers re-enroll bootstrap tokens afterwards.
    pub fn new(status_path: PathBuf) -> Self {
        let status = DashMap::new();
        for (sso, records) in persistence::load(&status_path) {
            status.insert(sso, records);
        }
        Self {
            queues: DashMap::new(),
            status,
            retired: Mutex::new(HashSet::new()),
            status_path,
        }
    }

    /// Enrolls a raw session token into every family of its tier's quota
    /// table. Idempotent per (token, family). `bootstrap` batches
    /// persistence: the caller saves once after enrolling the whole list.
    pub fn enroll(&self, token: &str, tier: Tier, bootstrap: bool) -> AppResult<()> {
        let sso = SsoId::parse(token)
            .ok_or_else(|| AppError::InvalidRequest("invalid session token format".into()))?;
        let now = now_ms();
        for family in models::families_for_tier(tier) {
            let Some(rule) = models::quota_rule(family, tier) else { continue };
            let mut queue = self.queues.entry(family.to_string()).or_default();
            if queue.iter().any(|e| e.token == token) {
                continue;
            }
            queue.push_back(TokenEntry::new(token, rule.request_limit, tier, now));
            self.status
                .entry(sso.as_str().to_string())
                .or_default()
                .entry(family.to_string())
                .or_insert_with(|| TokenStatus::fresh(tier));
        }
        if !bootstrap {
            self.persist();
        }
        Ok(())
    }

    /// Discards every queue, status record, and retired entry, then
    /// enrolls a single token as the sole credential. Used when each
    /// caller supplies its own session.
    pub async fn replace(&self, token: &str, tier: Tier) -> AppResult<()> {
        SsoId::parse(token)
            .ok_or_else(|| AppError::InvalidRequest("invalid session token format".into()))?;
        self.queues.clear();
        self.status.clear();
        self.retired.lock().await.clear();
        self.enroll(token, tier, true)?;
        self.persist();
        Ok(())
    }

    /// Deletes a token from every queue, its status record, and any
    /// pending retirement, so it can never be served again. Idempotent.
    pub async fn remove(&self, token: &str) -> AppResult<()> {
        let sso = SsoId::parse(token)
            .ok_or_else(|| AppError::InvalidRequest("invalid session token format".into()))?;
        for mut queue in self.queues.iter_mut() {
            queue.value_mut().retain(|e| e.token != token);
        }
        self.status.remove(sso.as_str());
        self.retired.lock().await.retain(|r| r.token != token);
        self.persist();
        info!(sso = %sso, "credential removed from pool");
        Ok(())
    }

    /// Selects the credential that serves the next request for `model`.
    ///
    /// Pops exhausted or invalidated heads into the retired set until a
    /// usable credential surfaces. With `peek_only` the token is returned
    /// without touching counters; otherwise the use is charged, the usage
    /// window lazily started, and the status flipped to invalid the
    /// moment the charge reaches the quota.
    pub async fn next(&self, model: &str, peek_only: bool) -> Option<String> {
        let family = models::quota_family(model)?;
        let now = now_ms();
        let mut newly_retired: Vec<RetiredToken> = Vec::new();
        let mut mutated = false;

        let selected = {
            let mut queue = self.queues.get_mut(family)?;
            loop {
                let Some(front) = queue.front().cloned() else { break None };
                let Some(sso) = SsoId::parse(&front.token) else {
                    queue.pop_front();
                    mutated = true;
                    continue;
                };
                let invalidated = self
                    .status
                    .get(sso.as_str())
                    .and_then(|records| records.get(family).map(|s| !s.is_valid))
                    .unwrap_or(false);
                if invalidated || front.request_count >= front.max_request_count {
                    debug!(
                        family,
                        used = front.request_count,
                        max = front.max_request_count,
                        "head credential unusable, retiring"
                    );
                    if let Some(mut records) = self.status.get_mut(sso.as_str()) {
                        if let Some(record) = records.get_mut(family) {
                            record.is_valid = false;
                            record.invalidated_at_ms.get_or_insert(now);
                        }
                    }
                    newly_retired.push(RetiredToken {
                        token: front.token.clone(),
                        family: family.to_string(),
                        retired_at_ms: now,
                        is_super: front.is_super,
                    });
                    queue.pop_front();
                    mutated = true;
                    continue;
                }
                if peek_only {
                    break Some(front.token);
                }
                let Some(head) = queue.front_mut() else { break None };
                head.first_used_at_ms.get_or_insert(now);
                head.request_count += 1;
                let exhausted = head.request_count >= head.max_request_count;
                let token = head.token.clone();
                if let Some(mut records) = self.status.get_mut(sso.as_str()) {
                    if let Some(record) = records.get_mut(family) {
                        record.total_request_count += 1;
                        if exhausted {
                            record.is_valid = false;
                            record.invalidated_at_ms = Some(now);
                        }
                    }
                }
                mutated = true;
                break Some(token);
            }
        };

        if !newly_retired.is_empty() {
            self.retired.lock().await.extend(newly_retired);
        }
        if mutated {
            self.persist();
        }
        selected
    }

    /// Explicit failure path: pull the token out of the model's queue,
    /// invalidate its status, and park it for recovery.
    ///
    /// A token without a status record was removed by an operator while
    /// the failing request was in flight; it is gone, not resting, so it
    /// must not enter the retired set.
    pub async fn retire(&self, model: &str, token: &str, reason: &str) {
        let Some(family) = models::quota_family(model) else { return };
        let Some(sso) = SsoId::parse(token) else { return };
        let now = now_ms();
        let mut is_super = false;
        if let Some(mut queue) = self.queues.get_mut(family) {
            if let Some(pos) = queue.iter().position(|e| e.token == token) {
                if let Some(removed) = queue.remove(pos) {
                    is_super = removed.is_super;
                }
            }
        }
        let mut known = false;
        if let Some(mut records) = self.status.get_mut(sso.as_str()) {
            if let Some(record) = records.get_mut(family) {
                record.is_valid = false;
                record.invalidated_at_ms = Some(now);
                is_super = record.is_super;
                known = true;
            }
        }
        if !known {
            debug!(family, "retire ignored for a credential no longer tracked");
            return;
        }
        self.retired.lock().await.insert(RetiredToken {
            token: token.to_string(),
            family: family.to_string(),
            retired_at_ms: now,
            is_super,
        });
        warn!(family, reason, "credential retired");
        self.persist();
    }

    /// One recovery pass at the current time.
    pub async fn recover(&self) {
        self.recover_at(now_ms()).await;
    }

    /// Recovery has two legs. Retired credentials whose retirement age
    /// exceeds their family's expiration window are re-enrolled with
    /// fresh counters. Still-enrolled credentials whose usage window has
    /// lapsed get an in-place counter reset, since quota exhaustion can
    /// strike without the credential ever leaving its queue.
    pub async fn recover_at(&self, now_ms: i64) {
        let due: Vec<RetiredToken> = {
            let mut retired = self.retired.lock().await;
            let due: Vec<_> = retired
                .iter()
                .filter(|r| {
                    models::quota_rule(&r.family, r.tier())
                        .is_some_and(|rule| now_ms - r.retired_at_ms >= rule.expiration_ms)
                })
                .cloned()
                .collect();
            for item in &due {
                retired.remove(item);
            }
            due
        };

        let recovered = due.len();
        for item in due {
            let Some(rule) = models::quota_rule(&item.family, item.tier()) else { continue };
            {
                let mut queue = self.queues.entry(item.family.clone()).or_default();
                if !queue.iter().any(|e| e.token == item.token) {
                    queue.push_back(TokenEntry::new(
                        &item.token,
                        rule.request_limit,
                        item.tier(),
                        now_ms,
                    ));
                }
            }
            if let Some(sso) = SsoId::parse(&item.token) {
                if let Some(mut records) = self.status.get_mut(sso.as_str()) {
                    if let Some(record) = records.get_mut(&item.family) {
                        *record = TokenStatus::fresh(item.tier());
                    }
                }
            }
        }

        for mut queue in self.queues.iter_mut() {
            let family = queue.key().clone();
            for head in queue.value_mut().iter_mut() {
                let Some(rule) = models::quota_rule(&family, head.tier()) else { continue };
                let Some(first_used) = head.first_used_at_ms else { continue };
                if now_ms - first_used < rule.expiration_ms {
                    continue;
                }
                head.request_count = 0;
                head.first_used_at_ms = None;
                if let Some(sso) = SsoId::parse(&head.token) {
                    if let Some(mut records) = self.status.get_mut(sso.as_str()) {
                        if let Some(record) = records.get_mut(&family) {
                            *record = TokenStatus::fresh(head.tier());
                        }
                    }
                }
            }
        }

        self.persist();
        info!(recovered, "credential recovery pass complete");
    }

    /// Remaining request budget per family across all queued credentials.
    pub fn capacity(&self) -> HashMap<String, u64> {
        self.queues
            .iter()
            .map(|queue| {
                let remaining: u64 = queue
                    .value()
                    .iter()
                    .map(|e| u64::from(e.max_request_count.saturating_sub(e.request_count)))
                    .sum();
                (queue.key().clone(), remaining)
            })
            .collect()
    }

    /// Number of credentials queued for a model's family.
    pub fn token_count(&self, model: &str) -> usize {
        models::quota_family(model)
            .and_then(|family| self.queues.get(family).map(|q| q.len()))
            .unwrap_or(0)
    }

    /// Every distinct raw token currently enrolled in any queue.
    pub fn all_tokens(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        for queue in self.queues.iter() {
            for entry in queue.value() {
                seen.insert(entry.token.clone());
            }
        }
        seen.into_iter().collect()
    }

    /// Snapshot of the persisted status view.
    pub fn status_snapshot(&self) -> persistence::StatusMap {
        self.status
            .iter()
            .map(|records| (records.key().clone(), records.value().clone()))
            .collect()
    }

    /// Writes the status view out once; bootstrap enrollment batches its
    /// single save through this.
    pub fn save(&self) {
        self.persist();
    }

    fn persist(&self) {
        let snapshot = self.status_snapshot();
        if let Err(err) = persistence::save(&self.status_path, &snapshot) {
            warn!(%err, "failed to persist credential status");
        }
    }
}

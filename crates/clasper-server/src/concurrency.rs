// clasper-server/src/concurrency.rs
// ============================================================================
// Module: Per-Tenant Concurrency Limiter
// Description: Bounds the number of inflight requests a single tenant may
// have in the server at once.
// Purpose: A noisy or misbehaving tenant must not starve other tenants'
// requests of handler capacity.
// Dependencies: clasper-core, tokio
// ============================================================================

//! ## Overview
//! [`TenantConcurrencyLimiter`] hands out `tokio::sync::Semaphore` permits
//! keyed by [`TenantId`], lazily creating a semaphore of `max_inflight`
//! permits the first time a tenant is seen and evicting idle entries once
//! the map grows past `max_entries`, the same bucket-eviction idiom the
//! HTTP rate limiter it is grounded on uses for its per-key buckets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use clasper_core::TenantId;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;

// ============================================================================
// SECTION: Limiter
// ============================================================================

/// Caps concurrent inflight requests per tenant.
pub struct TenantConcurrencyLimiter {
    /// Permits handed out per tenant.
    max_inflight: usize,
    /// Tenant entries retained before idle eviction runs.
    max_entries: usize,
    /// Per-tenant semaphores, created lazily on first use.
    semaphores: Mutex<HashMap<TenantId, Arc<Semaphore>>>,
}

impl TenantConcurrencyLimiter {
    /// Creates a limiter allowing `max_inflight` concurrent requests per
    /// tenant, retaining at most `max_entries` tenants' semaphores before
    /// evicting ones with a full complement of free permits.
    #[must_use]
    pub fn new(max_inflight: usize, max_entries: usize) -> Self {
        Self {
            max_inflight,
            max_entries,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires a permit for `tenant_id`, returning `None` if the tenant's
    /// inflight budget is currently exhausted.
    #[must_use]
    pub fn try_acquire(&self, tenant_id: &TenantId) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.semaphore_for(tenant_id);
        Arc::clone(&semaphore).try_acquire_owned().ok()
    }

    /// Returns the semaphore for `tenant_id`, creating it if this is the
    /// first time the tenant has been seen.
    fn semaphore_for(&self, tenant_id: &TenantId) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if semaphores.len() > self.max_entries {
            semaphores.retain(|_, sem| sem.available_permits() < self.max_inflight);
        }
        Arc::clone(
            semaphores
                .entry(tenant_id.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_inflight))),
        )
    }
}

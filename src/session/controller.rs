//! Controller handover bookkeeping
//!
//! Two coexisting protocols: listeners request the role and the controller
//! approves or denies; or the controller offers the role and the target
//! accepts or declines. Requests age out; offers stay valid only while the
//! offerer still holds the role (checked by the caller at accept time).

use std::collections::{BTreeMap, HashMap};

use crate::error::EventError;
use crate::types::ClientId;

/// A listener's pending request for the controller role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Requesting client
    pub client_id: ClientId,
    /// Requester display name at request time
    pub requester_name: String,
    /// Wall time the request was filed
    pub requested_at_ms: u64,
}

/// A controller's pending offer of the role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffer {
    /// Client that held the role when the offer was made
    pub offerer: ClientId,
    /// Client the role was offered to
    pub target: ClientId,
    /// Wall time the offer was made
    pub offered_at_ms: u64,
}

/// Pending request and offer state for one session.
#[derive(Debug)]
pub struct ControllerArbiter {
    /// Keyed by requester; ordered so request lists are deterministic
    requests: BTreeMap<ClientId, PendingRequest>,
    /// Keyed by offer target; a newer offer to the same target replaces
    offers: HashMap<ClientId, PendingOffer>,
    request_ttl_ms: u64,
}

impl ControllerArbiter {
    /// Arbiter with the given request lifetime.
    #[must_use]
    pub fn new(request_ttl_ms: u64) -> Self {
        Self {
            requests: BTreeMap::new(),
            offers: HashMap::new(),
            request_ttl_ms,
        }
    }

    /// Pending requests in client-id order.
    #[must_use]
    pub fn requests(&self) -> Vec<&PendingRequest> {
        self.requests.values().collect()
    }

    /// Whether a client has a request pending.
    #[must_use]
    pub fn has_request(&self, client_id: &ClientId) -> bool {
        self.requests.contains_key(client_id)
    }

    /// File a request.
    ///
    /// # Errors
    /// `Conflict` if the client already has one pending.
    pub fn add_request(
        &mut self,
        client_id: ClientId,
        requester_name: String,
        now_ms: u64,
    ) -> Result<(), EventError> {
        if self.requests.contains_key(&client_id) {
            return Err(EventError::Conflict(
                "Controller request already pending".to_string(),
            ));
        }
        self.requests.insert(
            client_id.clone(),
            PendingRequest {
                client_id,
                requester_name,
                requested_at_ms: now_ms,
            },
        );
        Ok(())
    }

    /// Withdraw a client's own request.
    ///
    /// # Errors
    /// `ExpiredOrGone` if no request is pending for the client.
    pub fn cancel_request(&mut self, client_id: &ClientId) -> Result<(), EventError> {
        self.requests.remove(client_id).map(|_| ()).ok_or_else(|| {
            EventError::ExpiredOrGone("No pending controller request".to_string())
        })
    }

    /// Remove and return a request for approval or denial.
    ///
    /// # Errors
    /// `ExpiredOrGone` if the request is absent or has aged out.
    pub fn take_request(
        &mut self,
        client_id: &ClientId,
        now_ms: u64,
    ) -> Result<PendingRequest, EventError> {
        let request = self.requests.remove(client_id).ok_or_else(|| {
            EventError::ExpiredOrGone("Controller request no longer exists".to_string())
        })?;
        if now_ms.saturating_sub(request.requested_at_ms) > self.request_ttl_ms {
            return Err(EventError::ExpiredOrGone(
                "Controller request has expired".to_string(),
            ));
        }
        Ok(request)
    }

    /// Drop any pending request filed by `client_id`. Returns whether one
    /// was present.
    pub fn clear_request(&mut self, client_id: &ClientId) -> bool {
        self.requests.remove(client_id).is_some()
    }

    /// Remove requests older than the TTL. Returns the evicted requesters.
    pub fn sweep_expired(&mut self, now_ms: u64) -> Vec<ClientId> {
        let ttl = self.request_ttl_ms;
        let expired: Vec<ClientId> = self
            .requests
            .values()
            .filter(|r| now_ms.saturating_sub(r.requested_at_ms) > ttl)
            .map(|r| r.client_id.clone())
            .collect();
        for client in &expired {
            self.requests.remove(client);
        }
        expired
    }

    /// Record an offer of the role; replaces an earlier offer to the same
    /// target.
    pub fn add_offer(&mut self, offerer: ClientId, target: ClientId, now_ms: u64) {
        self.offers.insert(
            target.clone(),
            PendingOffer {
                offerer,
                target,
                offered_at_ms: now_ms,
            },
        );
    }

    /// Remove and return the offer addressed to `target`.
    #[must_use]
    pub fn take_offer(&mut self, target: &ClientId) -> Option<PendingOffer> {
        self.offers.remove(target)
    }
}

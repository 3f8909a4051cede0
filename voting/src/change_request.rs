//! Change-request sub-ballots preceding an amendment's final vote.
//!
//! Change requests are voted on one at a time, in queue order:
//! - explicit `voting_order` ranks compare numerically,
//! - otherwise larger edits (higher `character_count`) go first,
//! - explicitly ranked requests come before unranked ones,
//! - remaining ties break on id so the order is total.
//!
//! A request is *pending* until activated, *open* until completed, and
//! *completed* forever after. The amendment's final vote may only start once
//! nothing is pending or open.

use crate::error::VotingError;
use crate::tally::SessionResult;
use polity_types::{AmendmentId, ChangeRequestId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: ChangeRequestId,
    pub amendment_id: AmendmentId,
    pub title: String,
    pub character_count: u32,
    #[serde(default)]
    pub voting_order: Option<u32>,
    #[serde(default)]
    pub activated_at: Option<Timestamp>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub result: Option<SessionResult>,
}

impl ChangeRequest {
    pub fn new(
        id: impl Into<ChangeRequestId>,
        amendment_id: AmendmentId,
        title: impl Into<String>,
        character_count: u32,
    ) -> Self {
        Self {
            id: id.into(),
            amendment_id,
            title: title.into(),
            character_count,
            voting_order: None,
            activated_at: None,
            completed_at: None,
            result: None,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.voting_order = Some(order);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.activated_at.is_none() && self.completed_at.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.activated_at.is_some() && self.completed_at.is_none()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Queue order of two change requests.
pub fn voting_order_cmp(a: &ChangeRequest, b: &ChangeRequest) -> Ordering {
    let by_rank = match (a.voting_order, b.voting_order) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_rank
        .then_with(|| b.character_count.cmp(&a.character_count))
        .then_with(|| a.id.cmp(&b.id))
}

/// Ordered change requests of one amendment.
#[derive(Clone, Debug)]
pub struct ChangeRequestQueue {
    amendment_id: AmendmentId,
    items: Vec<ChangeRequest>,
}

impl ChangeRequestQueue {
    /// Build a queue; requests belonging to other amendments are ignored.
    pub fn new(amendment_id: AmendmentId, items: impl IntoIterator<Item = ChangeRequest>) -> Self {
        let mut items: Vec<ChangeRequest> = items
            .into_iter()
            .filter(|cr| cr.amendment_id == amendment_id)
            .collect();
        items.sort_by(voting_order_cmp);
        Self {
            amendment_id,
            items,
        }
    }

    pub fn amendment_id(&self) -> &AmendmentId {
        &self.amendment_id
    }

    /// All requests in voting order.
    pub fn ordered(&self) -> &[ChangeRequest] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ChangeRequest> {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &ChangeRequestId) -> Option<&ChangeRequest> {
        self.items.iter().find(|cr| &cr.id == id)
    }

    /// The lowest-ordered request that has neither opened nor closed.
    pub fn next_pending(&self) -> Option<&ChangeRequest> {
        self.items.iter().find(|cr| cr.is_pending())
    }

    /// The request currently up for voting.
    pub fn open_request(&self) -> Option<&ChangeRequest> {
        self.items.iter().find(|cr| cr.is_open())
    }

    pub fn all_completed(&self) -> bool {
        self.items.iter().all(ChangeRequest::is_completed)
    }

    /// Fails unless every change request has been decided.
    pub fn ensure_final_vote_allowed(&self) -> Result<(), VotingError> {
        if let Some(open) = self.open_request() {
            return Err(VotingError::QueueOrderingViolation(format!(
                "change request {} is still open",
                open.id
            )));
        }
        if let Some(pending) = self.next_pending() {
            return Err(VotingError::QueueOrderingViolation(format!(
                "change request {} has not been voted on",
                pending.id
            )));
        }
        Ok(())
    }

    /// Fails unless `id` is the request currently open for voting.
    pub fn ensure_open(&self, id: &ChangeRequestId) -> Result<&ChangeRequest, VotingError> {
        let cr = self.find(id)?;
        if !cr.is_open() {
            return Err(VotingError::QueueOrderingViolation(format!(
                "change request {id} is not open for voting"
            )));
        }
        Ok(cr)
    }

    /// Assign a new order to the pending requests.
    ///
    /// `new_order` must list every pending request exactly once and nothing
    /// else. Requests that already started keep their relative order ahead
    /// of the pending ones.
    pub fn reorder(&mut self, new_order: &[ChangeRequestId]) -> Result<(), VotingError> {
        let mut seen = HashSet::new();
        for id in new_order {
            let cr = self.find(id)?;
            if !cr.is_pending() {
                return Err(VotingError::QueueOrderingViolation(format!(
                    "change request {id} has already been activated and cannot be reordered"
                )));
            }
            if !seen.insert(id) {
                return Err(VotingError::QueueOrderingViolation(format!(
                    "change request {id} listed twice"
                )));
            }
        }
        let pending = self.items.iter().filter(|cr| cr.is_pending()).count();
        if seen.len() != pending {
            return Err(VotingError::QueueOrderingViolation(format!(
                "new order lists {} of {} pending change requests",
                seen.len(),
                pending
            )));
        }

        let mut rank = 0u32;
        for cr in self.items.iter_mut().filter(|cr| !cr.is_pending()) {
            rank += 1;
            cr.voting_order = Some(rank);
        }
        for id in new_order {
            rank += 1;
            if let Some(cr) = self.items.iter_mut().find(|cr| &cr.id == id) {
                cr.voting_order = Some(rank);
            }
        }
        self.items.sort_by(voting_order_cmp);
        Ok(())
    }

    /// Open `id` for voting. Only the next pending request may be opened,
    /// and only while no other request is open.
    pub fn activate(
        &mut self,
        id: &ChangeRequestId,
        now: Timestamp,
    ) -> Result<&ChangeRequest, VotingError> {
        let target = self.find(id)?;
        if target.is_completed() {
            return Err(VotingError::QueueOrderingViolation(format!(
                "change request {id} is already completed and cannot be reopened"
            )));
        }
        if let Some(open) = self.open_request() {
            return Err(VotingError::QueueOrderingViolation(format!(
                "change request {} is still open",
                open.id
            )));
        }
        let next = self.next_pending().map(|cr| cr.id.clone());
        if next.as_ref() != Some(id) {
            return Err(VotingError::QueueOrderingViolation(format!(
                "change request {id} is out of turn, next is {}",
                next.map(|n| n.to_string()).unwrap_or_else(|| "none".into())
            )));
        }

        let cr = self.find_mut(id)?;
        cr.activated_at = Some(now);
        Ok(&*cr)
    }

    /// Close the open request `id` with its sub-ballot result.
    pub fn complete(
        &mut self,
        id: &ChangeRequestId,
        now: Timestamp,
        result: SessionResult,
    ) -> Result<&ChangeRequest, VotingError> {
        let cr = self.find_mut(id)?;
        if !cr.is_open() {
            return Err(VotingError::QueueOrderingViolation(format!(
                "change request {id} is not open and cannot be completed"
            )));
        }
        cr.completed_at = Some(now);
        cr.result = Some(result);
        Ok(&*cr)
    }

    fn find(&self, id: &ChangeRequestId) -> Result<&ChangeRequest, VotingError> {
        self.get(id)
            .ok_or_else(|| VotingError::NotFound(format!("change request {id}")))
    }

    fn find_mut(&mut self, id: &ChangeRequestId) -> Result<&mut ChangeRequest, VotingError> {
        self.items
            .iter_mut()
            .find(|cr| &cr.id == id)
            .ok_or_else(|| VotingError::NotFound(format!("change request {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amendment() -> AmendmentId {
        AmendmentId::new("amd_1")
    }

    fn cr(id: &str, chars: u32) -> ChangeRequest {
        ChangeRequest::new(id, amendment(), format!("Change {id}"), chars)
    }

    fn ids(queue: &ChangeRequestQueue) -> Vec<&str> {
        queue.ordered().iter().map(|c| c.id.as_str()).collect()
    }

    fn id(s: &str) -> ChangeRequestId {
        ChangeRequestId::new(s)
    }

    #[test]
    fn implicit_order_is_descending_character_count() {
        let q = ChangeRequestQueue::new(amendment(), vec![cr("a", 10), cr("b", 300), cr("c", 42)]);
        assert_eq!(ids(&q), vec!["b", "c", "a"]);
    }

    #[test]
    fn explicit_order_wins_and_comes_first() {
        let q = ChangeRequestQueue::new(
            amendment(),
            vec![
                cr("a", 10).with_order(2),
                cr("b", 300),
                cr("c", 42).with_order(1),
            ],
        );
        assert_eq!(ids(&q), vec!["c", "a", "b"]);
    }

    #[test]
    fn equal_character_counts_break_on_id() {
        let q = ChangeRequestQueue::new(amendment(), vec![cr("z", 5), cr("m", 5)]);
        assert_eq!(ids(&q), vec!["m", "z"]);
    }

    #[test]
    fn other_amendments_are_filtered_out() {
        let foreign = ChangeRequest::new("x", AmendmentId::new("amd_2"), "Foreign", 999);
        let q = ChangeRequestQueue::new(amendment(), vec![cr("a", 1), foreign]);
        assert_eq!(ids(&q), vec!["a"]);
    }

    #[test]
    fn walks_the_queue_in_order() {
        let mut q = ChangeRequestQueue::new(amendment(), vec![cr("a", 10), cr("b", 20)]);
        assert_eq!(q.next_pending().unwrap().id, id("b"));
        assert!(q.ensure_final_vote_allowed().is_err());

        q.activate(&id("b"), Timestamp::new(1)).unwrap();
        assert_eq!(q.open_request().unwrap().id, id("b"));
        assert_eq!(q.next_pending().unwrap().id, id("a"));
        q.complete(&id("b"), Timestamp::new(2), SessionResult::Passed)
            .unwrap();

        q.activate(&id("a"), Timestamp::new(3)).unwrap();
        assert!(q.ensure_final_vote_allowed().is_err());
        q.complete(&id("a"), Timestamp::new(4), SessionResult::Rejected)
            .unwrap();

        assert!(q.next_pending().is_none());
        assert!(q.all_completed());
        assert!(q.ensure_final_vote_allowed().is_ok());
        assert_eq!(q.get(&id("a")).unwrap().result, Some(SessionResult::Rejected));
    }

    #[test]
    fn empty_queue_allows_final_vote() {
        let q = ChangeRequestQueue::new(amendment(), Vec::new());
        assert!(q.is_empty());
        assert!(q.next_pending().is_none());
        assert!(q.ensure_final_vote_allowed().is_ok());
    }

    #[test]
    fn only_one_request_open_at_a_time() {
        let mut q = ChangeRequestQueue::new(amendment(), vec![cr("a", 10), cr("b", 20)]);
        q.activate(&id("b"), Timestamp::new(1)).unwrap();
        let err = q.activate(&id("a"), Timestamp::new(2)).unwrap_err();
        assert!(matches!(err, VotingError::QueueOrderingViolation(_)));
    }

    #[test]
    fn out_of_turn_activation_is_rejected() {
        let mut q = ChangeRequestQueue::new(amendment(), vec![cr("a", 10), cr("b", 20)]);
        let err = q.activate(&id("a"), Timestamp::new(1)).unwrap_err();
        assert!(matches!(err, VotingError::QueueOrderingViolation(_)));
        assert!(q.get(&id("a")).unwrap().is_pending());
    }

    #[test]
    fn completed_request_cannot_reopen() {
        let mut q = ChangeRequestQueue::new(amendment(), vec![cr("a", 10)]);
        q.activate(&id("a"), Timestamp::new(1)).unwrap();
        q.complete(&id("a"), Timestamp::new(2), SessionResult::Tie)
            .unwrap();
        assert!(q.activate(&id("a"), Timestamp::new(3)).is_err());
        assert!(q
            .complete(&id("a"), Timestamp::new(3), SessionResult::Passed)
            .is_err());
        assert_eq!(q.get(&id("a")).unwrap().result, Some(SessionResult::Tie));
    }

    #[test]
    fn reorder_pending_requests() {
        let mut q = ChangeRequestQueue::new(
            amendment(),
            vec![cr("a", 10), cr("b", 20), cr("c", 30)],
        );
        q.activate(&id("c"), Timestamp::new(1)).unwrap();
        q.reorder(&[id("a"), id("b")]).unwrap();
        assert_eq!(ids(&q), vec!["c", "a", "b"]);
        assert_eq!(q.next_pending().unwrap().id, id("a"));
    }

    #[test]
    fn reorder_rejects_started_requests() {
        let mut q = ChangeRequestQueue::new(amendment(), vec![cr("a", 10), cr("b", 20)]);
        q.activate(&id("b"), Timestamp::new(1)).unwrap();
        let err = q.reorder(&[id("b"), id("a")]).unwrap_err();
        assert!(matches!(err, VotingError::QueueOrderingViolation(_)));
        assert_eq!(ids(&q), vec!["b", "a"]);
    }

    #[test]
    fn reorder_must_cover_all_pending() {
        let mut q = ChangeRequestQueue::new(amendment(), vec![cr("a", 10), cr("b", 20)]);
        assert!(matches!(
            q.reorder(&[id("a")]),
            Err(VotingError::QueueOrderingViolation(_))
        ));
        assert!(matches!(
            q.reorder(&[id("a"), id("a")]),
            Err(VotingError::QueueOrderingViolation(_))
        ));
        assert!(matches!(
            q.reorder(&[id("a"), id("nope")]),
            Err(VotingError::NotFound(_))
        ));
    }

    #[test]
    fn ensure_open_checks_state() {
        let mut q = ChangeRequestQueue::new(amendment(), vec![cr("a", 10)]);
        assert!(q.ensure_open(&id("a")).is_err());
        q.activate(&id("a"), Timestamp::new(1)).unwrap();
        assert!(q.ensure_open(&id("a")).is_ok());
    }
}

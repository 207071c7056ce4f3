use std::collections::VecDeque;

use crate::model::{Request, RequestId};
use crate::SimTime;

/// Requests waiting for another insertion attempt, oldest first.
#[derive(Debug, Default)]
pub struct UnplannedRequests {
    queue: VecDeque<Request>,
}

impl UnplannedRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request; a request already waiting keeps its place.
    pub fn push(&mut self, request: Request) {
        if !self.contains(request.id) {
            self.queue.push_back(request);
        }
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.queue.iter().any(|request| request.id == id)
    }

    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        let index = self.queue.iter().position(|request| request.id == id)?;
        self.queue.remove(index)
    }

    /// Take every queued request, splitting off those expired at `now`.
    ///
    /// Returns `(live, expired)`, both in queue order.
    pub fn drain(&mut self, now: SimTime) -> (Vec<Request>, Vec<Request>) {
        self.queue
            .drain(..)
            .partition(|request| !request.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.queue.iter()
    }
}

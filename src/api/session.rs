//! Bounded cache of recently completed inspections.
//!
//! Follow-up requests (analysis, report) look a result up by id instead of
//! re-running inference. Oldest entries are evicted first.

use image::RgbImage;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::analysis::Narrative;
use crate::types::InspectionResult;

/// One completed inspection and what has been derived from it so far.
#[derive(Debug, Clone)]
pub struct Session {
    pub result: Arc<InspectionResult>,
    pub original: Arc<RgbImage>,
    /// Most recent narrative, if analysis has been requested.
    pub narrative: Option<Narrative>,
}

#[derive(Debug)]
pub struct SessionCache {
    capacity: usize,
    order: VecDeque<Uuid>,
    entries: HashMap<Uuid, Session>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, result: InspectionResult, original: RgbImage) -> Uuid {
        let id = result.id;
        while self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.entries.remove(&old);
            }
        }
        self.order.push_back(id);
        self.entries.insert(
            id,
            Session {
                result: Arc::new(result),
                original: Arc::new(original),
                narrative: None,
            },
        );
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&Session> {
        self.entries.get(id)
    }

    /// Attach a narrative. Returns false if the session was evicted meanwhile.
    pub fn set_narrative(&mut self, id: &Uuid, narrative: Narrative) -> bool {
        match self.entries.get_mut(id) {
            Some(session) => {
                session.narrative = Some(narrative);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

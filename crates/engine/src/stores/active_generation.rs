//! Per-project registry of the single in-flight generation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use folio_domain::{ActiveGeneration, GenerationPhase, OutlineId, ProjectId};

/// Holds at most one [`ActiveGeneration`] per project.
///
/// Claims go through [`ActiveGenerationStore::try_claim`], which only succeeds
/// when the project has no entry; the returned [`GenerationLease`] releases the
/// slot when dropped, so every exit path of a generation frees the project.
#[derive(Debug, Clone, Default)]
pub struct ActiveGenerationStore {
    inner: Arc<DashMap<ProjectId, ActiveGeneration>>,
}

impl ActiveGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project_id: ProjectId) -> Option<ActiveGeneration> {
        self.inner.get(&project_id).map(|entry| entry.value().clone())
    }

    /// Claim the project for `outline_id`. On conflict the current holder is
    /// returned unchanged.
    pub fn try_claim(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
        phase: GenerationPhase,
        now: DateTime<Utc>,
    ) -> Result<GenerationLease, ActiveGeneration> {
        match self.inner.entry(project_id) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(slot) => {
                let mut active = ActiveGeneration::new(outline_id, now);
                active.phase = phase;
                slot.insert(active);
                Ok(GenerationLease {
                    registry: Arc::clone(&self.inner),
                    project_id,
                    outline_id,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive hold on a project's generation slot.
#[derive(Debug)]
pub struct GenerationLease {
    registry: Arc<DashMap<ProjectId, ActiveGeneration>>,
    project_id: ProjectId,
    outline_id: OutlineId,
}

impl GenerationLease {
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn outline_id(&self) -> OutlineId {
        self.outline_id
    }

    pub fn set_phase(&self, phase: GenerationPhase) {
        if let Some(mut active) = self.registry.get_mut(&self.project_id) {
            if active.outline_id == self.outline_id {
                active.phase = phase;
            }
        }
    }
}

impl Drop for GenerationLease {
    fn drop(&mut self) {
        let outline_id = self.outline_id;
        self.registry
            .remove_if(&self.project_id, |_, active| active.outline_id == outline_id);
    }
}

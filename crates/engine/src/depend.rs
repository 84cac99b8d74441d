//! Dependency edges between jobs and between tasks.
//!
//! Creating an edge bumps the blocked entity's depend count; resolving
//! flips every Active edge on a blocking entity to Inactive. The dispatch
//! candidate query never selects anything with a nonzero count.

use std::collections::HashSet;
use std::sync::Arc;

use spool_core::error::CoreError;
use spool_core::graph::DependGraph;
use spool_core::status::DependType;
use spool_core::types::DbId;
use spool_db::models::depend::{Depend, NewDepend, ResolvedDepends};
use spool_db::StateStore;

use crate::error::EngineResult;

#[derive(Clone)]
pub struct DependService {
    store: Arc<dyn StateStore>,
}

impl DependService {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Insert an Active edge, rejecting it if it would close a cycle.
    ///
    /// Returns `None` when the blocking entity has already succeeded and
    /// nothing needs to wait on it.
    pub async fn create_depend(&self, input: &NewDepend) -> EngineResult<Option<Depend>> {
        let (depend_er, depend_on) = (input.depend_er_id(), input.depend_on_id());
        self.ensure_acyclic(input.depend_type, depend_er, depend_on).await?;

        let Some(depend) = self.store.insert_depend(input).await? else {
            tracing::debug!(
                depend_type = %input.depend_type,
                %depend_er,
                %depend_on,
                "Depend already satisfied"
            );
            return Ok(None);
        };
        tracing::debug!(
            depend_id = %depend.id,
            depend_type = %depend.depend_type,
            %depend_er,
            %depend_on,
            "Depend created"
        );
        Ok(Some(depend))
    }

    /// Make a job that is still being created wait on `depend_on_job_ids`.
    ///
    /// Nothing depends on a new job yet, so these edges cannot close a
    /// cycle. Jobs that already succeeded get no edge.
    pub async fn create_job_depends(
        &self,
        job_id: DbId,
        depend_on_job_ids: &[DbId],
    ) -> EngineResult<Vec<Depend>> {
        let depends = self.store.insert_job_depends(job_id, depend_on_job_ids).await?;
        tracing::debug!(
            %job_id,
            requested = depend_on_job_ids.len(),
            created = depends.len(),
            "Job depends created"
        );
        Ok(depends)
    }

    /// Walk the active edges reachable from `depend_on`. If `depend_er` is
    /// among them the new edge would close a cycle.
    async fn ensure_acyclic(
        &self,
        depend_type: DependType,
        depend_er: DbId,
        depend_on: DbId,
    ) -> EngineResult<()> {
        let mut graph = DependGraph::new();
        let mut visited = HashSet::from([depend_on]);
        let mut frontier = vec![depend_on];

        while let Some(node) = frontier.pop() {
            if node == depend_er {
                break;
            }
            for next in self.store.active_depend_on_ids(depend_type, node).await? {
                graph.add_edge(node, next);
                if visited.insert(next) {
                    frontier.push(next);
                }
            }
        }

        match graph.cycle_with(depend_er, depend_on) {
            Some(cycle) => {
                let chain = cycle
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                Err(CoreError::DependencyCycle(format!("{depend_type} edge would close {chain}")).into())
            }
            None => Ok(()),
        }
    }

    pub async fn resolve_depends_on_job(&self, job_id: DbId) -> EngineResult<ResolvedDepends> {
        self.resolve(DependType::JobOnJob, job_id).await
    }

    pub async fn resolve_depends_on_task(&self, task_id: DbId) -> EngineResult<ResolvedDepends> {
        self.resolve(DependType::TaskOnTask, task_id).await
    }

    async fn resolve(
        &self,
        depend_type: DependType,
        depend_on: DbId,
    ) -> EngineResult<ResolvedDepends> {
        let outcome = self.store.resolve_depends(depend_type, depend_on).await?;
        if outcome.resolved > 0 {
            tracing::debug!(
                depend_type = %depend_type,
                %depend_on,
                resolved = outcome.resolved,
                released = outcome.released_tasks.len(),
                "Depends resolved"
            );
        }
        Ok(outcome)
    }

    /// Release the job's `Depend` tasks that nothing blocks any more.
    pub async fn release_job_tasks(&self, job_id: DbId) -> EngineResult<Vec<DbId>> {
        let released = self.store.release_job_tasks(job_id).await?;
        if !released.is_empty() {
            tracing::debug!(%job_id, released = released.len(), "Depend tasks released");
        }
        Ok(released)
    }

    pub async fn list_depends(&self, job_id: DbId) -> EngineResult<Vec<Depend>> {
        Ok(self.store.list_depends(job_id).await?)
    }
}

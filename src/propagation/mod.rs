//! ACL propagation: derive grants on related objects from directly assigned
//! ones, following a declarative rule tree over the relationship graph.
//!
//! [`Propagator`] ties the pieces together. Change entry points compute
//! [`PropagationWork`]; [`Propagator::run`] applies it (purge first, then expand
//! and persist).

pub mod expand;
pub mod graph;
pub mod listener;
pub mod persist;
pub mod retry;
pub mod rules;

use std::collections::{BTreeSet, HashSet};

use crate::config::PropagationConfig;
use crate::errors::PropagationError;
use crate::models::acl::AccessControlEntry;
use crate::models::relationship::Relationship;
use crate::store::AclStore;

pub use expand::{Anchor, Expansion, ExpansionEngine, ParentRef, PlannedAcl};
pub use graph::{RELATIONSHIP, RelationshipGraph};
pub use listener::{AclChange, ChangeEvent, PropagationScope, PropagationWork, RelationshipChange};
pub use persist::{BatchWriter, DeleteReport, InsertReport};
pub use retry::{Disposition, RetryPolicy};
pub use rules::{Permission, RuleEdge, RuleEdgeSpec, RuleNode, RuleSet, RuleSetSpec};

/// What one propagation run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Rows the expansion decided must exist.
    pub planned: usize,
    /// Rows that did not exist yet.
    pub inserted: u64,
    pub deleted: u64,
    /// Insert and delete chunks committed.
    pub chunks: usize,
    pub cycle_guard_trips: usize,
}

impl PropagationReport {
    fn absorb(&mut self, other: PropagationReport) {
        self.planned += other.planned;
        self.inserted += other.inserted;
        self.deleted += other.deleted;
        self.chunks += other.chunks;
        self.cycle_guard_trips += other.cycle_guard_trips;
    }
}

pub struct Propagator<S> {
    store: S,
    rules: RuleSet,
    retry: RetryPolicy,
    config: PropagationConfig,
}

impl<S> Propagator<S>
where
    S: AclStore + RelationshipGraph,
{
    pub fn new(store: S, rules: RuleSet, config: PropagationConfig) -> Self {
        Propagator {
            retry: RetryPolicy::new(config.max_attempts),
            store,
            rules,
            config,
        }
    }

    /// Validate `spec` against the store's role table and build a propagator.
    pub async fn load(store: S, spec: &RuleSetSpec, config: PropagationConfig) -> Result<Self, PropagationError> {
        let roles = store.roles().await?;
        let rules = RuleSet::load(spec, &roles)?;
        Ok(Self::new(store, rules, config))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn writer(&self) -> BatchWriter<'_, S> {
        BatchWriter::new(&self.store, &self.retry, self.config.chunk_size, self.config.actor_id)
    }

    pub async fn on_relationship_change(
        &self,
        relationship: &Relationship,
        change: RelationshipChange,
    ) -> Result<PropagationWork, PropagationError> {
        listener::relationship_work(&self.store, &self.rules, relationship, change).await
    }

    pub async fn on_acl_change(
        &self,
        acl: &AccessControlEntry,
        change: AclChange,
    ) -> Result<PropagationWork, PropagationError> {
        listener::acl_work(&self.store, acl, change).await
    }

    /// Apply `work`: purge stale rows, then expand from the anchors and write
    /// what the walk planned. Anchors whose row has disappeared since the work
    /// was computed are skipped.
    pub async fn run(&self, work: PropagationWork) -> Result<PropagationReport, PropagationError> {
        let mut report = PropagationReport::default();
        let writer = self.writer();

        if !work.purge.is_empty() {
            let deleted = writer.delete_propagated_acls(&work.purge).await?;
            report.deleted = deleted.deleted;
            report.chunks += deleted.chunks;
        }

        let anchors = self.live_anchors(work.anchors).await?;
        if !anchors.is_empty() {
            let expansion = ExpansionEngine::new(&self.rules, &self.store).expand(&anchors).await?;
            let inserted = writer.persist(&expansion).await?;
            report.planned = expansion.len();
            report.inserted = inserted.inserted;
            report.chunks += inserted.chunks;
            report.cycle_guard_trips = expansion.cycle_guard_trips;
        }

        if report != PropagationReport::default() {
            log::info!(
                "Propagation: {} planned, {} inserted, {} deleted in {} chunks",
                report.planned, report.inserted, report.deleted, report.chunks
            );
        }
        Ok(report)
    }

    /// Report a committed change. An immediate scope propagates it now; a
    /// deferred scope records it for [`finish`](Self::finish).
    pub async fn submit(
        &self,
        scope: &mut PropagationScope,
        event: ChangeEvent,
    ) -> Result<PropagationReport, PropagationError> {
        if scope.is_deferred() {
            scope.record(event);
            return Ok(PropagationReport::default());
        }
        self.propagate_event(&event).await
    }

    /// Propagate every change a scope recorded, in order. Stops at the first
    /// failure and leaves that change and the ones after it pending in `scope`,
    /// so calling `finish` again resumes where it stopped.
    pub async fn finish(&self, scope: &mut PropagationScope) -> Result<PropagationReport, PropagationError> {
        let mut events = scope.take();
        if !events.is_empty() {
            log::info!("Propagating {} deferred changes", events.len());
        }
        let mut report = PropagationReport::default();
        for done in 0..events.len() {
            match self.propagate_event(&events[done]).await {
                Ok(step) => report.absorb(step),
                Err(e) => {
                    log::warn!(
                        "Deferred change {} of {} failed, {} left pending",
                        done + 1,
                        events.len(),
                        events.len() - done
                    );
                    scope.restore(events.split_off(done));
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    async fn propagate_event(&self, event: &ChangeEvent) -> Result<PropagationReport, PropagationError> {
        let work = match event {
            ChangeEvent::Relationship { relationship, change } => {
                self.on_relationship_change(relationship, *change).await?
            }
            ChangeEvent::Acl { acl, change } => self.on_acl_change(acl, *change).await?,
        };
        self.run(work).await
    }

    /// Full re-walk from every directly assigned grant. Adds missing rows only.
    pub async fn propagate_all(&self) -> Result<PropagationReport, PropagationError> {
        let (report, _) = self.expand_all().await?;
        Ok(report)
    }

    /// Full re-walk, then delete every propagated row the current graph and
    /// rule set no longer justify.
    ///
    /// Only rows that existed before the walk started are candidates. Rows
    /// committed by concurrent propagation during the walk are left alone.
    pub async fn reconcile(&self) -> Result<PropagationReport, PropagationError> {
        let candidates = self.store.propagated_acl_ids().await?;
        let (mut report, justified) = self.expand_all().await?;

        let stale: BTreeSet<i64> = candidates
            .into_iter()
            .filter(|id| !justified.contains(id))
            .collect();
        if !stale.is_empty() {
            // Newest first: children were written after their parents.
            let stale: Vec<i64> = stale.into_iter().rev().collect();
            let deleted = self.writer().delete_propagated_acls(&stale).await?;
            report.deleted = deleted.deleted;
            report.chunks += deleted.chunks;
        }

        log::info!(
            "Reconciliation: {} rows justified, {} inserted, {} stale rows deleted",
            report.planned, report.inserted, report.deleted
        );
        Ok(report)
    }

    async fn expand_all(&self) -> Result<(PropagationReport, HashSet<i64>), PropagationError> {
        let anchors: Vec<Anchor> = self.store.root_acls().await?.into_iter().map(Anchor::root).collect();
        log::info!("Full propagation from {} root grants", anchors.len());

        let expansion = ExpansionEngine::new(&self.rules, &self.store).expand(&anchors).await?;
        let inserted = self.writer().persist(&expansion).await?;
        let report = PropagationReport {
            planned: expansion.len(),
            inserted: inserted.inserted,
            deleted: 0,
            chunks: inserted.chunks,
            cycle_guard_trips: expansion.cycle_guard_trips,
        };
        Ok((report, inserted.ids.into_iter().collect()))
    }

    async fn live_anchors(&self, anchors: Vec<Anchor>) -> Result<Vec<Anchor>, PropagationError> {
        if anchors.is_empty() {
            return Ok(anchors);
        }
        let ids: BTreeSet<i64> = anchors.iter().map(|a| a.acl.id).collect();
        let ids: Vec<i64> = ids.into_iter().collect();
        let mut live = HashSet::new();
        for chunk in ids.chunks(graph::LOOKUP_CHUNK) {
            live.extend(self.store.acls_by_ids(chunk).await?.into_iter().map(|acl| acl.id));
        }
        let before = anchors.len();
        let anchors: Vec<Anchor> = anchors.into_iter().filter(|a| live.contains(&a.acl.id)).collect();
        if anchors.len() < before {
            log::debug!("{} anchors vanished before propagation", before - anchors.len());
        }
        Ok(anchors)
    }
}

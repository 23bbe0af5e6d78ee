//! Entity worker: keep user/group snapshots current and their history.
//!
//! Each observation gets its own transaction. The decision of what to write
//! is `plan_user` / `plan_group`; this module only runs the plan.

use tracing::debug;

use chatlog_core::{Channel, Clock, EntityObservation, EntityWrite, plan_group, plan_user};

use crate::store::{RecordStore, StoreError, StoreTx};

use super::batch::BatchContext;
use super::{BatchApplier, BatchOutcome, WorkerError};

pub struct EntityReconciler<St, C> {
    ctx: BatchContext<St>,
    clock: C,
}

impl<St, C> EntityReconciler<St, C>
where
    St: RecordStore,
    C: Clock,
{
    pub fn new(ctx: BatchContext<St>, clock: C) -> Self {
        Self { ctx, clock }
    }

    /// Plan and execute one observation, returning the number of writes.
    fn reconcile(
        &self,
        tx: &mut dyn StoreTx,
        observation: &EntityObservation,
    ) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let writes = match observation {
            EntityObservation::User(user) => {
                let current = tx.find_user(user.uid)?;
                let has_history = match current {
                    Some(_) => tx.has_user_history(user.uid)?,
                    None => false,
                };
                plan_user(current.as_ref(), has_history, user, now)
            }
            EntityObservation::Group(group) => {
                let current = tx.find_group(group.gid)?;
                let has_history = match current {
                    Some(_) => tx.has_group_history(group.gid)?,
                    None => false,
                };
                plan_group(current.as_ref(), has_history, group, now)
            }
        };

        for write in &writes {
            execute(tx, write)?;
        }
        Ok(writes.len())
    }
}

fn execute(tx: &mut dyn StoreTx, write: &EntityWrite) -> Result<(), StoreError> {
    match write {
        EntityWrite::CreateUser(user) => tx.insert_user(user),
        EntityWrite::AppendUserHistory(entry) => tx.append_user_history(entry),
        EntityWrite::SaveUser(user) => tx.update_user(user),
        EntityWrite::CreateGroup(group) => tx.insert_group(group),
        EntityWrite::AdoptMaster { gid, master } => tx.set_group_master(*gid, *master),
        EntityWrite::AppendGroupHistory(entry) => tx.append_group_history(entry),
        EntityWrite::SaveGroup(group) => tx.update_group(group),
    }
}

impl<St, C> BatchApplier for EntityReconciler<St, C>
where
    St: RecordStore,
    C: Clock,
{
    fn channel(&self) -> Channel {
        Channel::Entity
    }

    fn apply(&self, batch: Vec<Vec<u8>>) -> Result<BatchOutcome, WorkerError> {
        let decoded = self.ctx.decode::<EntityObservation>(batch);
        let mut outcome = BatchOutcome {
            rejected: decoded.rejected,
            ..BatchOutcome::default()
        };

        for (idx, observation) in decoded.records.iter().enumerate() {
            // Requeue is handled here so a failure puts back this observation
            // and every one after it, but none already committed.
            let result = self.ctx.transact(&[], |tx| {
                self.reconcile(tx, observation).map_err(WorkerError::from)
            });

            match result {
                Ok(0) => outcome.skipped += 1,
                Ok(writes) => {
                    debug!(kind = observation.kind(), id = observation.id(), writes, "entity reconciled");
                    outcome.applied += 1;
                }
                Err(WorkerError::Store(e)) => {
                    let label = format!("{} {}", observation.kind(), observation.id());
                    match self.ctx.row_failed(&label, e) {
                        Ok(()) => outcome.failed += 1,
                        Err(e) => return Err(self.ctx.requeue(&decoded.raw[idx..], e.into())),
                    }
                }
                Err(e) => return Err(self.ctx.requeue(&decoded.raw[idx..], e)),
            }
        }

        Ok(outcome)
    }
}

//! Invite worker: store observed group invite links, one transaction per batch.

use tracing::debug;

use chatlog_core::{Channel, GroupInvite};

use crate::store::RecordStore;

use super::batch::BatchContext;
use super::{BatchApplier, BatchOutcome, WorkerError};

pub struct InviteApplier<St> {
    ctx: BatchContext<St>,
}

impl<St: RecordStore> InviteApplier<St> {
    pub fn new(ctx: BatchContext<St>) -> Self {
        Self { ctx }
    }
}

impl<St: RecordStore> BatchApplier for InviteApplier<St> {
    fn channel(&self) -> Channel {
        Channel::Invite
    }

    fn apply(&self, batch: Vec<Vec<u8>>) -> Result<BatchOutcome, WorkerError> {
        let decoded = self.ctx.decode::<GroupInvite>(batch);
        let mut outcome = BatchOutcome {
            rejected: decoded.rejected,
            ..BatchOutcome::default()
        };
        if decoded.records.is_empty() {
            return Ok(outcome);
        }

        let failed = self.ctx.transact(&decoded.raw, |tx| {
            let mut failed = 0;
            for invite in &decoded.records {
                match tx.insert_invite(invite) {
                    Ok(()) => debug!(invite_id = invite.id, gid = %invite.gid, "invite stored"),
                    Err(e) => {
                        self.ctx.row_failed(&invite.id, e)?;
                        failed += 1;
                    }
                }
            }
            Ok(failed)
        })?;

        outcome.failed = failed;
        outcome.applied = decoded.records.len() - failed;
        Ok(outcome)
    }
}

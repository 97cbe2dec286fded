//! A user's current worker roster, rebuilt from worker manager events.

use staking_contracts::{WorkerEvent, WorkerEventKind, WorkerManagerContract};
use staking_types::{same_address, Address, Result};
use tracing::debug;

/// Replay `events` in chain order and return the workers still held.
///
/// A re-hired worker moves to the end. Retiring a worker that is not in the
/// roster is a no-op.
pub fn fold_roster(events: &[WorkerEvent]) -> Vec<Address> {
    let mut ordered: Vec<&WorkerEvent> = events.iter().collect();
    ordered.sort_by_key(|e| (e.block_number, e.log_index));

    let mut roster: Vec<Address> = Vec::new();
    for event in ordered {
        let position = roster.iter().position(|w| same_address(w, &event.worker));
        match event.kind {
            WorkerEventKind::JobAccepted => {
                if let Some(i) = position {
                    roster.remove(i);
                }
                roster.push(event.worker.clone());
            }
            WorkerEventKind::Retired => {
                if let Some(i) = position {
                    roster.remove(i);
                }
            }
        }
    }
    roster
}

/// Query `user`'s worker events and fold them into a roster.
pub async fn user_workers(contract: &dyn WorkerManagerContract, user: &Address) -> Result<Vec<Address>> {
    let events = contract.worker_events(user).await?;
    let roster = fold_roster(&events);
    debug!(%user, events = events.len(), workers = roster.len(), "worker roster rebuilt");
    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{Connection, WorkerManagerService};
    use staking_contracts::memory::MemoryChain;
    use staking_contracts::ContractProvider;

    const A: &str = "0x00000000000000000000000000000000000000a1";
    const B: &str = "0x00000000000000000000000000000000000000b1";
    const C: &str = "0x00000000000000000000000000000000000000c1";

    fn event(kind: WorkerEventKind, worker: &str, block_number: u64, log_index: u32) -> WorkerEvent {
        WorkerEvent {
            kind,
            worker: worker.to_string(),
            user: USER.to_string(),
            block_number,
            log_index,
        }
    }

    fn hire(worker: &str, block: u64) -> WorkerEvent {
        event(WorkerEventKind::JobAccepted, worker, block, 0)
    }

    fn retire(worker: &str, block: u64) -> WorkerEvent {
        event(WorkerEventKind::Retired, worker, block, 0)
    }

    #[test]
    fn test_hire_hire_retire() {
        let roster = fold_roster(&[hire(A, 1), hire(B, 2), retire(A, 3)]);
        assert_eq!(roster, vec![B.to_string()]);
    }

    #[test]
    fn test_events_are_sorted_first() {
        let roster = fold_roster(&[retire(A, 3), hire(B, 2), hire(A, 1)]);
        assert_eq!(roster, vec![B.to_string()]);

        // Same block: log index decides.
        let roster = fold_roster(&[
            event(WorkerEventKind::Retired, A, 5, 1),
            event(WorkerEventKind::JobAccepted, A, 5, 0),
        ]);
        assert!(roster.is_empty());
    }

    #[test]
    fn test_retire_absent_worker_is_noop() {
        let roster = fold_roster(&[hire(A, 1), hire(B, 2), retire(C, 3)]);
        assert_eq!(roster, vec![A.to_string(), B.to_string()]);
    }

    #[test]
    fn test_rehire_moves_to_end() {
        let roster = fold_roster(&[hire(A, 1), hire(B, 2), retire(A, 3), hire(A, 4)]);
        assert_eq!(roster, vec![B.to_string(), A.to_string()]);

        let roster = fold_roster(&[hire(A, 1), hire(B, 2), hire(A, 3)]);
        assert_eq!(roster, vec![B.to_string(), A.to_string()]);
    }

    #[test]
    fn test_empty() {
        assert!(fold_roster(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_user_workers_from_chain() {
        let chain = MemoryChain::new(USER).unwrap();
        let conn: Connection = connect(&chain);
        for worker in [A, B] {
            let service = WorkerManagerService::connect(&conn, worker).unwrap();
            service.hire().await.unwrap();
            chain.accept_job(worker).unwrap();
        }
        WorkerManagerService::connect(&conn, A)
            .unwrap()
            .retire()
            .await
            .unwrap();

        let manager = chain.worker_manager(&WORKER_MANAGER.to_string()).unwrap();
        let roster = user_workers(manager.as_ref(), &USER.to_string()).await.unwrap();
        assert_eq!(roster, vec![B.to_string()]);
    }
}

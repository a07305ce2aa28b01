use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Picks the lowest response id not yet evaluated in the session.
///
/// Candidates are sorted before the scan so the result does not depend on
/// storage order, and repeated calls with the same inputs agree.
pub fn select_next(candidates: &[i64], evaluated: &[i64]) -> Option<i64> {
    let evaluated: BTreeSet<i64> = evaluated.iter().copied().collect();
    let mut ordered = candidates.to_vec();
    ordered.sort_unstable();
    ordered.into_iter().find(|id| !evaluated.contains(id))
}

/// How many candidates remain for a session.
pub fn remaining(candidates: &[i64], evaluated: &[i64]) -> usize {
    let evaluated: BTreeSet<i64> = evaluated.iter().copied().collect();
    candidates
        .iter()
        .filter(|id| !evaluated.contains(id))
        .count()
}

/// One async mutex per session id, so selection and submission for a session never interleave.
///
/// Entries nobody holds or waits on are dropped on the next `lock`, so the map
/// only tracks sessions with work in flight.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionLocks {
    pub async fn lock(&self, session_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(session_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn picks_lowest_unevaluated_id() {
        assert_eq!(select_next(&[3, 1, 2], &[]), Some(1));
        assert_eq!(select_next(&[3, 1, 2], &[1]), Some(2));
        assert_eq!(select_next(&[3, 1, 2], &[2, 1]), Some(3));
    }

    #[test]
    fn signals_exhaustion() {
        assert_eq!(select_next(&[1, 2], &[1, 2]), None);
        assert_eq!(select_next(&[], &[]), None);
        assert_eq!(remaining(&[1, 2, 3], &[2]), 2);
        assert_eq!(remaining(&[1, 2], &[1, 2]), 0);
    }

    #[test]
    fn selection_is_stable_across_calls() {
        let candidates = [9, 4, 7, 5];
        let evaluated = [4];
        let first = select_next(&candidates, &evaluated);
        assert_eq!(first, Some(5));
        assert_eq!(select_next(&candidates, &evaluated), first);
    }

    #[test]
    fn evaluations_of_missing_responses_are_ignored() {
        assert_eq!(select_next(&[10, 11], &[99, 10]), Some(11));
    }

    #[tokio::test]
    async fn same_session_lock_is_exclusive() {
        let locks = SessionLocks::default();
        let guard = locks.lock(1).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.lock(1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        // A different session is not blocked.
        let _other = locks.lock(2).await;

        drop(guard);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn released_sessions_are_not_tracked() {
        let locks = SessionLocks::default();
        for session_id in 1..=100 {
            drop(locks.lock(session_id).await);
        }
        assert_eq!(locks.tracked(), 1);

        let held = locks.lock(7).await;
        drop(locks.lock(8).await);
        assert_eq!(locks.tracked(), 2);

        drop(held);
        drop(locks.lock(9).await);
        assert_eq!(locks.tracked(), 1);
    }
}

use crate::{
    constants::NONCES_PER_WINDOW,
    error::{LedgerError, Result},
    pow::{meets_difficulty, CancelToken, Seal},
    Candidate,
};
use rayon::prelude::*;
use tracing::{debug, trace};

/// Mines a candidate by searching nonce windows in parallel.
///
/// Windows are scanned in ascending order and `find_first` keeps the lowest
/// hit inside a window, so the returned nonce is the same one the sequential
/// `pow::seal` would find. Cancellation is observed between windows.
pub fn seal_parallel(candidate: &Candidate, difficulty: u32, cancel: &CancelToken) -> Result<Seal> {
    let preimage = candidate.preimage();
    let mut start = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        let end = start.saturating_add(NONCES_PER_WINDOW);

        let found = (start..end)
            .into_par_iter()
            .find_first(|nonce| meets_difficulty(&preimage.digest(*nonce), difficulty));

        if let Some(nonce) = found {
            let hash = hex::encode(preimage.digest(nonce));
            debug!(index = candidate.index, nonce, %hash, "seal found");
            return Ok(Seal { hash, nonce });
        }

        trace!(index = candidate.index, start, end, "no seal in window");
        // wrap to 0 rather than spin on an empty range
        start = if end == u64::MAX { 0 } else { end };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow;
    use serde_json::json;

    fn candidate(index: u64) -> Candidate {
        Candidate {
            index,
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            payload: json!({ "type": "complaint", "id": "X1" }),
            previous_hash: "0".to_string(),
        }
    }

    #[test]
    fn parallel_matches_sequential_nonce() {
        let cancel = CancelToken::new();
        for difficulty in 0..=3 {
            let c = candidate(1);
            let seq = pow::seal(&c, difficulty, &cancel).unwrap();
            let par = seal_parallel(&c, difficulty, &cancel).unwrap();
            assert_eq!(seq, par, "difficulty {difficulty}");
        }
    }

    #[test]
    fn parallel_known_seal() {
        let seal = seal_parallel(&candidate(1), 3, &CancelToken::new()).unwrap();
        assert_eq!(seal.nonce, 3445);
        assert_eq!(
            seal.hash,
            "000055640b0b0b8a4e8740d601c7b5ee0724e7c6063f680566a85e25d47cde2f"
        );
    }

    #[test]
    fn difficulty_zero_takes_first_nonce() {
        let seal = seal_parallel(&candidate(9), 0, &CancelToken::new()).unwrap();
        assert_eq!(seal.nonce, 0);
    }

    #[test]
    fn cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let res = seal_parallel(&candidate(1), 64, &cancel);
        assert!(matches!(res, Err(LedgerError::Cancelled)));
    }

    #[test]
    fn cancelled_from_another_thread() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let handle = std::thread::spawn(move || seal_parallel(&candidate(1), 64, &remote));
        std::thread::sleep(std::time::Duration::from_millis(50));
        cancel.cancel();
        let res = handle.join().unwrap();
        assert!(matches!(res, Err(LedgerError::Cancelled)));
    }
}

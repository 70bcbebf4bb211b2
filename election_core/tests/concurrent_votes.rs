use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

use election_core::*;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn core(max_votes: u64) -> ElectionCore<MemoryStore> {
    init();
    ElectionCore::new(MemoryStore::new(
        vec![
            Nominee::new("n1", "Ada"),
            Nominee::new("n2", "Grace"),
            Nominee::new("n3", "Edsger"),
        ],
        ElectionSettings::new(max_votes),
    ))
}

fn vote(idx: usize) -> VoteSubmission {
    VoteSubmission {
        name: format!("Voter {}", idx),
        email: format!("voter{}@example.com", idx),
        phone: None,
        nominee_id: NomineeId::new(["n1", "n2", "n3"][idx % 3]),
    }
}

// Runs `f(idx)` on `n` threads released at the same time.
fn race<F>(n: usize, f: F) -> Vec<Result<VoteReceipt, VoteRejection>>
where
    F: Fn(usize) -> Result<VoteReceipt, VoteRejection> + Sync,
{
    let barrier = Barrier::new(n);
    thread::scope(|s| {
        let handles: Vec<_> = (0..n)
            .map(|idx| {
                let barrier = &barrier;
                let f = &f;
                s.spawn(move || {
                    barrier.wait();
                    f(idx)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn assert_tally_matches_ledger(core: &ElectionCore<MemoryStore>) {
    let store = core.store();
    let nominees = store.nominees().unwrap();
    for n in nominees.iter() {
        assert_eq!(n.vote_count, store.count_voters_for(&n.id).unwrap(), "{}", n.id);
    }
    let sum: u64 = nominees.iter().map(|n| n.vote_count).sum();
    assert_eq!(sum, store.count_voters().unwrap());
    assert!(core.audit().unwrap().is_empty());
}

#[test]
fn same_origin_only_votes_once() {
    let core = core(1000);
    let results = race(16, |idx| core.cast_vote(&vote(idx), "198.51.100.9"));
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert_eq!(r.as_ref().unwrap_err().kind, RejectionKind::DuplicateOrigin);
    }
    assert_eq!(core.store().count_voters().unwrap(), 1);
    assert_tally_matches_ledger(&core);
}

#[test]
fn same_email_only_votes_once() {
    let core = core(1000);
    let results = race(16, |idx| {
        let mut s = vote(idx);
        s.email = if idx % 2 == 0 {
            "Ada@Example.com".to_string()
        } else {
            " ada@example.com".to_string()
        };
        core.cast_vote(&s, &format!("10.0.0.{}", idx))
    });
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert_eq!(r.as_ref().unwrap_err().kind, RejectionKind::DuplicateEmail);
    }
    assert_tally_matches_ledger(&core);
}

#[test]
fn single_seat_election_accepts_one_vote() {
    let core = core(1);
    let results = race(2, |idx| core.cast_vote(&vote(idx), &format!("10.0.1.{}", idx)));
    let accepted: Vec<&VoteReceipt> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    // The second submission either sees the cap or the close.
    assert!(!accepted.is_empty());
    for r in results.iter().filter(|r| r.is_err()) {
        assert_eq!(r.as_ref().unwrap_err().kind, RejectionKind::ElectionClosed);
    }
    assert!(core.store().settings().unwrap().is_closed);
    assert_tally_matches_ledger(&core);
    // Once settled, nothing else gets in.
    let late = core.cast_vote(&vote(99), "10.0.1.99");
    assert_eq!(late.unwrap_err().kind, RejectionKind::ElectionClosed);
}

#[test]
fn cap_converges_to_closed() {
    let max_votes = 60;
    let threads = 200;
    let core = core(max_votes);
    let results = race(threads, |idx| {
        core.cast_vote(&vote(idx), &format!("10.1.{}.{}", idx / 250, idx % 250))
    });
    let accepted = results.iter().filter(|r| r.is_ok()).count() as u64;
    assert!(accepted >= max_votes, "accepted {}", accepted);
    // Every submission past the cap read the count before some insert, so
    // the overshoot is bounded by the number of concurrent submissions.
    assert!(accepted < max_votes + threads as u64, "accepted {}", accepted);
    for r in results.iter().filter(|r| r.is_err()) {
        assert_eq!(r.as_ref().unwrap_err().kind, RejectionKind::ElectionClosed);
    }
    assert!(core.store().settings().unwrap().is_closed);
    assert_eq!(core.store().count_voters().unwrap(), accepted);
    assert_tally_matches_ledger(&core);

    let res = core.results().unwrap();
    assert!(res.is_closed);
    assert_eq!(res.remaining, 0);
    assert!(res.winner.is_some());
}

#[test]
fn tally_matches_ledger_at_rest() {
    let core = core(10_000);
    let rejected = AtomicUsize::new(0);
    let results = race(32, |idx| {
        // Every fourth submission reuses the email of the previous one.
        let id = if idx % 4 == 3 { idx - 1 } else { idx };
        let res = core.cast_vote(&vote(id), &format!("172.16.0.{}", idx));
        if res.is_err() {
            rejected.fetch_add(1, Ordering::SeqCst);
        }
        res
    });
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted + rejected.load(Ordering::SeqCst), 32);
    assert_eq!(accepted, 24);
    assert_eq!(core.store().count_voters().unwrap(), 24);
    assert_tally_matches_ledger(&core);

    core.reset().unwrap();
    assert_eq!(core.store().count_voters().unwrap(), 0);
    assert_tally_matches_ledger(&core);
}

#[test]
fn close_is_final_until_reset() {
    let core = core(100);
    core.cast_vote(&vote(0), "10.2.0.0").unwrap();
    assert_eq!(core.close().unwrap(), CloseOutcome::Closed);
    let results = race(8, |idx| core.cast_vote(&vote(idx + 1), &format!("10.2.0.{}", idx + 1)));
    assert!(results.iter().all(|r| r.as_ref().unwrap_err().kind == RejectionKind::ElectionClosed));
    assert_eq!(core.close().unwrap(), CloseOutcome::AlreadyClosed);
    assert_eq!(core.store().count_voters().unwrap(), 1);
}

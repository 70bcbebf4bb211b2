use serde::Serialize;

use crate::config::*;
use crate::store::{ElectionStore, StoreResult};

/// One line of the live results.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct NomineeStanding {
    pub id: NomineeId,
    pub name: String,
    pub photo_url: Option<String>,
    pub description: Option<String>,
    pub vote_count: u64,
    /// Share of the recorded votes, rounded to the nearest percent.
    pub percentage: u64,
}

/// A read-only view of the election, for the presentation layer.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct ElectionResults {
    /// In configured order.
    pub nominees: Vec<NomineeStanding>,
    /// The number of voter rows. This is not the sum of the counters, which
    /// may briefly lag behind.
    pub total_votes: u64,
    pub max_votes: u64,
    pub remaining: u64,
    pub is_closed: bool,
    /// Set once the election is closed or full.
    pub winner: Option<NomineeStanding>,
}

fn percentage(count: u64, total: u64) -> u64 {
    if total == 0 {
        0
    } else {
        (count * 100 + total / 2) / total
    }
}

/// Reads the current standing of the election.
pub fn collect_results<S: ElectionStore + ?Sized>(store: &S) -> StoreResult<ElectionResults> {
    let settings = store.settings()?;
    let total_votes = store.count_voters()?;
    let nominees: Vec<NomineeStanding> = store
        .nominees()?
        .into_iter()
        .map(|n| NomineeStanding {
            percentage: percentage(n.vote_count, total_votes),
            id: n.id,
            name: n.name,
            photo_url: n.photo_url,
            description: n.description,
            vote_count: n.vote_count,
        })
        .collect();

    let decided = settings.is_closed || total_votes >= settings.max_votes;
    // The earliest nominee keeps the lead on ties.
    let winner = if decided {
        nominees
            .iter()
            .fold(None, |best: Option<&NomineeStanding>, n| match best {
                Some(b) if b.vote_count >= n.vote_count => Some(b),
                _ => Some(n),
            })
            .cloned()
    } else {
        None
    };

    Ok(ElectionResults {
        remaining: settings.max_votes.saturating_sub(total_votes),
        total_votes,
        max_votes: settings.max_votes,
        is_closed: settings.is_closed,
        nominees,
        winner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store_with_votes(max_votes: u64, votes: &[&str]) -> MemoryStore {
        let store = MemoryStore::new(
            vec![
                Nominee::new("n1", "Ada"),
                Nominee::new("n2", "Grace"),
                Nominee::new("n3", "Edsger"),
            ],
            ElectionSettings::new(max_votes),
        );
        for (idx, nominee) in votes.iter().enumerate() {
            let id = NomineeId::new(*nominee);
            store
                .insert_voter(NewVoter {
                    name: format!("voter {}", idx),
                    email: format!("v{}@x.com", idx),
                    phone: None,
                    origin: format!("origin-{}", idx),
                    nominee_id: id.clone(),
                })
                .unwrap();
            store.increment_vote_count(&id).unwrap();
        }
        store
    }

    #[test]
    fn open_election_has_no_winner() {
        let store = store_with_votes(10, &["n1", "n2", "n2"]);
        let res = collect_results(&store).unwrap();
        assert_eq!(res.total_votes, 3);
        assert_eq!(res.remaining, 7);
        assert_eq!(res.winner, None);
        let shares: Vec<u64> = res.nominees.iter().map(|n| n.percentage).collect();
        assert_eq!(shares, vec![33, 67, 0]);
    }

    #[test]
    fn full_election_has_a_winner() {
        let store = store_with_votes(3, &["n1", "n2", "n2"]);
        let res = collect_results(&store).unwrap();
        assert_eq!(res.remaining, 0);
        assert_eq!(res.winner.map(|w| w.name), Some("Grace".to_string()));
    }

    #[test]
    fn ties_go_to_the_earliest_nominee() {
        let store = store_with_votes(10, &["n2", "n3"]);
        store.set_closed(true).unwrap();
        let res = collect_results(&store).unwrap();
        assert_eq!(res.winner.map(|w| w.id), Some(NomineeId::new("n2")));
    }

    #[test]
    fn empty_election() {
        let store = store_with_votes(5, &[]);
        let res = collect_results(&store).unwrap();
        assert_eq!(res.total_votes, 0);
        assert!(res.nominees.iter().all(|n| n.percentage == 0));
        assert_eq!(res.winner, None);
    }
}

// Searching and exporting the voter rows for administrators.

use std::collections::HashMap;
use std::io::Write;

use chrono::SecondsFormat;
use csv::Writer;

use election_core::{Nominee, NomineeId, Voter};

pub const CSV_HEADER: [&str; 6] = ["Name", "Email", "Phone", "Origin", "Nominee", "Timestamp"];

const UNKNOWN_NOMINEE: &str = "Unknown";

/// True if the name or email contains the search text, ignoring case, or
/// if the phone contains it verbatim.
pub fn matches_search(voter: &Voter, search: &str) -> bool {
    let needle = search.to_lowercase();
    voter.name.to_lowercase().contains(&needle)
        || voter.email.to_lowercase().contains(&needle)
        || voter
            .phone
            .as_deref()
            .map(|p| p.contains(search))
            .unwrap_or(false)
}

/// Keeps the voters matching the search. A blank search keeps everyone.
pub fn filter_voters(voters: Vec<Voter>, search: Option<&str>) -> Vec<Voter> {
    match search.map(str::trim).filter(|s| !s.is_empty()) {
        None => voters,
        Some(s) => voters.into_iter().filter(|v| matches_search(v, s)).collect(),
    }
}

/// Writes the voters as CSV, in the order given.
pub fn write_voters_csv<W: Write>(
    out: W,
    voters: &[Voter],
    nominees: &[Nominee],
) -> Result<(), csv::Error> {
    let names: HashMap<&NomineeId, &str> =
        nominees.iter().map(|n| (&n.id, n.name.as_str())).collect();
    let mut wtr = Writer::from_writer(out);
    wtr.write_record(CSV_HEADER)?;
    for v in voters.iter() {
        let nominee = names
            .get(&v.nominee_id)
            .copied()
            .unwrap_or(UNKNOWN_NOMINEE);
        let timestamp = v.created_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        wtr.write_record([
            v.name.as_str(),
            v.email.as_str(),
            v.phone.as_deref().unwrap_or(""),
            v.origin.as_str(),
            nominee,
            timestamp.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

use log::debug;

use crate::store::{ElectionStore, StoreResult};

/// The origin recorded when the transport carries no usable address.
///
/// All such submissions share this origin, so only the first of them can
/// vote. This is the accepted cost of deduplicating on the origin.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Lower-cases and trims an email. This is the form used for lookups and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Derives the origin of a submission from the transport metadata.
///
/// Arguments:
/// * `forwarded_for` the forwarded-address chain, if any. Only the first
///   entry of a comma-separated chain is used.
/// * `connecting_ip` the address reported by the edge proxy, used when the
///   chain is absent or empty.
pub fn resolve_origin(forwarded_for: Option<&str>, connecting_ip: Option<&str>) -> String {
    let first_forwarded = forwarded_for
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let connecting = connecting_ip.map(str::trim).filter(|s| !s.is_empty());
    first_forwarded
        .or(connecting)
        .unwrap_or(UNKNOWN_ORIGIN)
        .to_string()
}

/// Why a submission is a duplicate.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum DuplicateReason {
    Email,
    Origin,
}

/// Detects submissions from an identity or an origin that already voted.
///
/// This is an early, non-authoritative check: the store's unique keys on
/// insertion settle the races that slip through it.
pub struct DuplicateGuard<'a, S: ElectionStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ElectionStore + ?Sized> DuplicateGuard<'a, S> {
    pub fn new(store: &'a S) -> DuplicateGuard<'a, S> {
        DuplicateGuard { store }
    }

    /// Returns the reason if a voter row exists with this email or this origin.
    /// The email is expected to be normalized already.
    pub fn check(&self, email: &str, origin: &str) -> StoreResult<Option<DuplicateReason>> {
        if let Some(v) = self.store.voter_by_email(email)? {
            debug!("DuplicateGuard::check: email already used by voter {}", v.id);
            return Ok(Some(DuplicateReason::Email));
        }
        if let Some(v) = self.store.voter_by_origin(origin)? {
            debug!(
                "DuplicateGuard::check: origin {:?} already used by voter {}",
                origin, v.id
            );
            return Ok(Some(DuplicateReason::Origin));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::store::MemoryStore;

    #[test]
    fn emails_are_trimmed_and_lower_cased() {
        assert_eq!(normalize_email("  ADA@X.COM "), "ada@x.com");
        assert_eq!(normalize_email("ada@x.com"), "ada@x.com");
    }

    #[test]
    fn origin_uses_first_forwarded_entry() {
        assert_eq!(
            resolve_origin(Some("10.0.0.1, 172.16.0.1, 192.168.0.1"), Some("9.9.9.9")),
            "10.0.0.1"
        );
        assert_eq!(resolve_origin(Some(" 10.0.0.2 "), None), "10.0.0.2");
    }

    #[test]
    fn origin_falls_back_to_connecting_ip_then_unknown() {
        assert_eq!(resolve_origin(None, Some("9.9.9.9")), "9.9.9.9");
        assert_eq!(resolve_origin(Some(" "), Some("9.9.9.9")), "9.9.9.9");
        assert_eq!(resolve_origin(None, None), UNKNOWN_ORIGIN);
        assert_eq!(resolve_origin(Some(""), Some("")), UNKNOWN_ORIGIN);
    }

    #[test]
    fn guard_reports_email_before_origin() {
        let store = MemoryStore::new(vec![Nominee::new("n1", "Ada")], ElectionSettings::new(5));
        store
            .insert_voter(NewVoter {
                name: "Ada".to_string(),
                email: "ada@x.com".to_string(),
                phone: None,
                origin: "1.1.1.1".to_string(),
                nominee_id: NomineeId::new("n1"),
            })
            .unwrap();
        let guard = DuplicateGuard::new(&store);
        assert_eq!(
            guard.check("ada@x.com", "1.1.1.1").unwrap(),
            Some(DuplicateReason::Email)
        );
        assert_eq!(
            guard.check("bob@x.com", "1.1.1.1").unwrap(),
            Some(DuplicateReason::Origin)
        );
        assert_eq!(guard.check("bob@x.com", "2.2.2.2").unwrap(), None);
    }
}

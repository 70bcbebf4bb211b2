// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a nominee, as configured at election setup.
#[derive(Eq, PartialEq, Debug, Clone, Default, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NomineeId(pub String);

impl NomineeId {
    pub fn new(id: impl Into<String>) -> NomineeId {
        NomineeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for NomineeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of a voter row. Assigned by the store on insertion.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(pub String);

impl Display for VoterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vote submission, as received from the transport.
///
/// The fields are raw: nothing has been trimmed or normalized yet. Absent
/// or null fields read as empty and are rejected by validation.
/// The network origin is resolved separately by the caller, see [`crate::guard::resolve_origin`].
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteSubmission {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nominee_id: NomineeId,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A candidate in the election.
///
/// `vote_count` is a cache derived from the voter rows. It is never used
/// for correctness decisions.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Nominee {
    pub id: NomineeId,
    pub name: String,
    pub photo_url: Option<String>,
    pub description: Option<String>,
    pub vote_count: u64,
}

impl Nominee {
    pub fn new(id: &str, name: &str) -> Nominee {
        Nominee {
            id: NomineeId::new(id),
            name: name.to_string(),
            photo_url: None,
            description: None,
            vote_count: 0,
        }
    }
}

/// A voter row, as it is about to be inserted.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NewVoter {
    pub name: String,
    /// Normalized email (lower case, trimmed).
    pub email: String,
    pub phone: Option<String>,
    pub origin: String,
    pub nominee_id: NomineeId,
}

/// The durable proof that an identity and an origin have voted.
///
/// Rows are immutable once created. They are only removed in bulk by an
/// administrative reset.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    pub id: VoterId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub origin: String,
    pub nominee_id: NomineeId,
    pub created_at: DateTime<Utc>,
}

// ******** Output data structures *********

/// Confirmation returned for an accepted vote.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct VoteReceipt {
    pub voter_id: VoterId,
    pub nominee_id: NomineeId,
    /// The nominee's tally after this vote, if the tally path could produce one.
    pub vote_count: Option<u64>,
    /// Total number of recorded votes after this vote, if it could be read.
    pub total_votes: Option<u64>,
    /// True if this vote (or a concurrent one) filled the election.
    pub election_closed: bool,
}

/// The kinds of rejection a submission may receive.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum RejectionKind {
    ValidationError,
    ElectionClosed,
    DuplicateEmail,
    DuplicateOrigin,
    InvalidNominee,
    /// A durable store operation failed. Safe to retry.
    StorageFailure,
    InternalFault,
}

impl RejectionKind {
    /// The stable code sent to callers.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionKind::ValidationError => "VALIDATION_ERROR",
            RejectionKind::ElectionClosed => "ELECTION_CLOSED",
            RejectionKind::DuplicateEmail => "DUPLICATE_EMAIL",
            RejectionKind::DuplicateOrigin => "DUPLICATE_ORIGIN",
            RejectionKind::InvalidNominee => "INVALID_NOMINEE",
            RejectionKind::StorageFailure => "STORAGE_FAILURE",
            RejectionKind::InternalFault => "INTERNAL_FAULT",
        }
    }

    /// Business outcomes are expected and carry a precise reason.
    /// The others are server faults.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            RejectionKind::StorageFailure | RejectionKind::InternalFault
        )
    }
}

impl Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Why a submission was not accepted.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VoteRejection {
    pub kind: RejectionKind,
    pub message: String,
}

impl VoteRejection {
    pub fn new(kind: RejectionKind, message: &str) -> VoteRejection {
        VoteRejection {
            kind,
            message: message.to_string(),
        }
    }

    pub fn validation(message: &str) -> VoteRejection {
        VoteRejection::new(RejectionKind::ValidationError, message)
    }

    pub fn closed() -> VoteRejection {
        VoteRejection::new(RejectionKind::ElectionClosed, "Voting has been closed")
    }

    pub fn cap_reached() -> VoteRejection {
        VoteRejection::new(
            RejectionKind::ElectionClosed,
            "Maximum votes reached. Voting is closed.",
        )
    }

    pub fn duplicate_email() -> VoteRejection {
        VoteRejection::new(
            RejectionKind::DuplicateEmail,
            "This email has already been used to vote",
        )
    }

    pub fn duplicate_origin() -> VoteRejection {
        VoteRejection::new(
            RejectionKind::DuplicateOrigin,
            "A vote has already been cast from this device",
        )
    }

    pub fn invalid_nominee() -> VoteRejection {
        VoteRejection::new(RejectionKind::InvalidNominee, "Invalid nominee")
    }

    pub fn storage_failure() -> VoteRejection {
        VoteRejection::new(
            RejectionKind::StorageFailure,
            "Failed to record vote. Please try again.",
        )
    }

    pub fn storage_unavailable() -> VoteRejection {
        VoteRejection::new(
            RejectionKind::StorageFailure,
            "Storage is temporarily unavailable. Please try again.",
        )
    }

    pub fn internal_fault() -> VoteRejection {
        VoteRejection::new(RejectionKind::InternalFault, "An unexpected error occurred")
    }
}

impl Error for VoteRejection {}

impl Display for VoteRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ********* Configuration **********

/// The singleton settings row of the election.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ElectionSettings {
    /// The vote cap. Always positive.
    pub max_votes: u64,
    pub is_closed: bool,
}

impl ElectionSettings {
    /// Cap used when the election description does not provide one.
    pub const DEFAULT_MAX_VOTES: u64 = 60;

    pub fn new(max_votes: u64) -> ElectionSettings {
        ElectionSettings {
            max_votes,
            is_closed: false,
        }
    }
}

impl Default for ElectionSettings {
    fn default() -> Self {
        ElectionSettings::new(ElectionSettings::DEFAULT_MAX_VOTES)
    }
}

/// Field length limits applied to submissions.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct SubmissionLimits {
    pub max_name_len: usize,
    pub max_email_len: usize,
    pub max_phone_len: usize,
}

impl SubmissionLimits {
    pub const DEFAULT: SubmissionLimits = SubmissionLimits {
        max_name_len: 100,
        max_email_len: 255,
        max_phone_len: 20,
    };
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        SubmissionLimits::DEFAULT
    }
}

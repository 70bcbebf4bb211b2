use std::sync::LazyLock;

use regex::Regex;

use crate::config::*;
use crate::guard::normalize_email;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("invalid email pattern"));

/// A submission whose fields passed validation, trimmed and normalized,
/// ready to be stored.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CheckedSubmission {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub nominee_id: NomineeId,
}

/// Checks the fields of a submission, in order. The first failing field
/// decides the rejection.
pub fn validate_submission(
    submission: &VoteSubmission,
    limits: &SubmissionLimits,
) -> Result<CheckedSubmission, VoteRejection> {
    let name = submission.name.trim();
    if name.is_empty() || submission.name.chars().count() > limits.max_name_len {
        return Err(VoteRejection::validation("Valid name is required"));
    }

    let email = submission.email.trim();
    if !EMAIL_PATTERN.is_match(email) || submission.email.chars().count() > limits.max_email_len
    {
        return Err(VoteRejection::validation("Valid email is required"));
    }

    let phone = submission
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if let Some(p) = phone {
        if p.chars().count() > limits.max_phone_len {
            return Err(VoteRejection::validation("Phone number is too long"));
        }
    }

    if submission.nominee_id.as_str().trim().is_empty() {
        return Err(VoteRejection::validation("Nominee selection is required"));
    }

    Ok(CheckedSubmission {
        name: name.to_string(),
        email: normalize_email(email),
        phone: phone.map(|p| p.to_string()),
        nominee_id: submission.nominee_id.clone(),
    })
}

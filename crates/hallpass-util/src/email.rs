//! Email normalization
//!
//! Students are addressed by email everywhere in the protocol. Lookups and
//! roster storage both go through [`normalize_email`] so that
//! `" Alice@School.EDU "` and `"alice@school.edu"` name the same student.

/// Normalize an email address for identity comparison: trim surrounding
/// whitespace and lowercase.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Minimal shape check used when ingesting roster rows. Deliberately loose:
/// one `@` with non-empty sides. Real validation belongs to the roster
/// system of record.
pub fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

//! Repository and tag name validation, and pull references.
//!
//! Names are checked against the distribution reference grammar before they
//! are spliced into request paths, so a malformed name can never address a
//! different endpoint than the one intended.

use crate::error::{RegistryError, RegistryResult};

const MAX_TAG_LENGTH: usize = 128;

/// Check that `repository` is a valid repository name.
///
/// A name is one or more `/`-separated components. Each component is made of
/// lowercase alphanumeric runs joined by a single `.`, one or two `_`, or any
/// number of `-`.
pub fn validate_repository(repository: &str) -> RegistryResult<()> {
    if repository.is_empty() || !repository.split('/').all(valid_component) {
        return Err(RegistryError::InvalidReference(repository.to_owned()));
    }
    Ok(())
}

fn valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if !alnum(first) || !alnum(last) {
        return false;
    }

    let mut i = 0;
    while i < bytes.len() {
        if alnum(bytes[i]) {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && !alnum(bytes[i]) {
            i += 1;
        }
        let separator = &component[start..i];
        let ok = separator == "."
            || separator == "_"
            || separator == "__"
            || separator.bytes().all(|b| b == b'-');
        if !ok {
            return false;
        }
    }
    true
}

/// Check that `tag` is a valid tag name.
pub fn validate_tag(tag: &str) -> RegistryResult<()> {
    let mut bytes = tag.bytes();
    let valid = match bytes.next() {
        Some(first) => {
            (first.is_ascii_alphanumeric() || first == b'_')
                && tag.len() <= MAX_TAG_LENGTH
                && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidReference(tag.to_owned()))
    }
}

/// The reference an external client would pull `repository:tag` by.
pub fn pull_reference(hostname: &str, repository: &str, tag: &str) -> String {
    format!("{hostname}/{repository}:{tag}")
}

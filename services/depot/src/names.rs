//! Validation of names and digests taken from request paths.

use sha2::{Digest as _, Sha256};

use crate::error::{DepotError, DepotResult};

/// Validate an account or repository name: lowercase alphanumeric
/// components separated by single `.`, `_` or `-`.
pub fn validate_name(name: &str) -> DepotResult<()> {
    let component = |part: &str| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    };
    let valid = name.len() <= 255 && name.split(['.', '_', '-']).all(component);

    if valid {
        Ok(())
    } else {
        Err(DepotError::InvalidName(name.to_string()))
    }
}

/// Validate a tag name (`[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`).
pub fn validate_tag(tag: &str) -> DepotResult<()> {
    let mut bytes = tag.bytes();
    let valid = tag.len() <= 128
        && bytes
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(DepotError::BadRequest(format!("invalid tag name: {tag}")))
    }
}

/// Validate a digest of the form `<algorithm>:<hex>`.
pub fn validate_digest(digest: &str) -> DepotResult<()> {
    let Some((algorithm, encoded)) = digest.split_once(':') else {
        return Err(DepotError::InvalidDigest(digest.to_string()));
    };

    let valid = !algorithm.is_empty()
        && algorithm.bytes().all(|b| {
            b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'+' | b'.' | b'_' | b'-')
        })
        && !encoded.is_empty()
        && encoded.bytes().all(|b| b.is_ascii_hexdigit());

    if valid {
        Ok(())
    } else {
        Err(DepotError::InvalidDigest(digest.to_string()))
    }
}

/// Whether a manifest reference is a digest rather than a tag.
pub fn is_digest(reference: &str) -> bool {
    reference.contains(':')
}

/// The `sha256:<hex>` digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Check that `data` hashes to `expected`. Only sha256 is supported.
pub fn verify_digest(expected: &str, data: &[u8]) -> DepotResult<()> {
    validate_digest(expected)?;
    if !expected.starts_with("sha256:") {
        return Err(DepotError::InvalidDigest(format!(
            "unsupported digest algorithm: {expected}"
        )));
    }

    let actual = sha256_digest(data);
    if actual != expected {
        return Err(DepotError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

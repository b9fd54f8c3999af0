//! Deterministic object naming
//!
//! Every object the operator creates gets a name that is a pure function of
//! its inputs: readable parts first, then a short content hash. Re-running a
//! reconcile pass with identical inputs always lands on the same name, which
//! is what makes server-side apply idempotent across passes.

use aws_lc_rs::digest::{digest, SHA256};
use serde_json::Value;

use crate::{Error, Result};

/// Maximum length of a DNS-1123 label, and of most Kubernetes object names
pub const MAX_NAME_LENGTH: usize = 63;

/// Hex characters of hash appended by default
pub const DEFAULT_HASH_LENGTH: usize = 8;

/// Maximum length of a label value
pub const MAX_LABEL_VALUE_LENGTH: usize = 63;

/// Placeholder for a part that sanitizes to nothing
const EMPTY_PART: &str = "part";

/// Knobs for [`derived_name_with`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NameOptions {
    /// Hex characters of hash to append (0 disables the hash)
    pub hash_length: usize,
    /// Upper bound on the final name length
    pub max_length: usize,
}

impl Default for NameOptions {
    fn default() -> Self {
        Self {
            hash_length: DEFAULT_HASH_LENGTH,
            max_length: MAX_NAME_LENGTH,
        }
    }
}

impl NameOptions {
    /// Default options with a different hash length
    pub fn with_hash_length(hash_length: usize) -> Self {
        Self {
            hash_length,
            ..Self::default()
        }
    }
}

/// Build a name from readable parts plus a hash of `hash_inputs`.
///
/// Uses the default 8-character hash and 63-character ceiling.
pub fn derived_name(parts: &[&str], hash_inputs: &[Value]) -> String {
    derived_name_with(parts, hash_inputs, NameOptions::default())
}

/// Build a name from readable parts plus a hash of `hash_inputs`.
///
/// Each part is sanitized to the DNS-1123 alphabet. While the result would
/// exceed `max_length`, the longest part loses one character at a time.
/// The hash is omitted when `hash_inputs` is empty or `hash_length` is 0.
pub fn derived_name_with(parts: &[&str], hash_inputs: &[Value], opts: NameOptions) -> String {
    let mut parts: Vec<String> = parts
        .iter()
        .map(|p| {
            let s = sanitize_dns_label(p);
            if s.is_empty() {
                EMPTY_PART.to_string()
            } else {
                s
            }
        })
        .collect();

    let hash = if hash_inputs.is_empty() || opts.hash_length == 0 {
        None
    } else {
        Some(hash_values(hash_inputs, opts.hash_length))
    };

    let total_len = |parts: &[String]| -> usize {
        let base: usize = parts.iter().map(|p| p.len() + 1).sum();
        match &hash {
            Some(h) => base + h.len(),
            None => base.saturating_sub(1),
        }
    };

    while total_len(&parts) > opts.max_length {
        let Some((idx, _)) = parts
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_empty())
            .max_by_key(|(i, p)| (p.len(), std::cmp::Reverse(*i)))
        else {
            break;
        };
        let part = &mut parts[idx];
        part.pop();
        while part.ends_with('-') {
            part.pop();
        }
    }

    let mut segments: Vec<&str> = parts
        .iter()
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .collect();
    if let Some(h) = &hash {
        segments.push(h);
    }
    segments.join("-")
}

/// Hex SHA-256 over the `|`-joined JSON encoding of `values`, truncated.
///
/// `serde_json` maps are ordered, so equal inputs always encode the same way.
pub fn hash_values(values: &[Value], length: usize) -> String {
    let joined = values
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("|");
    short_hash(&joined, length)
}

/// Hex SHA-256 of a string, truncated to `length` characters.
pub fn short_hash(input: &str, length: usize) -> String {
    let hash = digest(&SHA256, input.as_bytes());
    let mut hex: String = hash.as_ref().iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(length);
    hex
}

/// Lowercase, replace anything outside `[a-z0-9-]` with `-`, trim dashes,
/// and cap at 63 characters.
pub fn sanitize_dns_label(input: &str) -> String {
    let mapped: String = input
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut out = mapped.trim_matches('-').to_string();
    out.truncate(MAX_NAME_LENGTH);
    out.trim_end_matches('-').to_string()
}

/// Sanitize an arbitrary string into a valid label value.
///
/// Runs of invalid characters collapse to a single `_`. Values that sanitize
/// to nothing are rejected.
pub fn sanitize_label_value(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut in_run = false;
    for c in input.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    let trim = |s: &str| s.trim_matches(|c| matches!(c, '_' | '.' | '-')).to_string();
    let mut out = trim(&out);
    out.truncate(MAX_LABEL_VALUE_LENGTH);
    let out = trim(&out);
    if out.is_empty() {
        return Err(Error::validation(format!(
            "label value {input:?} is empty after sanitization"
        )));
    }
    Ok(out)
}

/// Lowercase, collapse runs of characters outside `[a-z0-9-]` and repeated
/// dashes into a single `-`, trim dashes.
pub fn sanitize_name_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

/// Components of a container image reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageParts {
    /// Registry host, `docker.io` when implicit
    pub registry: String,
    /// Repository path between registry and image name (may be empty)
    pub repository: String,
    /// Sanitized image name (last path segment)
    pub name: String,
    /// Sanitized tag, or the first 6 hex characters of a digest
    pub tag: String,
}

/// Parse an image reference such as `ghcr.io/org/llama:v1.2` or `repo@sha256:abc`.
pub fn parse_image(image: &str) -> Result<ImageParts> {
    let image = image.trim();
    if image.is_empty() {
        return Err(Error::validation("image reference is empty"));
    }

    let (reference, tag) = match image.split_once('@') {
        Some((reference, digest)) => {
            let Some((_, hex)) = digest.split_once(':') else {
                return Err(Error::validation(format!(
                    "image {image:?} has a digest without an algorithm"
                )));
            };
            if hex.is_empty() {
                return Err(Error::validation(format!(
                    "image {image:?} has an empty digest"
                )));
            }
            (reference, hex.chars().take(6).collect::<String>())
        }
        None => {
            let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
            match image[last_slash..].rfind(':') {
                Some(i) => {
                    let colon = last_slash + i;
                    let tag = &image[colon + 1..];
                    if tag.is_empty() {
                        return Err(Error::validation(format!("image {image:?} has an empty tag")));
                    }
                    (&image[..colon], tag.to_string())
                }
                None => (image, "latest".to_string()),
            }
        }
    };

    let mut segments: Vec<&str> = reference.split('/').collect();
    let registry = if segments.len() > 1
        && (segments[0].contains('.') || segments[0].contains(':') || segments[0] == "localhost")
    {
        segments.remove(0).to_string()
    } else {
        "docker.io".to_string()
    };
    let name = segments.pop().unwrap_or_default();
    if name.is_empty() {
        return Err(Error::validation(format!("image {image:?} has no name")));
    }

    Ok(ImageParts {
        registry,
        repository: segments.join("/"),
        name: sanitize_name_component(name),
        tag: sanitize_name_component(&tag),
    })
}

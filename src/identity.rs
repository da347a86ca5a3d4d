//! Step identity hashing
//!
//! A step's identity is a sha256 over its command text, its parent step's
//! identity, and the resolved digests of its declared inputs, in
//! declaration order. File inputs contribute content digests only, so a
//! rename never changes identity but a content edit always does.
//!
//! Mount caches are excluded by construction: this module has no way to
//! receive them. Their contents are mutable side-effect state and must
//! not participate in the hit/miss decision.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque fixed-length step identity (sha256, lowercase hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepIdentity(String);

impl StepIdentity {
    /// Wrap a precomputed hex digest (used by stores deserializing keys)
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Full hex form
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs and reports (first 12 hex chars)
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for StepIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// A step input after resolution by the planner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedInput {
    /// Content digest of a build context file
    FileDigest(String),
    /// Identity of an upstream step whose output is consumed
    Artifact(StepIdentity),
}

// Domain separation tags; every field is tagged and length-prefixed so
// adjacent fields can never be confused for one another.
const TAG_COMMAND: u8 = 0x01;
const TAG_PARENT: u8 = 0x02;
const TAG_FILE: u8 = 0x03;
const TAG_ARTIFACT: u8 = 0x04;

/// Compute a step's identity from its command, parent identity, and
/// resolved inputs in declaration order.
pub fn step_identity(
    command: &str,
    parent: Option<&StepIdentity>,
    inputs: &[ResolvedInput],
) -> StepIdentity {
    let mut hasher = Sha256::new();

    update_field(&mut hasher, TAG_COMMAND, command.as_bytes());
    if let Some(parent) = parent {
        update_field(&mut hasher, TAG_PARENT, parent.as_hex().as_bytes());
    }
    for input in inputs {
        match input {
            ResolvedInput::FileDigest(digest) => {
                update_field(&mut hasher, TAG_FILE, digest.as_bytes());
            }
            ResolvedInput::Artifact(identity) => {
                update_field(&mut hasher, TAG_ARTIFACT, identity.as_hex().as_bytes());
            }
        }
    }

    StepIdentity(hex::encode(hasher.finalize()))
}

fn update_field(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(digest: &str) -> ResolvedInput {
        ResolvedInput::FileDigest(digest.to_string())
    }

    #[test]
    fn deterministic() {
        let a = step_identity("compile", None, &[file("abc")]);
        let b = step_identity("compile", None, &[file("abc")]);
        assert_eq!(a, b);
        assert_eq!(a.as_hex().len(), 64);
    }

    #[test]
    fn command_changes_identity() {
        let a = step_identity("compile", None, &[]);
        let b = step_identity("compile -O2", None, &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn parent_changes_identity() {
        let p1 = step_identity("install", None, &[]);
        let p2 = step_identity("install --frozen", None, &[]);

        let a = step_identity("compile", Some(&p1), &[]);
        let b = step_identity("compile", Some(&p2), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn no_parent_differs_from_parent() {
        let p = step_identity("install", None, &[]);
        let a = step_identity("compile", None, &[]);
        let b = step_identity("compile", Some(&p), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn input_digest_changes_identity() {
        let a = step_identity("compile", None, &[file("aaa")]);
        let b = step_identity("compile", None, &[file("bbb")]);
        assert_ne!(a, b);
    }

    #[test]
    fn input_order_matters() {
        let a = step_identity("compile", None, &[file("aaa"), file("bbb")]);
        let b = step_identity("compile", None, &[file("bbb"), file("aaa")]);
        assert_ne!(a, b);
    }

    #[test]
    fn artifact_and_file_inputs_are_distinguished() {
        let upstream = StepIdentity::from_hex("ab".repeat(32));
        let a = step_identity(
            "run",
            None,
            &[ResolvedInput::Artifact(upstream.clone())],
        );
        let b = step_identity("run", None, &[file(upstream.as_hex())]);
        assert_ne!(a, b);
    }

    #[test]
    fn field_boundaries_unambiguous() {
        let a = step_identity("ab", None, &[file("c")]);
        let b = step_identity("a", None, &[file("bc")]);
        assert_ne!(a, b);
    }

    #[test]
    fn short_form() {
        let id = step_identity("x", None, &[]);
        assert_eq!(id.short().len(), 12);
        assert!(id.as_hex().starts_with(id.short()));
    }
}

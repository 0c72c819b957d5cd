//! Integrity tags for converted LaTeX.
//!
//! A tag is a 5-digit code derived from the identifier that produced the
//! output and the output itself. It is appended to the LaTeX as a trailing
//! comment, so the annotated source still compiles, and can later be
//! recomputed to check that the content was not altered or passed between
//! students.
//!
//! ## Derivation
//!
//! ```text
//! digest = SHA-256(identifier_bytes ++ content_bytes)   (UTF-8, this order)
//! tag    = big_endian_uint(digest) mod 100000
//! ```
//!
//! Reimplementations that must interoperate only need SHA-256 and the fixed
//! concatenation order above.

use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::gate::Identifier;

/// Exclusive upper bound of tag values.
pub const TAG_MODULUS: u32 = 100_000;

/// Delimiter placed between content and tag. `%` starts a LaTeX comment.
pub const ANNOTATION_DELIMITER: &str = "  % ";

/// Derived integrity code in `[0, 100000)`. Renders zero-padded to 5 digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntegrityTag(u32);

impl IntegrityTag {
    pub fn value(self) -> u32 {
        self.0
    }

    /// Parse a rendered tag. Accepts exactly 5 ASCII digits.
    pub fn parse(rendered: &str) -> Option<Self> {
        if rendered.len() != 5 || !rendered.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rendered.parse::<u32>().ok().map(Self)
    }
}

impl fmt::Display for IntegrityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:05}", self.0)
    }
}

/// Compute the integrity tag for `content` produced under `identifier`.
pub fn tag(identifier: &Identifier, content: &str) -> IntegrityTag {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_str().as_bytes());
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();

    // Horner reduction of the 256-bit big-endian integer; never exceeds
    // 256 * 100000 so u64 is plenty.
    let modulus = u64::from(TAG_MODULUS);
    let reduced = digest
        .iter()
        .fold(0_u64, |acc, &byte| (acc * 256 + u64::from(byte)) % modulus);

    IntegrityTag(u32::try_from(reduced).unwrap_or_default())
}

/// Append the tag to `content` as a trailing LaTeX comment.
pub fn annotate(content: &str, tag: IntegrityTag) -> String {
    format!("{content}{ANNOTATION_DELIMITER}{tag}")
}

/// Split annotated output back into `(content, tag)`.
///
/// Returns `None` when there is no trailing tag comment.
pub fn split_annotation(annotated: &str) -> Option<(&str, IntegrityTag)> {
    let (content, rendered) = annotated.rsplit_once(ANNOTATION_DELIMITER)?;
    let tag = IntegrityTag::parse(rendered.trim_end())?;
    Some((content, tag))
}

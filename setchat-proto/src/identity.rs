//! User identities and the normalized recipient-set key.
//!
//! A conversation has no id of its own. It is named by the identities of
//! the other participants, and two recipient lists name the same
//! conversation exactly when their [`RecipientKey`]s are equal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, externally supplied user identity.
///
/// Used both as the sender/recipient key in messages and as the name of
/// the relay's connection group for that user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identity is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Builds a `Vec<Identity>` from string slices.
///
/// Mostly a convenience for tests and command parsing.
pub fn identities<'a>(ids: impl IntoIterator<Item = &'a str>) -> Vec<Identity> {
    ids.into_iter().map(Identity::from).collect()
}

/// Order-independent key for a recipient set.
///
/// The identities are sorted and duplicates are kept, so equality is
/// multiset equality: `[b, c]` equals `[c, b]`, but `[b, b]` does not
/// equal `[b]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecipientKey(Vec<Identity>);

impl RecipientKey {
    /// Normalizes a recipient list into its key.
    #[must_use]
    pub fn new(recipients: &[Identity]) -> Self {
        let mut sorted = recipients.to_vec();
        sorted.sort_unstable();
        Self(sorted)
    }

    /// Returns `true` if both lists name the same conversation.
    #[must_use]
    pub fn matches(a: &[Identity], b: &[Identity]) -> bool {
        a.len() == b.len() && Self::new(a) == Self::new(b)
    }
}

impl fmt::Display for RecipientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(id.as_str())?;
        }
        Ok(())
    }
}

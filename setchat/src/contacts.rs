//! Contact directory: identity to display name.
//!
//! The conversation core only reads from a [`ContactDirectory`]. A lookup
//! miss is not an error; the raw identity string is shown instead.

use serde::{Deserialize, Serialize};
use setchat_proto::identity::Identity;

/// A named contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// The contact's identity.
    pub id: Identity,
    /// Display name chosen by the local user.
    pub name: String,
}

/// Read-only lookup of display names.
pub trait ContactDirectory {
    /// Returns the display name for `id`, if the directory knows it.
    fn lookup(&self, id: &Identity) -> Option<&str>;
}

/// Resolves a display name, falling back to the identity itself.
pub fn display_name(directory: &(impl ContactDirectory + ?Sized), id: &Identity) -> String {
    directory
        .lookup(id)
        .filter(|name| !name.is_empty())
        .map_or_else(|| id.as_str().to_string(), str::to_string)
}

/// In-memory, insertion-ordered contact list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactList {
    contacts: Vec<Contact>,
}

impl ContactList {
    /// Creates an empty contact list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            contacts: Vec::new(),
        }
    }

    /// Adds a contact, or renames it if the identity is already known.
    pub fn add(&mut self, id: Identity, name: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = self.contacts.iter_mut().find(|c| c.id == id) {
            existing.name = name;
        } else {
            self.contacts.push(Contact { id, name });
        }
    }

    /// Iterates contacts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    /// Number of contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Returns `true` if there are no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

impl FromIterator<Contact> for ContactList {
    fn from_iter<I: IntoIterator<Item = Contact>>(iter: I) -> Self {
        let mut list = Self::new();
        for contact in iter {
            list.add(contact.id, contact.name);
        }
        list
    }
}

impl ContactDirectory for ContactList {
    fn lookup(&self, id: &Identity) -> Option<&str> {
        self.contacts
            .iter()
            .find(|c| &c.id == id)
            .map(|c| c.name.as_str())
    }
}

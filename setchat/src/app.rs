//! Line-oriented front end: command parsing, command handling and text
//! rendering.
//!
//! Input lines starting with `/` are commands; anything else is sent to
//! the selected conversation. Conversations are numbered from 1 on screen.

use std::sync::Arc;

use setchat_proto::identity::Identity;
use tokio::sync::watch;

use crate::contacts::{ContactDirectory, ContactList, display_name};
use crate::conversation::FormattedConversation;
use crate::session::Session;
use crate::store::Snapshot;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/new a,b`: start (or reopen) a conversation.
    New(Vec<Identity>),
    /// `/select N`: select conversation `N` (1-based).
    Select(usize),
    /// `/list`: show all conversations.
    List,
    /// `/contact ID NAME`: name an identity.
    Contact {
        /// Identity being named.
        id: Identity,
        /// Display name.
        name: String,
    },
    /// `/id IDENTITY`: switch identity.
    SwitchIdentity(Identity),
    /// `/help`.
    Help,
    /// `/quit`.
    Quit,
    /// Plain text for the selected conversation.
    Send(String),
}

/// Errors from [`parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A command was given without its argument.
    #[error("usage: {0}")]
    Usage(&'static str),

    /// `/select` got something that is not a positive number.
    #[error("not a conversation number: {0}")]
    InvalidIndex(String),

    /// The command name is unknown.
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),
}

/// Parses one input line. Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`ParseError`] for unknown commands or missing arguments.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));

    let parsed = match name {
        "new" => {
            let recipients: Vec<Identity> = rest
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(Identity::new)
                .collect();
            if recipients.is_empty() {
                return Err(ParseError::Usage("/new ID[,ID...]"));
            }
            Command::New(recipients)
        }
        "select" => {
            if rest.is_empty() {
                return Err(ParseError::Usage("/select N"));
            }
            match rest.parse::<usize>() {
                Ok(n) if n > 0 => Command::Select(n),
                _ => return Err(ParseError::InvalidIndex(rest.to_string())),
            }
        }
        "list" => Command::List,
        "contact" => {
            let Some((id, name)) = rest.split_once(char::is_whitespace) else {
                return Err(ParseError::Usage("/contact ID NAME"));
            };
            Command::Contact {
                id: Identity::new(id),
                name: name.trim().to_string(),
            }
        }
        "id" => {
            if rest.is_empty() {
                return Err(ParseError::Usage("/id IDENTITY"));
            }
            Command::SwitchIdentity(Identity::new(rest))
        }
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(parsed))
}

/// What the caller should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Print these lines and keep reading.
    Continue(Vec<String>),
    /// Stop.
    Quit,
}

/// Front-end state: the session plus the contact list.
pub struct App {
    session: Session,
    contacts: watch::Sender<ContactList>,
}

impl App {
    /// Creates the front end over `session`.
    #[must_use]
    pub fn new(session: Session, contacts: ContactList) -> Self {
        Self {
            session,
            contacts: watch::Sender::new(contacts),
        }
    }

    /// The underlying session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Subscribes to contact list changes.
    #[must_use]
    pub fn subscribe_contacts(&self) -> watch::Receiver<ContactList> {
        self.contacts.subscribe()
    }

    /// Current contact list.
    #[must_use]
    pub fn contacts(&self) -> ContactList {
        self.contacts.borrow().clone()
    }

    /// Parses and applies one input line.
    pub async fn handle_line(&self, line: &str) -> Outcome {
        match parse(line) {
            Ok(Some(command)) => self.apply(command).await,
            Ok(None) => Outcome::Continue(Vec::new()),
            Err(e) => Outcome::Continue(vec![e.to_string()]),
        }
    }

    /// Applies a parsed command.
    pub async fn apply(&self, command: Command) -> Outcome {
        let store = self.session.store();
        let lines = match command {
            Command::New(recipients) => match store.create_conversation(&recipients) {
                Ok(position) => {
                    store.select_conversation_index(position);
                    self.selected_lines()
                }
                Err(e) => vec![format!("error: {e}")],
            },
            Command::Select(n) => {
                store.select_conversation_index(n - 1);
                let lines = self.selected_lines();
                if lines.is_empty() {
                    vec![format!("no conversation {n}")]
                } else {
                    lines
                }
            }
            Command::List => {
                let contacts = self.contacts.borrow();
                let lines = render_list(&store.conversations(&*contacts));
                if lines.is_empty() {
                    vec!["no conversations yet (start one with /new ID)".to_string()]
                } else {
                    lines
                }
            }
            Command::Contact { id, name } => {
                let line = format!("{id} is now shown as {name}");
                self.contacts.send_modify(|contacts| contacts.add(id, name));
                vec![line]
            }
            Command::SwitchIdentity(identity) => {
                match self.session.switch_identity(identity.clone()).await {
                    Ok(()) => vec![format!("connected as {identity}")],
                    Err(e) => vec![format!("now {identity}, but offline: {e}")],
                }
            }
            Command::Help => help_lines(),
            Command::Quit => return Outcome::Quit,
            Command::Send(text) => match self.session.send_to_selected(text).await {
                Ok(Some(true)) => Vec::new(),
                Ok(Some(false)) => vec!["(offline: message kept locally)".to_string()],
                Ok(None) => vec!["no conversation selected (use /new or /select)".to_string()],
                Err(e) => vec![format!("error: {e}")],
            },
        };
        Outcome::Continue(lines)
    }

    /// Lines announcing messages from others that arrived between two
    /// snapshots.
    #[must_use]
    pub fn updates(&self, previous: &Snapshot, current: &Snapshot) -> Vec<String> {
        let contacts = self.contacts.borrow();
        render_updates(
            previous,
            current,
            &*contacts,
            &self.session.store().local_identity(),
        )
    }

    fn selected_lines(&self) -> Vec<String> {
        let contacts = self.contacts.borrow();
        self.session
            .store()
            .selected_conversation(&*contacts)
            .map(|view| render_conversation(&view))
            .unwrap_or_default()
    }
}

/// One line per conversation, selected one marked with `*`.
#[must_use]
pub fn render_list(conversations: &[FormattedConversation]) -> Vec<String> {
    conversations
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let marker = if c.selected { '*' } else { ' ' };
            format!(
                "{marker} {}. {} ({} messages)",
                i + 1,
                c.title(),
                c.messages.len()
            )
        })
        .collect()
}

/// Header plus one line per message.
#[must_use]
pub fn render_conversation(conversation: &FormattedConversation) -> Vec<String> {
    let mut lines = Vec::with_capacity(conversation.messages.len() + 1);
    lines.push(format!("== {} ==", conversation.title()));
    for message in &conversation.messages {
        if message.from_me {
            lines.push(format!("  me: {}", message.text));
        } else {
            lines.push(format!("  {}: {}", message.sender_name, message.text));
        }
    }
    lines
}

/// Messages from others that appear in `current` but not in `previous`.
///
/// Conversations whose `Arc` did not change are skipped without looking at
/// their messages.
pub fn render_updates(
    previous: &Snapshot,
    current: &Snapshot,
    directory: &(impl ContactDirectory + ?Sized),
    local: &Identity,
) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, conversation) in current.conversations().iter().enumerate() {
        let seen = match previous.conversations().get(i) {
            Some(old) if Arc::ptr_eq(old, conversation) => continue,
            Some(old) => old.messages.len(),
            None => 0,
        };
        let title = conversation
            .recipients
            .iter()
            .map(|id| display_name(directory, id))
            .collect::<Vec<_>>()
            .join(", ");
        for message in conversation.messages.iter().skip(seen) {
            if &message.sender != local {
                lines.push(format!(
                    "[{}. {title}] {}: {}",
                    i + 1,
                    display_name(directory, &message.sender),
                    message.text
                ));
            }
        }
    }
    lines
}

fn help_lines() -> Vec<String> {
    [
        "/new ID[,ID...]   start or reopen a conversation",
        "/select N         select conversation N",
        "/list             list conversations",
        "/contact ID NAME  name an identity",
        "/id IDENTITY      switch identity",
        "/quit             exit",
        "anything else is sent to the selected conversation",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

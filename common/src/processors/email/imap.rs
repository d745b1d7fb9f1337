// Minimal IMAP4rev1 client: LOGIN, SELECT, UID SEARCH, UID FETCH, UID STORE, LOGOUT

use super::transport::MailConnection;
use super::{MailQuery, MailboxClient};
use crate::errors::MailError;
use async_trait::async_trait;

pub struct ImapClient {
    conn: MailConnection,
    tag: u32,
    deleted: bool,
}

/// Quote a string argument, escaping backslashes and double quotes
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Byte count of a trailing `{N}` literal marker, if present
fn literal_len(line: &str) -> Option<usize> {
    let rest = line.strip_suffix('}')?;
    let open = rest.rfind('{')?;
    rest[open + 1..].trim_end_matches('+').parse().ok()
}

/// Build UID SEARCH criteria. Non-ASCII filters are left to client-side matching.
fn search_criteria(query: &MailQuery) -> String {
    let mut criteria = Vec::new();
    if query.unseen_only {
        criteria.push("UNSEEN".to_string());
    }
    if let Some(from) = query.from.as_deref().filter(|s| s.is_ascii()) {
        criteria.push(format!("FROM {}", quote(from)));
    }
    if let Some(subject) = query.subject.as_deref().filter(|s| s.is_ascii()) {
        criteria.push(format!("SUBJECT {}", quote(subject)));
    }
    if criteria.is_empty() {
        "ALL".to_string()
    } else {
        criteria.join(" ")
    }
}

impl ImapClient {
    /// Read the greeting, then log in and select `folder`
    pub async fn login(
        conn: MailConnection,
        username: &str,
        password: &str,
        folder: &str,
    ) -> Result<Self, MailError> {
        let mut client = Self {
            conn,
            tag: 0,
            deleted: false,
        };

        let greeting = client.conn.read_line().await?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailError::Protocol(format!("unexpected greeting: {}", greeting)));
        }

        client
            .command(&format!("LOGIN {} {}", quote(username), quote(password)))
            .await
            .map_err(|e| match e {
                MailError::Protocol(msg) => MailError::Authentication(msg),
                other => other,
            })?;
        client.command(&format!("SELECT {}", quote(folder))).await?;
        Ok(client)
    }

    /// Send a tagged command and collect untagged lines until its completion.
    ///
    /// Literals announced with `{N}` are read as raw bytes and returned in
    /// the order they arrive.
    async fn command(&mut self, command: &str) -> Result<(Vec<String>, Vec<Vec<u8>>), MailError> {
        self.tag += 1;
        let tag = format!("A{:04}", self.tag);
        self.conn.write_line(&format!("{} {}", tag, command)).await?;

        let mut lines = Vec::new();
        let mut literals = Vec::new();
        loop {
            let line = self.conn.read_line().await?;
            if let Some(status) = line.strip_prefix(&tag) {
                let status = status.trim_start();
                if status.starts_with("OK") {
                    return Ok((lines, literals));
                }
                return Err(MailError::Protocol(format!(
                    "{} failed: {}",
                    command.split_whitespace().next().unwrap_or_default(),
                    status
                )));
            }
            if let Some(len) = literal_len(&line) {
                literals.push(self.conn.read_exact(len).await?);
            }
            lines.push(line);
        }
    }
}

#[async_trait]
impl MailboxClient for ImapClient {
    async fn list(&mut self, query: &MailQuery) -> Result<Vec<String>, MailError> {
        let (lines, _) = self
            .command(&format!("UID SEARCH {}", search_criteria(query)))
            .await?;

        Ok(lines
            .iter()
            .filter_map(|line| line.strip_prefix("* SEARCH"))
            .flat_map(|ids| ids.split_whitespace())
            .map(str::to_string)
            .collect())
    }

    async fn retrieve(&mut self, id: &str) -> Result<Vec<u8>, MailError> {
        let (_, mut literals) = self.command(&format!("UID FETCH {} BODY[]", id)).await?;
        if literals.is_empty() {
            return Err(MailError::Protocol(format!("no body returned for UID {}", id)));
        }
        Ok(literals.swap_remove(0))
    }

    async fn delete(&mut self, id: &str) -> Result<(), MailError> {
        self.command(&format!("UID STORE {} +FLAGS (\\Deleted)", id))
            .await?;
        self.deleted = true;
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), MailError> {
        if self.deleted {
            self.command("EXPUNGE").await?;
        }
        self.command("LOGOUT").await?;
        Ok(())
    }
}

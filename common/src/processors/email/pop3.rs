// Minimal POP3 client: USER/PASS, UIDL (or STAT), RETR, DELE, QUIT

use super::transport::{MailConnection, MAX_MESSAGE_BYTES};
use super::{MailQuery, MailboxClient};
use crate::errors::MailError;
use async_trait::async_trait;
use std::collections::HashMap;

pub struct Pop3Client {
    conn: MailConnection,
    // Listed id → message number for this session
    numbers: HashMap<String, u32>,
    // False when the server lacks UIDL and ids are message numbers
    uidl: bool,
}

impl Pop3Client {
    pub async fn login(
        conn: MailConnection,
        username: &str,
        password: &str,
    ) -> Result<Self, MailError> {
        let mut client = Self {
            conn,
            numbers: HashMap::new(),
            uidl: true,
        };

        let greeting = client.conn.read_line().await?;
        if !greeting.starts_with("+OK") {
            return Err(MailError::Protocol(format!("unexpected greeting: {}", greeting)));
        }

        let authenticate = async {
            client.command(&format!("USER {}", username)).await?;
            client.command(&format!("PASS {}", password)).await
        };
        authenticate.await.map_err(|e| match e {
            MailError::Protocol(msg) => MailError::Authentication(msg),
            other => other,
        })?;

        Ok(client)
    }

    /// Send a command and return its `+OK` status line
    async fn command(&mut self, command: &str) -> Result<String, MailError> {
        self.conn.write_line(command).await?;
        let status = self.conn.read_line().await?;
        match status.strip_prefix("+OK") {
            Some(rest) => Ok(rest.trim().to_string()),
            None => Err(MailError::Protocol(format!(
                "{} failed: {}",
                command.split_whitespace().next().unwrap_or_default(),
                status
            ))),
        }
    }

    /// Read a dot-terminated multi-line response, undoing dot-stuffing
    async fn read_multiline(&mut self) -> Result<Vec<u8>, MailError> {
        let mut data = Vec::new();
        loop {
            let line = self.conn.read_raw_line().await?;
            let content = line
                .strip_suffix(b"\r\n")
                .or_else(|| line.strip_suffix(b"\n"))
                .unwrap_or(&line);
            if content == b"." {
                return Ok(data);
            }
            let unstuffed = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
            if data.len() + unstuffed.len() > MAX_MESSAGE_BYTES {
                return Err(MailError::Protocol(format!(
                    "message exceeds {} bytes",
                    MAX_MESSAGE_BYTES
                )));
            }
            data.extend_from_slice(unstuffed);
        }
    }

    async fn list_by_uidl(&mut self) -> Result<Option<Vec<(String, u32)>>, MailError> {
        self.conn.write_line("UIDL").await?;
        let status = self.conn.read_line().await?;
        if !status.starts_with("+OK") {
            return Ok(None);
        }

        let listing = self.read_multiline().await?;
        let entries = String::from_utf8_lossy(&listing)
            .lines()
            .filter_map(|line| {
                let (number, uid) = line.trim().split_once(' ')?;
                Some((uid.to_string(), number.parse().ok()?))
            })
            .collect();
        Ok(Some(entries))
    }

    async fn list_by_stat(&mut self) -> Result<Vec<(String, u32)>, MailError> {
        let stat = self.command("STAT").await?;
        let count: u32 = stat
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| MailError::Protocol(format!("malformed STAT reply: {}", stat)))?;
        Ok((1..=count).map(|n| (n.to_string(), n)).collect())
    }

    fn number_for(&self, id: &str) -> Result<u32, MailError> {
        self.numbers
            .get(id)
            .copied()
            .ok_or_else(|| MailError::Protocol(format!("message {} was not listed", id)))
    }
}

#[async_trait]
impl MailboxClient for Pop3Client {
    /// POP3 has no server-side search; every message is listed
    async fn list(&mut self, _query: &MailQuery) -> Result<Vec<String>, MailError> {
        let entries = match self.list_by_uidl().await? {
            Some(entries) => entries,
            None => {
                self.uidl = false;
                self.list_by_stat().await?
            }
        };

        self.numbers = entries.iter().cloned().collect();
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }

    fn ids_are_stable(&self) -> bool {
        self.uidl
    }

    async fn retrieve(&mut self, id: &str) -> Result<Vec<u8>, MailError> {
        let number = self.number_for(id)?;
        self.command(&format!("RETR {}", number)).await?;
        self.read_multiline().await
    }

    async fn delete(&mut self, id: &str) -> Result<(), MailError> {
        let number = self.number_for(id)?;
        self.command(&format!("DELE {}", number)).await?;
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), MailError> {
        // Deletions are committed by QUIT
        self.command("QUIT").await?;
        Ok(())
    }
}

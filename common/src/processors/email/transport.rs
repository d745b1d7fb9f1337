// TCP and TLS connections shared by the IMAP and POP3 clients

use crate::errors::MailError;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest message body accepted from a server
pub const MAX_MESSAGE_BYTES: usize = 50 * 1024 * 1024;

pub trait MailIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> MailIo for T {}

/// Line-oriented connection to a mail server
pub struct MailConnection {
    stream: BufReader<Box<dyn MailIo>>,
}

impl MailConnection {
    pub async fn open(host: &str, port: u16, use_tls: bool) -> Result<Self, MailError> {
        let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| MailError::Timeout)??;

        let io: Box<dyn MailIo> = if use_tls {
            let connector = TlsConnector::from(tls_config()?);
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|e| MailError::Tls(format!("invalid server name '{}': {}", host, e)))?;
            let tls = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp))
                .await
                .map_err(|_| MailError::Timeout)?
                .map_err(|e| MailError::Tls(e.to_string()))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        Ok(Self::from_io(io))
    }

    pub fn from_io(io: Box<dyn MailIo>) -> Self {
        Self {
            stream: BufReader::new(io),
        }
    }

    /// Read one CRLF-terminated line, without the terminator
    pub async fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        let read = tokio::time::timeout(IO_TIMEOUT, self.stream.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| MailError::Timeout)??;
        if read == 0 {
            return Err(MailError::Protocol("connection closed by server".to_string()));
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, MailError> {
        if len > MAX_MESSAGE_BYTES {
            return Err(MailError::Protocol(format!(
                "server announced {} bytes, limit is {}",
                len, MAX_MESSAGE_BYTES
            )));
        }
        let mut buf = vec![0u8; len];
        tokio::time::timeout(IO_TIMEOUT, self.stream.read_exact(&mut buf))
            .await
            .map_err(|_| MailError::Timeout)??;
        Ok(buf)
    }

    /// Read a raw line including its terminator
    pub async fn read_raw_line(&mut self) -> Result<Vec<u8>, MailError> {
        let mut buf = Vec::new();
        let read = tokio::time::timeout(IO_TIMEOUT, self.stream.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| MailError::Timeout)??;
        if read == 0 {
            return Err(MailError::Protocol("connection closed by server".to_string()));
        }
        Ok(buf)
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), MailError> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }
}

fn tls_config() -> Result<Arc<ClientConfig>, MailError> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder_with_provider(Arc::new(
        tokio_rustls::rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| MailError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

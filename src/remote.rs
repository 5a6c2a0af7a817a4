//! Remote repository capability and its FTP implementation.
//!
//! The retrieval driver only needs a stateful cursor over the repository:
//! list the current directory, move into a child or back to the parent, and
//! stream a file into a local sink. Every call may fail transiently.

use crate::error::RemoteError;
use crate::types::DownloadConfig;
use std::io::{Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::debug;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

/// An established session positioned inside the repository.
pub trait RemoteRepository {
    /// Lists the current directory with file/directory distinction.
    fn list_entries(&mut self) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Lists the names in the current directory.
    fn list_names(&mut self) -> Result<Vec<String>, RemoteError>;

    /// Enters a child directory.
    fn change_dir(&mut self, name: &str) -> Result<(), RemoteError>;

    /// Returns to the parent directory.
    fn change_dir_up(&mut self) -> Result<(), RemoteError>;

    /// Streams a file of the current directory into `sink`, returning the byte count.
    fn retrieve(&mut self, name: &str, sink: &mut dyn Write) -> Result<u64, RemoteError>;

    /// Ends the session.
    fn quit(&mut self) -> Result<(), RemoteError>;
}

/// Opens sessions positioned at the product base path.
pub trait Connector {
    type Remote: RemoteRepository;

    /// Connects, authenticates and enters the base path.
    fn connect(&self) -> Result<Self::Remote, RemoteError>;

    /// Human readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

/// Connection parameters for an FTP repository.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    host: String,
    user: String,
    password: String,
    base_path: String,
    timeout: Duration,
}

impl FtpConnector {
    pub fn new(config: &DownloadConfig) -> Self {
        Self {
            host: config.host.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            base_path: config.base_path.clone(),
            timeout: config.connect_timeout,
        }
    }

    fn address(&self) -> Result<SocketAddr, RemoteError> {
        let with_port = if self.host.contains(':') {
            self.host.clone()
        } else {
            format!("{}:21", self.host)
        };
        with_port
            .to_socket_addrs()
            .map_err(|e| RemoteError::Connection(format!("cannot resolve {}: {}", with_port, e)))?
            .next()
            .ok_or_else(|| RemoteError::Connection(format!("no address for {}", with_port)))
    }
}

impl Connector for FtpConnector {
    type Remote = FtpRepository;

    fn connect(&self) -> Result<FtpRepository, RemoteError> {
        let mut stream = FtpStream::connect_timeout(self.address()?, self.timeout).map_err(classify)?;
        stream
            .login(&self.user, &self.password)
            .map_err(classify)?;
        stream.transfer_type(FileType::Binary).map_err(classify)?;
        stream.cwd(&self.base_path).map_err(classify)?;
        debug!("Open connection {}", self.endpoint());
        Ok(FtpRepository { stream })
    }

    fn endpoint(&self) -> String {
        format!("ftp://{}/{}", self.host, self.base_path)
    }
}

/// A logged-in FTP control connection.
pub struct FtpRepository {
    stream: FtpStream,
}

impl RemoteRepository for FtpRepository {
    fn list_entries(&mut self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let lines = self.stream.list(None).map_err(classify)?;
        Ok(lines.iter().filter_map(|line| parse_list_line(line)).collect())
    }

    fn list_names(&mut self) -> Result<Vec<String>, RemoteError> {
        let names = self.stream.nlst(None).map_err(classify)?;
        // some servers answer NLST with paths
        Ok(names
            .into_iter()
            .map(|n| n.rsplit('/').next().unwrap_or(&n).to_string())
            .collect())
    }

    fn change_dir(&mut self, name: &str) -> Result<(), RemoteError> {
        self.stream.cwd(name).map_err(classify)
    }

    fn change_dir_up(&mut self) -> Result<(), RemoteError> {
        self.stream.cdup().map_err(classify)
    }

    // A failed write into `sink` surfaces as a connection error here; the
    // caller's sink keeps the local cause (see `download::fetch_file`).
    fn retrieve(&mut self, name: &str, sink: &mut dyn Write) -> Result<u64, RemoteError> {
        self.stream
            .retr(name, |reader: &mut dyn Read| {
                std::io::copy(reader, &mut *sink).map_err(FtpError::ConnectionError)
            })
            .map_err(classify)
    }

    fn quit(&mut self) -> Result<(), RemoteError> {
        self.stream.quit().map_err(classify)
    }
}

/// Fields of an `ls -l` line in front of the name.
const LIST_FIELDS: usize = 8;

/// Parses one `LIST` line in the unix `ls -l` format.
///
/// The first character tells directories apart. The name is everything after
/// the eighth field, so it may contain spaces; a symbolic link keeps only the
/// part before ` -> `.
pub fn parse_list_line(line: &str) -> Option<RemoteEntry> {
    let line = line.trim();
    let mut rest = line;
    for _ in 0..LIST_FIELDS {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    let name = if line.starts_with('l') {
        rest.split(" -> ").next().unwrap_or(rest)
    } else {
        rest
    };
    if name.is_empty() {
        return None;
    }
    Some(RemoteEntry {
        name: name.to_string(),
        is_dir: line.starts_with('d'),
    })
}

/// Maps FTP failures onto the retry taxonomy.
///
/// Socket failures and 4xx replies are worth retrying; 5xx replies
/// (bad credentials, missing file or directory) are not.
fn classify(err: FtpError) -> RemoteError {
    match err {
        FtpError::ConnectionError(e) => RemoteError::Connection(e.to_string()),
        FtpError::UnexpectedResponse(ref response) => {
            let code = response.status.code();
            if (500..600).contains(&code) {
                RemoteError::Permanent(err.to_string())
            } else {
                RemoteError::Transient(err.to_string())
            }
        }
        other => RemoteError::Transient(other.to_string()),
    }
}

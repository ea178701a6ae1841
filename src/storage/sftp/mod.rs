//! Remote storage over an SSH-tunneled SFTP session.
//!
//! Spawns `ssh <server> -s sftp` and speaks the file transfer protocol over
//! the child's stdio, so authentication, agents, and host aliases all come
//! from the user's regular SSH configuration. The protocol client itself
//! lives in [`protocol`].

mod protocol;

use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use crate::storage::{Storage, StorageError};
use protocol::{
    FileHandle, IO_CHUNK, SftpClient, FXF_APPEND, FXF_CREAT, FXF_READ, FXF_TRUNC, FXF_WRITE,
};

/// Storage backed by an SFTP session to a remote host.
pub struct SftpStorage {
    client: Arc<SftpClient>,
    child: Mutex<Option<Child>>,
    server: String,
    prefix: String,
}

impl SftpStorage {
    /// Connect to `server` and root all paths under `prefix`.
    ///
    /// `server` is passed to `ssh` verbatim, so `user@host` and `~/.ssh/config`
    /// aliases work as usual.
    pub fn connect(server: &str, prefix: &str) -> Result<Self, StorageError> {
        log::info!("connecting to {} (remote directory {})", server, prefix);
        let mut command = Command::new("ssh");
        command.arg(server).args(["-s", "sftp"]);
        Self::connect_with_command(command, server, prefix)
    }

    /// Connect using an explicit subprocess command. Split out from
    /// [`connect`](Self::connect) so tests can substitute the transport.
    fn connect_with_command(
        mut command: Command,
        server: &str,
        prefix: &str,
    ) -> Result<Self, StorageError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = command
            .spawn()
            .map_err(|e| StorageError::connection(server, e))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(&mut child);
            return Err(StorageError::connection(server, "failed to capture stdio"));
        };

        match SftpClient::handshake(stdout, stdin, server) {
            Ok(client) => Ok(Self {
                client: Arc::new(client),
                child: Mutex::new(Some(child)),
                server: server.to_string(),
                prefix: prefix.trim_end_matches('/').to_string(),
            }),
            Err(e) => {
                // A failed handshake must not leave an orphaned ssh process
                reap(&mut child);
                Err(e)
            }
        }
    }

    fn full_path(&self, filename: &str) -> String {
        join_remote(&self.prefix, filename)
    }
}

/// Kill and wait on the subprocess, logging failures.
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::warn!("failed to kill ssh subprocess: {}", e);
    }
    if let Err(e) = child.wait() {
        log::warn!("failed to reap ssh subprocess: {}", e);
    }
}

/// Join a remote prefix and a relative path, dropping empty and `.` segments.
fn join_remote(prefix: &str, filename: &str) -> String {
    let absolute = prefix.starts_with('/');
    let segments: Vec<&str> = prefix
        .split('/')
        .chain(filename.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if absolute {
        format!("/{}", segments.join("/"))
    } else {
        segments.join("/")
    }
}

impl Storage for SftpStorage {
    fn open(&self, filename: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let handle = self.client.open(&self.full_path(filename), FXF_READ)?;
        Ok(Box::new(SftpReadStream {
            client: Arc::clone(&self.client),
            handle,
            offset: 0,
            eof: false,
        }))
    }

    fn open_write(
        &self,
        filename: &str,
        append: bool,
    ) -> Result<Box<dyn Write + Send>, StorageError> {
        let mut pflags = FXF_WRITE | FXF_CREAT;
        pflags |= if append { FXF_APPEND } else { FXF_TRUNC };

        let handle = self.client.open(&self.full_path(filename), pflags)?;
        // APPEND alone is not honored by all servers, so write at an
        // explicit offset starting from the current size
        let offset = if append {
            self.client.file_size(&handle)?
        } else {
            0
        };
        Ok(Box::new(SftpWriteStream {
            client: Arc::clone(&self.client),
            handle,
            offset,
        }))
    }

    fn glob(&self, directory: &str, pattern: &str) -> Result<Vec<String>, StorageError> {
        let compiled = glob::Pattern::new(pattern)?;
        let remote_dir = self.full_path(directory);

        let mut matches: Vec<String> = self
            .client
            .read_dir(&remote_dir)?
            .into_iter()
            .filter(|name| name != "." && name != ".." && compiled.matches(name))
            .map(|name| format!("{}/{}", remote_dir, name))
            .collect();
        matches.sort();
        Ok(matches)
    }

    fn describe(&self) -> String {
        format!("sftp://{}{}", self.server, self.prefix)
    }

    fn disconnect(&self) {
        // Close the session and kill the tunnel even if one of them fails
        if let Err(e) = self.client.shutdown() {
            log::warn!("closing SFTP session to {} failed: {}", self.server, e);
        }
        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut child) = guard.take() {
                reap(&mut child);
            }
        }
    }
}

/// Sequential reader over a remote file handle.
struct SftpReadStream {
    client: Arc<SftpClient>,
    handle: FileHandle,
    offset: u64,
    eof: bool,
}

impl Read for SftpReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(IO_CHUNK) as u32;
        match self.client.read(&self.handle, self.offset, want) {
            Ok(Some(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                self.offset += n as u64;
                Ok(n)
            }
            Ok(None) => {
                self.eof = true;
                Ok(0)
            }
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl Drop for SftpReadStream {
    fn drop(&mut self) {
        if let Err(e) = self.client.close(&self.handle) {
            log::debug!("closing remote read handle failed: {}", e);
        }
    }
}

/// Sequential writer over a remote file handle.
struct SftpWriteStream {
    client: Arc<SftpClient>,
    handle: FileHandle,
    offset: u64,
}

impl Write for SftpWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = &buf[..buf.len().min(IO_CHUNK)];
        self.client
            .write(&self.handle, self.offset, chunk)
            .map_err(io::Error::other)?;
        self.offset += chunk.len() as u64;
        Ok(chunk.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Writes are synchronous round trips; nothing is buffered here
        Ok(())
    }
}

impl Drop for SftpWriteStream {
    fn drop(&mut self) {
        if let Err(e) = self.client.close(&self.handle) {
            log::debug!("closing remote write handle failed: {}", e);
        }
    }
}

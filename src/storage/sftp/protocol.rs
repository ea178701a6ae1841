//! Minimal SFTP version 3 client.
//!
//! Speaks the subset of the protocol the remote backend needs (open, close,
//! read, write, fstat, directory listing) over an arbitrary byte transport,
//! in practice the stdio pipes of an `ssh -s sftp` subprocess. Requests are
//! serialized behind a mutex, which makes the client safe for concurrent
//! callers without protocol-level pipelining.

use std::io::{Read, Write};
use std::process::{ChildStdin, ChildStdout};
use std::sync::Mutex;

use crate::storage::StorageError;

/// Protocol version we speak.
const SFTP_VERSION: u32 = 3;

// Packet types (draft-ietf-secsh-filexfer-02)
const FXP_INIT: u8 = 1;
const FXP_VERSION: u8 = 2;
const FXP_OPEN: u8 = 3;
const FXP_CLOSE: u8 = 4;
const FXP_READ: u8 = 5;
const FXP_WRITE: u8 = 6;
const FXP_FSTAT: u8 = 8;
const FXP_OPENDIR: u8 = 11;
const FXP_READDIR: u8 = 12;
const FXP_STATUS: u8 = 101;
const FXP_HANDLE: u8 = 102;
const FXP_DATA: u8 = 103;
const FXP_NAME: u8 = 104;
const FXP_ATTRS: u8 = 105;

// Open pflags
pub(crate) const FXF_READ: u32 = 0x0000_0001;
pub(crate) const FXF_WRITE: u32 = 0x0000_0002;
pub(crate) const FXF_APPEND: u32 = 0x0000_0004;
pub(crate) const FXF_CREAT: u32 = 0x0000_0008;
pub(crate) const FXF_TRUNC: u32 = 0x0000_0010;

// Status codes
const FX_OK: u32 = 0;
const FX_EOF: u32 = 1;
const FX_NO_SUCH_FILE: u32 = 2;

// Attribute presence flags
const ATTR_SIZE: u32 = 0x0000_0001;
const ATTR_UIDGID: u32 = 0x0000_0002;
const ATTR_PERMISSIONS: u32 = 0x0000_0004;
const ATTR_ACMODTIME: u32 = 0x0000_0008;
const ATTR_EXTENDED: u32 = 0x8000_0000;

/// Upper bound on an incoming packet; anything larger means we lost framing.
const MAX_PACKET: u32 = 256 * 1024;

/// Bytes requested per READ / sent per WRITE.
pub(crate) const IO_CHUNK: usize = 32 * 1024;

/// An open remote file or directory handle.
pub(crate) struct FileHandle(Vec<u8>);

/// SFTP client over a reader/writer pair.
///
/// Generic over the transport so tests can drive it with scripted byte
/// buffers; production code uses the child process pipes.
pub(crate) struct SftpClient<R = ChildStdout, W = ChildStdin> {
    transport: Mutex<Transport<R, W>>,
}

struct Transport<R, W> {
    server: String,
    reader: R,
    /// Dropped on shutdown so the subsystem sees EOF
    writer: Option<W>,
    next_id: u32,
}

impl<R: Read, W: Write> Transport<R, W> {
    fn send(&mut self, packet_type: u8, payload: &[u8]) -> Result<(), StorageError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StorageError::protocol("client is closed"))?;

        let len = (payload.len() + 1) as u32;
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(packet_type);
        frame.extend_from_slice(payload);

        writer
            .write_all(&frame)
            .and_then(|()| writer.flush())
            .map_err(|e| StorageError::connection(&self.server, e))
    }

    fn recv(&mut self) -> Result<(u8, Vec<u8>), StorageError> {
        let mut len_buf = [0u8; 4];
        self.reader
            .read_exact(&mut len_buf)
            .map_err(|e| StorageError::connection(&self.server, e))?;
        let len = u32::from_be_bytes(len_buf);
        if len == 0 || len > MAX_PACKET {
            return Err(StorageError::protocol(format!(
                "invalid packet length {}",
                len
            )));
        }

        let mut buf = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut buf)
            .map_err(|e| StorageError::connection(&self.server, e))?;
        let packet_type = buf[0];
        buf.remove(0);
        Ok((packet_type, buf))
    }
}

impl<R: Read, W: Write> SftpClient<R, W> {
    /// Perform the INIT/VERSION handshake over a fresh transport.
    ///
    /// Fails if the peer does not answer with a VERSION packet for protocol
    /// version 3 or later; the caller owns cleaning up the transport's
    /// subprocess in that case.
    pub(crate) fn handshake(reader: R, writer: W, server: &str) -> Result<Self, StorageError> {
        let mut transport = Transport {
            server: server.to_string(),
            reader,
            writer: Some(writer),
            next_id: 0,
        };

        let mut payload = Vec::new();
        put_u32(&mut payload, SFTP_VERSION);
        transport.send(FXP_INIT, &payload)?;

        let (packet_type, payload) = transport.recv()?;
        if packet_type != FXP_VERSION {
            return Err(StorageError::protocol(format!(
                "expected VERSION packet, got type {}",
                packet_type
            )));
        }
        let version = PacketReader::new(&payload).u32()?;
        if version < SFTP_VERSION {
            return Err(StorageError::protocol(format!(
                "server offers unsupported protocol version {}",
                version
            )));
        }
        log::debug!("SFTP session to {} established (version {})", server, version);

        Ok(Self {
            transport: Mutex::new(transport),
        })
    }

    /// Send one request and receive its matching response.
    ///
    /// The request id is prepended to `body`; the response payload is
    /// returned with its id stripped after verification.
    fn roundtrip(&self, packet_type: u8, body: &[u8]) -> Result<(u8, Vec<u8>), StorageError> {
        let mut transport = self
            .transport
            .lock()
            .map_err(|_| StorageError::protocol("client mutex poisoned"))?;

        let id = transport.next_id;
        transport.next_id = transport.next_id.wrapping_add(1);

        let mut payload = Vec::with_capacity(4 + body.len());
        put_u32(&mut payload, id);
        payload.extend_from_slice(body);
        transport.send(packet_type, &payload)?;

        let (response_type, response) = transport.recv()?;
        let mut reader = PacketReader::new(&response);
        let response_id = reader.u32()?;
        if response_id != id {
            // Requests are serialized, so the only response in flight is ours
            return Err(StorageError::protocol(format!(
                "response id {} does not match request id {}",
                response_id, id
            )));
        }
        Ok((response_type, response[4..].to_vec()))
    }

    /// Open a remote file.
    pub(crate) fn open(&self, path: &str, pflags: u32) -> Result<FileHandle, StorageError> {
        let mut body = Vec::new();
        put_str(&mut body, path);
        put_u32(&mut body, pflags);
        put_u32(&mut body, 0); // no attributes

        match self.roundtrip(FXP_OPEN, &body)? {
            (FXP_HANDLE, payload) => {
                let handle = PacketReader::new(&payload).bytes()?.to_vec();
                Ok(FileHandle(handle))
            }
            (FXP_STATUS, payload) => Err(status_error(&payload, path)),
            (packet_type, _) => Err(unexpected(packet_type)),
        }
    }

    /// Close a handle returned by [`open`](Self::open) or a directory scan.
    pub(crate) fn close(&self, handle: &FileHandle) -> Result<(), StorageError> {
        let mut body = Vec::new();
        put_bytes(&mut body, &handle.0);

        match self.roundtrip(FXP_CLOSE, &body)? {
            (FXP_STATUS, payload) => expect_ok(&payload),
            (packet_type, _) => Err(unexpected(packet_type)),
        }
    }

    /// Read up to `len` bytes at `offset`. Returns `None` at end of file.
    pub(crate) fn read(
        &self,
        handle: &FileHandle,
        offset: u64,
        len: u32,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let mut body = Vec::new();
        put_bytes(&mut body, &handle.0);
        put_u64(&mut body, offset);
        put_u32(&mut body, len);

        match self.roundtrip(FXP_READ, &body)? {
            (FXP_DATA, payload) => {
                let data = PacketReader::new(&payload).bytes()?.to_vec();
                Ok(Some(data))
            }
            (FXP_STATUS, payload) => match parse_status(&payload)? {
                (FX_EOF, _) => Ok(None),
                (code, message) => Err(server_status(code, &message)),
            },
            (packet_type, _) => Err(unexpected(packet_type)),
        }
    }

    /// Write `data` at `offset`.
    pub(crate) fn write(
        &self,
        handle: &FileHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let mut body = Vec::new();
        put_bytes(&mut body, &handle.0);
        put_u64(&mut body, offset);
        put_bytes(&mut body, data);

        match self.roundtrip(FXP_WRITE, &body)? {
            (FXP_STATUS, payload) => expect_ok(&payload),
            (packet_type, _) => Err(unexpected(packet_type)),
        }
    }

    /// Size of an open file, used to seed the offset for append writes.
    pub(crate) fn file_size(&self, handle: &FileHandle) -> Result<u64, StorageError> {
        let mut body = Vec::new();
        put_bytes(&mut body, &handle.0);

        match self.roundtrip(FXP_FSTAT, &body)? {
            (FXP_ATTRS, payload) => {
                let mut reader = PacketReader::new(&payload);
                let flags = reader.u32()?;
                if flags & ATTR_SIZE != 0 {
                    reader.u64()
                } else {
                    log::warn!("fstat response carries no size attribute, assuming 0");
                    Ok(0)
                }
            }
            (FXP_STATUS, payload) => Err(status_error(&payload, "fstat")),
            (packet_type, _) => Err(unexpected(packet_type)),
        }
    }

    /// List the entry names of a remote directory (including dot entries).
    pub(crate) fn read_dir(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let handle = self.open_dir(path)?;

        let mut names = Vec::new();
        let result = loop {
            let mut body = Vec::new();
            put_bytes(&mut body, &handle.0);

            match self.roundtrip(FXP_READDIR, &body) {
                Ok((FXP_NAME, payload)) => {
                    if let Err(e) = parse_name_entries(&payload, &mut names) {
                        break Err(e);
                    }
                }
                Ok((FXP_STATUS, payload)) => match parse_status(&payload) {
                    Ok((FX_EOF, _)) => break Ok(()),
                    Ok((code, message)) => break Err(server_status(code, &message)),
                    Err(e) => break Err(e),
                },
                Ok((packet_type, _)) => break Err(unexpected(packet_type)),
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.close(&handle) {
            log::debug!("closing directory handle for {} failed: {}", path, e);
        }
        result?;
        Ok(names)
    }

    fn open_dir(&self, path: &str) -> Result<FileHandle, StorageError> {
        let mut body = Vec::new();
        put_str(&mut body, path);

        match self.roundtrip(FXP_OPENDIR, &body)? {
            (FXP_HANDLE, payload) => {
                let handle = PacketReader::new(&payload).bytes()?.to_vec();
                Ok(FileHandle(handle))
            }
            (FXP_STATUS, payload) => Err(status_error(&payload, path)),
            (packet_type, _) => Err(unexpected(packet_type)),
        }
    }

    /// Close the session by dropping the transport's write side.
    ///
    /// Any later request fails with a "client is closed" protocol error.
    pub(crate) fn shutdown(&self) -> Result<(), StorageError> {
        let mut transport = self
            .transport
            .lock()
            .map_err(|_| StorageError::protocol("client mutex poisoned"))?;
        transport.writer = None;
        Ok(())
    }
}

/// Parse the entries of a NAME packet into `names`.
fn parse_name_entries(payload: &[u8], names: &mut Vec<String>) -> Result<(), StorageError> {
    let mut reader = PacketReader::new(payload);
    let count = reader.u32()?;
    for _ in 0..count {
        let filename = reader.string()?;
        let _longname = reader.string()?;
        reader.skip_attrs()?;
        names.push(filename);
    }
    Ok(())
}

/// Parse a STATUS payload (after the id) into code and message.
fn parse_status(payload: &[u8]) -> Result<(u32, String), StorageError> {
    let mut reader = PacketReader::new(payload);
    let code = reader.u32()?;
    // Some servers omit the message on OK/EOF
    let message = reader.string().unwrap_or_default();
    Ok((code, message))
}

fn expect_ok(payload: &[u8]) -> Result<(), StorageError> {
    match parse_status(payload)? {
        (FX_OK, _) => Ok(()),
        (code, message) => Err(server_status(code, &message)),
    }
}

/// Map a non-OK status for `path` to a storage error, turning
/// NO_SUCH_FILE into NotFound so absent label files stay a normal state.
fn status_error(payload: &[u8], path: &str) -> StorageError {
    match parse_status(payload) {
        Ok((FX_NO_SUCH_FILE, _)) => StorageError::not_found(path),
        Ok((code, message)) => server_status(code, &message),
        Err(e) => e,
    }
}

fn server_status(code: u32, message: &str) -> StorageError {
    StorageError::protocol(format!("server status {}: {}", code, message))
}

fn unexpected(packet_type: u8) -> StorageError {
    StorageError::protocol(format!("unexpected packet type {}", packet_type))
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    put_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    put_bytes(buf, value.as_bytes());
}

/// Cursor over a received payload with bounds-checked field accessors.
struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StorageError> {
        if self.pos + n > self.buf.len() {
            return Err(StorageError::protocol("truncated packet"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, StorageError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, StorageError> {
        let bytes = self.take(8)?;
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(array))
    }

    fn bytes(&mut self) -> Result<&'a [u8], StorageError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, StorageError> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn skip_attrs(&mut self) -> Result<(), StorageError> {
        let flags = self.u32()?;
        if flags & ATTR_SIZE != 0 {
            self.u64()?;
        }
        if flags & ATTR_UIDGID != 0 {
            self.u32()?;
            self.u32()?;
        }
        if flags & ATTR_PERMISSIONS != 0 {
            self.u32()?;
        }
        if flags & ATTR_ACMODTIME != 0 {
            self.u32()?;
            self.u32()?;
        }
        if flags & ATTR_EXTENDED != 0 {
            let count = self.u32()?;
            for _ in 0..count {
                self.bytes()?;
                self.bytes()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Frame a packet the way a server would.
    fn packet(packet_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
        frame.push(packet_type);
        frame.extend_from_slice(payload);
        frame
    }

    fn version_packet() -> Vec<u8> {
        let mut payload = Vec::new();
        put_u32(&mut payload, 3);
        packet(FXP_VERSION, &payload)
    }

    fn client_with(responses: Vec<u8>) -> SftpClient<Cursor<Vec<u8>>, Vec<u8>> {
        let mut script = version_packet();
        script.extend_from_slice(&responses);
        SftpClient::handshake(Cursor::new(script), Vec::new(), "testhost").expect("handshake")
    }

    #[test]
    fn test_handshake_accepts_version_3() {
        client_with(Vec::new());
    }

    #[test]
    fn test_handshake_rejects_wrong_packet() {
        // An INIT echoed back (e.g. by a non-sftp peer) is not a VERSION
        let mut payload = Vec::new();
        put_u32(&mut payload, 3);
        let script = packet(FXP_INIT, &payload);
        let result =
            SftpClient::handshake(Cursor::new(script), Vec::new(), "testhost");
        assert!(matches!(result, Err(StorageError::Protocol(_))));
    }

    #[test]
    fn test_handshake_rejects_eof() {
        let result = SftpClient::handshake(Cursor::new(Vec::new()), Vec::new(), "testhost");
        assert!(matches!(result, Err(StorageError::Connection { .. })));
    }

    #[test]
    fn test_handshake_rejects_old_version() {
        let mut payload = Vec::new();
        put_u32(&mut payload, 2);
        let script = packet(FXP_VERSION, &payload);
        let result =
            SftpClient::handshake(Cursor::new(script), Vec::new(), "testhost");
        assert!(matches!(result, Err(StorageError::Protocol(_))));
    }

    #[test]
    fn test_open_returns_handle() {
        // HANDLE response for request id 0
        let mut payload = Vec::new();
        put_u32(&mut payload, 0);
        put_bytes(&mut payload, b"h1");
        let client = client_with(packet(FXP_HANDLE, &payload));

        let handle = client.open("/data/labels/a.txt", FXF_READ).expect("open");
        assert_eq!(handle.0, b"h1");
    }

    #[test]
    fn test_open_maps_no_such_file() {
        let mut payload = Vec::new();
        put_u32(&mut payload, 0);
        put_u32(&mut payload, FX_NO_SUCH_FILE);
        put_str(&mut payload, "No such file");
        put_str(&mut payload, "en");
        let client = client_with(packet(FXP_STATUS, &payload));

        let result = client.open("/data/labels/a.txt", FXF_READ);
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn test_read_data_and_eof() {
        let mut data_payload = Vec::new();
        put_u32(&mut data_payload, 0);
        put_bytes(&mut data_payload, b"1 0.5 0.5 0.2 0.3\n");

        let mut eof_payload = Vec::new();
        put_u32(&mut eof_payload, 1);
        put_u32(&mut eof_payload, FX_EOF);
        put_str(&mut eof_payload, "EOF");
        put_str(&mut eof_payload, "en");

        let mut script = packet(FXP_DATA, &data_payload);
        script.extend_from_slice(&packet(FXP_STATUS, &eof_payload));
        let client = client_with(script);

        let handle = FileHandle(b"h1".to_vec());
        let data = client.read(&handle, 0, 1024).expect("read");
        assert_eq!(data.as_deref(), Some(b"1 0.5 0.5 0.2 0.3\n".as_slice()));
        let eof = client.read(&handle, 18, 1024).expect("read");
        assert!(eof.is_none());
    }

    #[test]
    fn test_mismatched_response_id_is_protocol_error() {
        let mut payload = Vec::new();
        put_u32(&mut payload, 7); // request will have id 0
        put_bytes(&mut payload, b"h1");
        let client = client_with(packet(FXP_HANDLE, &payload));

        let result = client.open("/x", FXF_READ);
        assert!(matches!(result, Err(StorageError::Protocol(_))));
    }

    #[test]
    fn test_name_entries_with_attrs() {
        let mut payload = Vec::new();
        put_u32(&mut payload, 0); // three entries, size+mtime attrs present
        put_u32(&mut payload, 3);
        for name in ["a.jpg", "b.png", "."] {
            put_str(&mut payload, name);
            put_str(&mut payload, &format!("-rw-r--r-- 1 u g 10 Jan 1 00:00 {}", name));
            put_u32(&mut payload, ATTR_SIZE | ATTR_ACMODTIME);
            put_u64(&mut payload, 10);
            put_u32(&mut payload, 0);
            put_u32(&mut payload, 0);
        }

        let mut eof_payload = Vec::new();
        put_u32(&mut eof_payload, 1);
        put_u32(&mut eof_payload, FX_EOF);

        // OPENDIR handle response comes first
        let mut handle_payload = Vec::new();
        put_u32(&mut handle_payload, 0);
        put_bytes(&mut handle_payload, b"d1");

        // Ids: opendir=0, readdir=1, readdir(eof)=2, close=3
        let mut payload_fixed = Vec::new();
        put_u32(&mut payload_fixed, 1);
        payload_fixed.extend_from_slice(&payload[4..]);
        let mut eof_fixed = Vec::new();
        put_u32(&mut eof_fixed, 2);
        eof_fixed.extend_from_slice(&eof_payload[4..]);
        let mut close_payload = Vec::new();
        put_u32(&mut close_payload, 3);
        put_u32(&mut close_payload, FX_OK);

        let mut script = packet(FXP_HANDLE, &handle_payload);
        script.extend_from_slice(&packet(FXP_NAME, &payload_fixed));
        script.extend_from_slice(&packet(FXP_STATUS, &eof_fixed));
        script.extend_from_slice(&packet(FXP_STATUS, &close_payload));
        let client = client_with(script);

        let names = client.read_dir("/data/images").expect("read_dir");
        assert_eq!(names, vec!["a.jpg", "b.png", "."]);
    }

    #[test]
    fn test_truncated_packet_is_protocol_error() {
        let mut reader = PacketReader::new(&[0, 0]);
        assert!(matches!(
            reader.u32(),
            Err(StorageError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut script = version_packet();
        script.extend_from_slice(&u32::MAX.to_be_bytes());
        let client = SftpClient::handshake(Cursor::new(script), Vec::new(), "testhost")
            .expect("handshake");
        let result = client.open("/x", FXF_READ);
        assert!(matches!(result, Err(StorageError::Protocol(_))));
    }

    #[test]
    fn test_shutdown_closes_client() {
        let client = client_with(Vec::new());
        client.shutdown().expect("shutdown");
        let result = client.open("/x", FXF_READ);
        assert!(matches!(result, Err(StorageError::Protocol(_))));
    }
}

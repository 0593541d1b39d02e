//! Line-protocol client for the store service.
//!
//! The directory and cache facades proxy requests to the store over its TCP
//! protocol; this module is the thin typed wrapper they share. Each call opens
//! a fresh connection, issues exactly one request, and reads exactly one
//! response -- the same one-shot discipline the store service speaks.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::Error;

/// Client for a store service at a fixed address.
#[derive(Debug, Clone)]
pub struct StoreClient {
    addr: String,
}

impl StoreClient {
    /// Client for the store at `addr` (`host:port`). No connection is made
    /// until a request is issued.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Address this client talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Issue `put <volumeId> <needleId> <size>` followed by the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] carrying the store's error token if the store
    /// refuses, [`Error::Io`] on connection trouble, or [`Error::Protocol`]
    /// if the response is not a protocol line.
    pub async fn put(&self, volume_id: u64, needle_id: u64, payload: &[u8]) -> Result<(), Error> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        let header = format!("put {volume_id} {needle_id} {}\n", payload.len());
        stream.write_all(header.as_bytes()).await?;
        stream.write_all(payload).await?;

        let (status, _) = read_status_line(&mut BufReader::new(stream)).await?;
        expect_no_size(status)
    }

    /// Issue `get <needleId>` and return the blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] with the store's token (`BadNeedle` for an
    /// unknown id), [`Error::Io`], or [`Error::Protocol`].
    pub async fn get(&self, needle_id: u64) -> Result<Vec<u8>, Error> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream
            .write_all(format!("get {needle_id}\n").as_bytes())
            .await?;

        let mut reader = BufReader::new(stream);
        let (status, size) = read_status_line(&mut reader).await?;
        match (status, size) {
            (Status::Ok, Some(size)) => {
                let mut payload = vec![0u8; size as usize];
                reader.read_exact(&mut payload).await?;
                Ok(payload)
            }
            (Status::Ok, None) => Err(Error::Protocol("ok line without a size".into())),
            (Status::Err(token), _) => Err(Error::Remote(token)),
        }
    }

    /// Issue `delete <needleId>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`], [`Error::Io`], or [`Error::Protocol`] as for
    /// the other calls.
    pub async fn delete(&self, needle_id: u64) -> Result<(), Error> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream
            .write_all(format!("delete {needle_id}\n").as_bytes())
            .await?;

        let (status, _) = read_status_line(&mut BufReader::new(stream)).await?;
        expect_no_size(status)
    }
}

/// First word of a response line.
#[derive(Debug, PartialEq, Eq)]
enum Status {
    Ok,
    Err(String),
}

/// Read and parse one `ok [n]` / `err <Kind>` response line.
async fn read_status_line<R>(reader: &mut R) -> Result<(Status, Option<u64>), Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(Error::Protocol("connection closed before a response".into()));
    }
    parse_status_line(line.trim_end())
}

fn parse_status_line(line: &str) -> Result<(Status, Option<u64>), Error> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("ok") => {
            let size = match words.next() {
                Some(word) => Some(
                    word.parse()
                        .map_err(|_| Error::Protocol(format!("bad size in {line:?}")))?,
                ),
                None => None,
            };
            Ok((Status::Ok, size))
        }
        Some("err") => {
            let token = words
                .next()
                .ok_or_else(|| Error::Protocol(format!("err line without a kind: {line:?}")))?;
            Ok((Status::Err(token.to_string()), None))
        }
        _ => Err(Error::Protocol(format!("unrecognized response: {line:?}"))),
    }
}

fn expect_no_size(status: Status) -> Result<(), Error> {
    match status {
        Status::Ok => Ok(()),
        Status::Err(token) => Err(Error::Remote(token)),
    }
}

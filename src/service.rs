//! Line-protocol TCP service for the store.
//!
//! The wire protocol is ASCII and line-oriented: one request line per
//! connection, one response line back (plus a payload on a successful `get`),
//! then the connection closes. The accept loop hands each connection to its
//! own task; errors never cross the accept boundary -- a handler catches
//! everything, attempts to send one `err <Kind>` line, and ends.
//!
//! Requests:
//!
//! ```text
//! put <volumeId> <needleId> <size>\n<size bytes>
//! get <needleId>\n
//! delete <needleId>\n
//! ```

use std::sync::Arc;

use metrics::counter;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;

use crate::error::Error;
use crate::store::Store;

/// One parsed request line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Request {
    /// `put <volumeId> <needleId> <size>` -- a payload of `size` bytes follows.
    Put {
        volume_id: u64,
        needle_id: u64,
        size: u64,
    },
    /// `get <needleId>`
    Get { needle_id: u64 },
    /// `delete <needleId>`
    Delete { needle_id: u64 },
}

/// Parse one request line (without its trailing newline).
///
/// # Errors
///
/// Returns [`Error::BadCommand`] for an unknown command word, a wrong number
/// of arguments, or an argument that is not a decimal integer.
pub(crate) fn parse_request(line: &str) -> Result<Request, Error> {
    let bad = || Error::BadCommand(line.to_string());
    let mut words = line.split_whitespace();
    let arg = |words: &mut std::str::SplitWhitespace<'_>| -> Result<u64, Error> {
        words.next().ok_or_else(bad)?.parse().map_err(|_| bad())
    };

    let request = match words.next().ok_or_else(bad)? {
        "put" => Request::Put {
            volume_id: arg(&mut words)?,
            needle_id: arg(&mut words)?,
            size: arg(&mut words)?,
        },
        "get" => Request::Get {
            needle_id: arg(&mut words)?,
        },
        "delete" => Request::Delete {
            needle_id: arg(&mut words)?,
        },
        _ => return Err(bad()),
    };

    if words.next().is_some() {
        return Err(bad());
    }
    Ok(request)
}

/// Read up to `size` payload bytes, stopping early at EOF.
///
/// A client that closes the connection mid-payload gets whatever prefix
/// arrived stored; the short read is not an error.
pub(crate) async fn read_payload<R>(reader: &mut R, size: usize) -> Result<Vec<u8>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Write the single-line error response for `err`, swallowing write failures.
pub(crate) async fn write_error_line<W>(writer: &mut W, err: &Error)
where
    W: AsyncWrite + Unpin,
{
    let line = format!("err {}\n", err.wire_token());
    let _ = writer.write_all(line.as_bytes()).await;
}

/// The store service: a [`Store`] behind a TCP accept loop.
pub struct StoreService {
    store: Arc<Store>,
}

impl StoreService {
    /// Wrap a store for serving.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Accept connections forever, one task per connection.
    ///
    /// Accept failures are logged and the loop keeps going; nothing escapes.
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let store = Arc::clone(&self.store);
                    tokio::spawn(async move {
                        tracing::debug!(%peer, "store connection accepted");
                        handle_connection(store, stream).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "store accept failed");
                }
            }
        }
    }
}

/// Serve one connection: read a request line, execute, answer, done.
async fn handle_connection(store: Arc<Store>, stream: tokio::net::TcpStream) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => return, // client went away before asking anything
        Ok(_) => {}
    }

    if let Err(err) = dispatch(&store, &mut reader, &mut writer, line.trim_end()).await {
        counter!("hayloft_store_errors_total", "kind" => err.wire_token().to_string())
            .increment(1);
        write_error_line(&mut writer, &err).await;
    }
}

/// Execute one request and write the success response.
///
/// `put` validates the volume id and size against the store's limits before
/// consuming the payload, so an oversize or misdirected upload is refused
/// without reading its body.
async fn dispatch<R>(
    store: &Arc<Store>,
    reader: &mut R,
    writer: &mut OwnedWriteHalf,
    line: &str,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    match parse_request(line)? {
        Request::Put {
            volume_id,
            needle_id,
            size,
        } => {
            counter!("hayloft_store_requests_total", "op" => "put").increment(1);
            if volume_id >= store.volume_count() as u64 {
                return Err(Error::BadHaystackId { volume_id });
            }
            if size > store.max_needle_size() {
                return Err(Error::TooManyBytes {
                    size,
                    max: store.max_needle_size(),
                });
            }

            let payload = read_payload(reader, size as usize).await?;
            let store = Arc::clone(store);
            run_blocking(move || store.put(volume_id, needle_id, &payload)).await?;
            writer.write_all(b"ok\n").await?;
        }
        Request::Get { needle_id } => {
            counter!("hayloft_store_requests_total", "op" => "get").increment(1);
            let store = Arc::clone(store);
            let payload = run_blocking(move || store.get(needle_id)).await?;
            writer
                .write_all(format!("ok {}\n", payload.len()).as_bytes())
                .await?;
            writer.write_all(&payload).await?;
        }
        Request::Delete { needle_id } => {
            counter!("hayloft_store_requests_total", "op" => "delete").increment(1);
            let store = Arc::clone(store);
            run_blocking(move || store.remove(needle_id)).await?;
            writer.write_all(b"ok\n").await?;
        }
    }
    Ok(())
}

/// Run a synchronous store operation off the async runtime.
///
/// Volume I/O blocks under the per-volume mutex; `spawn_blocking` keeps that
/// out of the reactor threads.
async fn run_blocking<T, F>(op: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_put() {
        assert_eq!(
            parse_request("put 0 42 1024").expect("valid put"),
            Request::Put {
                volume_id: 0,
                needle_id: 42,
                size: 1024
            }
        );
    }

    #[test]
    fn parses_get_and_delete() {
        assert_eq!(
            parse_request("get 7").expect("valid get"),
            Request::Get { needle_id: 7 }
        );
        assert_eq!(
            parse_request("delete 7").expect("valid delete"),
            Request::Delete { needle_id: 7 }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            parse_request("frobnicate 1"),
            Err(Error::BadCommand(_))
        ));
        assert!(matches!(parse_request(""), Err(Error::BadCommand(_))));
    }

    #[test]
    fn rejects_malformed_arguments() {
        assert!(matches!(parse_request("get"), Err(Error::BadCommand(_))));
        assert!(matches!(
            parse_request("get seven"),
            Err(Error::BadCommand(_))
        ));
        assert!(matches!(
            parse_request("put 0 42"),
            Err(Error::BadCommand(_))
        ));
        assert!(matches!(
            parse_request("put 0 42 10 extra"),
            Err(Error::BadCommand(_))
        ));
        assert!(matches!(
            parse_request("get -1"),
            Err(Error::BadCommand(_))
        ));
    }

    #[tokio::test]
    async fn read_payload_stops_at_eof() {
        let mut input: &[u8] = b"abc";
        let payload = read_payload(&mut input, 8).await.expect("read");
        assert_eq!(payload, b"abc");
    }

    #[tokio::test]
    async fn read_payload_reads_exactly_size() {
        let mut input: &[u8] = b"abcdefgh";
        let payload = read_payload(&mut input, 3).await.expect("read");
        assert_eq!(payload, b"abc");
    }
}

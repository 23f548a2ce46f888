//! Upload body streams
//!
//! File bodies travel through the engine as [`FileStream`]s. Two shapes are
//! built on top of them:
//!
//! - [`ReplayStream`] re-emits a chunk that was already pulled off a stream
//!   (content sniffing) ahead of the untouched remainder.
//! - [`tee`] duplicates one source into independent consumers (transform
//!   fan-out), each fed through its own bounded channel.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Chunks buffered per tee consumer before the pump waits on it
pub const TEE_CHANNEL_CAPACITY: usize = 8;

/// Read size used by [`from_reader`]
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Boxed byte stream carrying an upload body
pub type FileStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Stream that yields `data` as a single chunk (nothing when empty)
pub fn from_bytes(data: impl Into<Bytes>) -> FileStream {
    let data = data.into();
    if data.is_empty() {
        Box::pin(stream::empty())
    } else {
        Box::pin(stream::once(async move { Ok(data) }))
    }
}

/// Stream that yields every chunk of `chunks` in order
pub fn from_chunks<I>(chunks: I) -> FileStream
where
    I: IntoIterator<Item = Bytes>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(chunks.into_iter().map(Ok)))
}

/// Stream over an async reader, in chunks of up to [`READ_CHUNK_SIZE`]
pub fn from_reader<R>(reader: R) -> FileStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    Box::pin(stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    }))
}

/// Drain a stream into one contiguous buffer
pub async fn collect(mut body: FileStream) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

pin_project! {
    /// Stream that yields `head` first, then everything left in `rest`.
    pub struct ReplayStream<S> {
        head: Option<Bytes>,
        #[pin]
        rest: S,
    }
}

impl<S> ReplayStream<S> {
    /// Create a replay stream over an already-consumed first chunk
    pub fn new(head: Bytes, rest: S) -> Self {
        Self {
            head: Some(head).filter(|h| !h.is_empty()),
            rest,
        }
    }
}

impl<S> Stream for ReplayStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if let Some(head) = this.head.take() {
            return Poll::Ready(Some(Ok(head)));
        }
        this.rest.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let extra = usize::from(self.head.is_some());
        let (lower, upper) = self.rest.size_hint();
        (
            lower.saturating_add(extra),
            upper.and_then(|u| u.checked_add(extra)),
        )
    }
}

/// Duplicate `source` into `consumers` independent streams.
///
/// A background task pulls from the source and hands every chunk to each
/// consumer. A consumer that is dropped stops receiving; the rest carry on.
/// A source error is delivered to every live consumer and ends the pump.
/// Must be called from within a tokio runtime.
pub fn tee(source: FileStream, consumers: usize) -> Vec<FileStream> {
    if consumers == 1 {
        return vec![source];
    }

    let mut senders = Vec::with_capacity(consumers);
    let mut outputs = Vec::with_capacity(consumers);
    for _ in 0..consumers {
        let (tx, rx) = mpsc::channel(TEE_CHANNEL_CAPACITY);
        senders.push(tx);
        outputs.push(receiver_stream(rx));
    }

    if !senders.is_empty() {
        tokio::spawn(pump(source, senders));
    }
    outputs
}

fn receiver_stream(rx: mpsc::Receiver<io::Result<Bytes>>) -> FileStream {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

async fn pump(mut source: FileStream, mut senders: Vec<mpsc::Sender<io::Result<Bytes>>>) {
    while let Some(item) = source.next().await {
        match item {
            Ok(chunk) => {
                let mut live = Vec::with_capacity(senders.len());
                for tx in senders {
                    if tx.send(Ok(chunk.clone())).await.is_ok() {
                        live.push(tx);
                    }
                }
                senders = live;
                if senders.is_empty() {
                    tracing::debug!("All tee consumers dropped, stopping pump");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, consumers = senders.len(), "Source stream failed during tee");
                for tx in &senders {
                    let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                }
                return;
            }
        }
    }
}

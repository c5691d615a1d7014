use std::convert::Infallible;
use std::error::Error as StdError;
use std::io::{Cursor, SeekFrom};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::Error;

type BoxBodyError = Box<dyn StdError + Send + Sync>;
pub(crate) type ReqBody = BoxBody<Bytes, BoxBodyError>;

/// Largest one-shot body that is copied into memory so it can be replayed.
pub const MAX_BUFFERED_BODY_BYTES: usize = 10 * 1024 * 1024;

pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Sync + Unpin {}

impl<T> SeekableSource for T where T: AsyncRead + AsyncSeek + Send + Sync + Unpin {}

pub trait OneShotSource: AsyncRead + Send + Sync + Unpin {}

impl<T> OneShotSource for T where T: AsyncRead + Send + Sync + Unpin {}

/// Request payload supplied by the caller.
///
/// `InMemory` and `Seekable` bodies can be sent again byte-for-byte, so they
/// are eligible for retries and body-preserving redirects. A `OneShot` body is
/// copied into memory when it fits in [`MAX_BUFFERED_BODY_BYTES`]; larger
/// one-shot bodies are streamed once and disable retries for the call.
pub enum RequestBody {
    InMemory(Bytes),
    Seekable(Box<dyn SeekableSource>),
    OneShot(Box<dyn OneShotSource>),
}

impl RequestBody {
    pub fn in_memory(body: impl Into<Bytes>) -> Self {
        Self::InMemory(body.into())
    }

    pub fn seekable<S>(source: S) -> Self
    where
        S: SeekableSource + 'static,
    {
        Self::Seekable(Box::new(source))
    }

    pub fn one_shot<R>(reader: R) -> Self
    where
        R: OneShotSource + 'static,
    {
        Self::OneShot(Box::new(reader))
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory(bytes) => formatter
                .debug_tuple("InMemory")
                .field(&bytes.len())
                .finish(),
            Self::Seekable(_) => formatter.write_str("Seekable"),
            Self::OneShot(_) => formatter.write_str("OneShot"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(body: Bytes) -> Self {
        Self::InMemory(body)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(body: Vec<u8>) -> Self {
        Self::InMemory(Bytes::from(body))
    }
}

impl From<String> for RequestBody {
    fn from(body: String) -> Self {
        Self::InMemory(Bytes::from(body))
    }
}

impl From<&'static str> for RequestBody {
    fn from(body: &'static str) -> Self {
        Self::InMemory(Bytes::from_static(body.as_bytes()))
    }
}

/// Per-call body state, handing out a fresh request body for every attempt.
pub(crate) enum ReplayableBody {
    Empty,
    Buffered(Bytes),
    Seekable(Box<dyn SeekableSource>),
    Streaming(Option<ReqBody>),
}

impl ReplayableBody {
    pub(crate) async fn prepare(body: Option<RequestBody>) -> Result<Self, Error> {
        let Some(body) = body else {
            return Ok(Self::Empty);
        };
        match body {
            RequestBody::InMemory(bytes) => Ok(Self::Buffered(bytes)),
            RequestBody::Seekable(source) => Ok(Self::Seekable(source)),
            RequestBody::OneShot(mut reader) => {
                let mut prefix = Vec::new();
                (&mut reader)
                    .take(MAX_BUFFERED_BODY_BYTES as u64 + 1)
                    .read_to_end(&mut prefix)
                    .await
                    .map_err(|source| Error::ReadRequestBody { source })?;
                if prefix.len() <= MAX_BUFFERED_BODY_BYTES {
                    return Ok(Self::Buffered(Bytes::from(prefix)));
                }
                let chained = Cursor::new(prefix).chain(reader);
                Ok(Self::Streaming(Some(stream_req_body(ReaderStream::new(
                    chained,
                )))))
            }
        }
    }

    pub(crate) fn is_replayable(&self) -> bool {
        !matches!(self, Self::Streaming(_))
    }

    pub(crate) async fn next_body(&mut self) -> Result<ReqBody, Error> {
        match self {
            Self::Empty => Ok(empty_req_body()),
            Self::Buffered(bytes) => Ok(buffered_req_body(bytes.clone())),
            Self::Seekable(source) => {
                source
                    .seek(SeekFrom::Start(0))
                    .await
                    .map_err(|source| Error::ReadRequestBody { source })?;
                let mut buffer = Vec::new();
                source
                    .read_to_end(&mut buffer)
                    .await
                    .map_err(|source| Error::ReadRequestBody { source })?;
                Ok(buffered_req_body(Bytes::from(buffer)))
            }
            // Already-consumed one-shot bodies are resent empty.
            Self::Streaming(body) => Ok(body.take().unwrap_or_else(empty_req_body)),
        }
    }
}

fn map_infallible_to_box_error(never: Infallible) -> BoxBodyError {
    match never {}
}

pub(crate) fn empty_req_body() -> ReqBody {
    Full::new(Bytes::new())
        .map_err(map_infallible_to_box_error)
        .boxed()
}

pub(crate) fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible_to_box_error).boxed()
}

pub(crate) fn stream_req_body<S, E>(stream: S) -> ReqBody
where
    S: Stream<Item = Result<Bytes, E>> + Send + Sync + 'static,
    E: StdError + Send + Sync + 'static,
{
    BodyExt::boxed(StreamBody::new(stream.map(|item| {
        item.map(Frame::data)
            .map_err(|error| Box::new(error) as BoxBodyError)
    })))
}

pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: ReqBody,
) -> Result<Request<ReqBody>, Error> {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(name, value);
    }
    request_builder
        .body(body)
        .map_err(|source| Error::RequestBuild { source })
}

pub(crate) enum ReadBodyError {
    Read(hyper::Error),
    TooLarge { actual_bytes: usize },
}

pub(crate) async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ReadBodyError::Read)?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(ReadBodyError::TooLarge {
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}

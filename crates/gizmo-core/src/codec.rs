//! Request decoders and response encoders.
//!
//! An [`Endpoint`](crate::Endpoint) pairs one [`Decoder`] with one
//! [`Encoder`]. The stock pairs are:
//!
//! | Decoder | Encoder | Body |
//! |---|---|---|
//! | [`JsonDecoder`] | [`JsonEncoder`] | JSON (the default) |
//! | [`EmptyDecoder`] | any | ignored |
//! | [`BinaryDecoder`] | [`BinaryEncoder`] | 4-byte big-endian length prefix + payload |
//! | [`RawDecoder`] | [`RawEncoder`] | the untouched request and response |
//!
//! Successful results shape their response through [`ResponseHooks`]: a
//! status-code hook and a header hook, both with neutral defaults. Wrap a
//! value in [`Reply`] to set them per call.

use std::collections::{BTreeMap, HashMap};

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::{Headerer, ServiceError, StatusCoder};
use crate::{Request, Response};

/// Content type written by [`JsonEncoder`].
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Content type read and written by the binary codec.
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Size of the binary frame prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Turns a buffered request into the business function's input.
pub trait Decoder<I>: Send + Sync + 'static {
    /// Decodes `request`. Errors become 4xx responses.
    fn decode(&self, ctx: &RequestContext, request: Request) -> Result<I, ServiceError>;
}

/// Turns the business function's output into a response.
pub trait Encoder<O>: Send + Sync + 'static {
    /// Encodes a successful result.
    fn encode(&self, ctx: &RequestContext, output: O) -> Result<Response, ServiceError>;

    /// Encodes an error. The default writes the JSON envelope.
    fn encode_error(&self, ctx: &RequestContext, error: &ServiceError) -> Response {
        let _ = ctx;
        error_response(error)
    }
}

/// Hooks a successful result may use to shape its response.
pub trait ResponseHooks {
    /// Status of the response. Defaults to 200.
    fn status_code(&self) -> StatusCode {
        StatusCode::OK
    }

    /// Headers merged into the response. Defaults to none.
    fn headers(&self) -> HeaderMap {
        HeaderMap::new()
    }
}

impl ResponseHooks for () {}
impl ResponseHooks for String {}
impl ResponseHooks for &'static str {}
impl ResponseHooks for bool {}
impl ResponseHooks for Bytes {}
impl ResponseHooks for serde_json::Value {}
impl<T> ResponseHooks for Vec<T> {}
impl<T> ResponseHooks for Option<T> {}
impl<K, V> ResponseHooks for HashMap<K, V> {}
impl<K, V> ResponseHooks for BTreeMap<K, V> {}

/// A result with an explicit status and extra headers.
///
/// ```
/// use gizmo_core::{Reply, ResponseHooks};
/// use http::StatusCode;
///
/// let reply = Reply::new(serde_json::json!({"id": 7}))
///     .with_status(StatusCode::CREATED)
///     .with_header(http::header::LOCATION, http::HeaderValue::from_static("/widgets/7"));
///
/// assert_eq!(reply.status_code(), StatusCode::CREATED);
/// assert_eq!(reply.headers()["location"], "/widgets/7");
/// ```
#[derive(Debug, Clone)]
pub struct Reply<T> {
    value: T,
    status: StatusCode,
    headers: HeaderMap,
}

impl<T> Reply<T> {
    /// Wraps `value` with status 200 and no headers.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Returns the wrapped value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> ResponseHooks for Reply<T> {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }
}

impl<T: Serialize> Serialize for Reply<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<T: BinaryMessage> BinaryMessage for Reply<T> {
    fn to_bytes(&self) -> Bytes {
        self.value.to_bytes()
    }

    fn from_bytes(bytes: Bytes) -> Result<Self, ServiceError> {
        T::from_bytes(bytes).map(Reply::new)
    }
}

/// Renders an error as a response: status and headers from the hooks, body
/// from [`ServiceError::body`].
#[must_use]
pub fn error_response(error: &ServiceError) -> Response {
    let body = serde_json::to_vec(&error.body()).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = error.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response.headers_mut().extend(error.headers());
    response
}

fn with_hooks(body: Bytes, content_type: &'static str, hooks: &impl ResponseHooks) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = hooks.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response.headers_mut().extend(hooks.headers());
    response
}

/// Decodes the request body as JSON.
///
/// An empty body decodes as JSON `null`, so `()` and `Option<T>` inputs
/// accept body-less requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl<I: DeserializeOwned + Send + 'static> Decoder<I> for JsonDecoder {
    fn decode(&self, _ctx: &RequestContext, request: Request) -> Result<I, ServiceError> {
        let body = request.into_body();
        let slice: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &body
        };
        serde_json::from_slice(slice)
            .map_err(|e| ServiceError::bad_request(format!("unable to decode request: {e}")))
    }
}

/// Encodes the result as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl<O: Serialize + ResponseHooks + Send + 'static> Encoder<O> for JsonEncoder {
    fn encode(&self, _ctx: &RequestContext, output: O) -> Result<Response, ServiceError> {
        let body = serde_json::to_vec(&output).map_err(anyhow::Error::new)?;
        Ok(with_hooks(Bytes::from(body), JSON_CONTENT_TYPE, &output))
    }
}

/// Ignores the request entirely and yields `()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyDecoder;

impl Decoder<()> for EmptyDecoder {
    fn decode(&self, _ctx: &RequestContext, _request: Request) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// A message with a byte-level wire form.
pub trait BinaryMessage: Sized + Send + 'static {
    /// Serializes the message.
    fn to_bytes(&self) -> Bytes;

    /// Parses a message.
    fn from_bytes(bytes: Bytes) -> Result<Self, ServiceError>;
}

impl BinaryMessage for Bytes {
    fn to_bytes(&self) -> Bytes {
        self.clone()
    }

    fn from_bytes(bytes: Bytes) -> Result<Self, ServiceError> {
        Ok(bytes)
    }
}

impl BinaryMessage for Vec<u8> {
    fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }

    fn from_bytes(bytes: Bytes) -> Result<Self, ServiceError> {
        Ok(bytes.to_vec())
    }
}

impl BinaryMessage for String {
    fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }

    fn from_bytes(bytes: Bytes) -> Result<Self, ServiceError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ServiceError::bad_request(format!("invalid utf-8 payload: {e}")))
    }
}

/// Prefixes `payload` with its length as a big-endian `u32`.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits one length-prefixed frame. The frame must span the whole input.
pub fn decode_frame(mut frame: Bytes) -> Result<Bytes, ServiceError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(ServiceError::bad_request("binary frame shorter than its header"));
    }
    let header = frame.split_to(FRAME_HEADER_LEN);
    let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if declared != frame.len() {
        return Err(ServiceError::bad_request(format!(
            "binary frame declares {declared} bytes but carries {}",
            frame.len()
        )));
    }
    Ok(frame)
}

/// Decodes a length-prefixed binary body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryDecoder;

impl<I: BinaryMessage> Decoder<I> for BinaryDecoder {
    fn decode(&self, _ctx: &RequestContext, request: Request) -> Result<I, ServiceError> {
        I::from_bytes(decode_frame(request.into_body())?)
    }
}

/// Encodes the result as a length-prefixed binary body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryEncoder;

impl<O: BinaryMessage + ResponseHooks> Encoder<O> for BinaryEncoder {
    fn encode(&self, _ctx: &RequestContext, output: O) -> Result<Response, ServiceError> {
        let body = encode_frame(&output.to_bytes());
        Ok(with_hooks(body, BINARY_CONTENT_TYPE, &output))
    }
}

/// Hands the whole request to the business function.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder<Request> for RawDecoder {
    fn decode(&self, _ctx: &RequestContext, request: Request) -> Result<Request, ServiceError> {
        Ok(request)
    }
}

/// Writes the business function's response untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

impl Encoder<Response> for RawEncoder {
    fn encode(&self, _ctx: &RequestContext, output: Response) -> Result<Response, ServiceError> {
        Ok(output)
    }
}

/// Builds a plain-text response.
#[must_use]
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

//! Transport primitives for identity provider and backend calls.
//!
//! [`TokenHttpClient`] is the crate's only dependency on an HTTP stack.
//! Implementations hand out short-lived [`AsyncHttpClient`] handles tied to a
//! [`ResponseMetadataSlot`]; the slot carries the last observed HTTP status
//! so error mapping can classify failures after the `oauth2` layer has
//! consumed the response.

// std
use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
#[cfg(feature = "reqwest")] use reqwest::redirect;
// self
use crate::_prelude::*;

/// Abstraction over HTTP transports capable of executing token exchanges and
/// backend resource calls.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be
/// shared by the broker, the gate, and the resource client, and the handles
/// they return must own their state so request futures stay `Send` for the
/// lifetime of the in-flight operation.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds an [`AsyncHttpClient`] handle that records outcomes in `slot`.
	///
	/// Handles must call [`ResponseMetadataSlot::take`] before dispatching so
	/// stale statuses never leak across retries, and
	/// [`ResponseMetadataSlot::store`] once a response status is known.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Metadata captured from the most recent HTTP response.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the remote endpoint, if available.
	pub status: Option<u16>,
}

/// Thread-safe slot sharing [`ResponseMetadata`] between transport and error
/// mapping layers.
///
/// A fresh slot is created per remote call; the caller reads the captured
/// metadata immediately after the transport resolves.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Default reqwest-backed transport.
///
/// The default client bounds every call with a 10-second timeout and refuses
/// to follow redirects; token endpoints answer directly rather than
/// delegating to another URI, and a silent redirect would break bearer
/// semantics for backend calls. Custom clients passed through
/// [`ReqwestHttpClient::with_client`] should preserve both properties.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Per-call timeout applied by the default client.
	pub const DEFAULT_TIMEOUT: core::time::Duration = core::time::Duration::from_secs(10);

	/// Builds the default bounded-timeout client.
	pub fn new() -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(Self::DEFAULT_TIMEOUT)
			.redirect(redirect::Policy::none())
			.build()?;

		Ok(Self(client))
	}

	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	pub(crate) fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.0.clone(), slot)
	}
}
#[cfg(feature = "reqwest")]
impl Default for ReqwestHttpClient {
	fn default() -> Self {
		Self::new().unwrap_or_else(|_| Self(ReqwestClient::default()))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

#[cfg(feature = "reqwest")]
struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

#[cfg(feature = "reqwest")]
/// Handle returned by [`ReqwestHttpClient`] that satisfies [`TokenHttpClient`].
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
#[cfg(feature = "reqwest")]
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, slot }))
	}
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()) });

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		self.instrumented(slot)
	}
}

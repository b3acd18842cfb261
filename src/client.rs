//! Outbound backend client with singleflight refresh coordination.
//!
//! Every call attaches the current valid access token as a bearer credential.
//! A 401 response enters refresh coordination: concurrent failures serialize
//! on one async mutex, the first caller through performs the provider
//! refresh, and everyone who failed while it was in flight adopts that
//! resolution instead of issuing its own call. One retry per request, never
//! more; a second 401 is terminal.

// crates.io
use cookie::CookieJar;
use oauth2::{
	AsyncHttpClient,
	http::{self, header},
};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	error::ConfigError,
	http::{ResponseMetadataSlot, TokenHttpClient},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::TransportErrorMapper,
	session::SessionBroker,
};
#[cfg(feature = "reqwest")]
use crate::{
	http::ReqwestHttpClient,
	provider::ReqwestTransportErrorMapper,
	session::ReqwestSessionBroker,
};

#[cfg(feature = "reqwest")]
/// Resource client specialized for the crate's default reqwest transport.
pub type ReqwestResourceClient = ResourceClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

const STATUS_UNAUTHORIZED: u16 = 401;

/// Response surface handed back to route handlers.
///
/// Authorization failures never reach this type; they are resolved or turned
/// into typed errors by the client. Everything else, including 403s and
/// backend validation failures, is the caller's business.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Whether the status is in the 2xx range.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Deserializes the body as JSON.
	pub fn json<T>(&self) -> Result<T, serde_json::Error>
	where
		T: serde::de::DeserializeOwned,
	{
		serde_json::from_slice(&self.body)
	}
}

/// Process-wide singleflight state for session refreshes.
///
/// The async mutex serializes refresh attempts; its internal waiter list is
/// the queue of requests that failed while a refresh was in flight. The
/// generation counter stamps each resolution so a settled outcome is only
/// ever adopted by callers whose failure predates it; anything newer performs
/// its own refresh. A caller that stops waiting simply drops out of the
/// mutex queue without touching shared state.
struct RefreshCoordinator {
	serializer: AsyncMutex<()>,
	state: Mutex<CoordinationState>,
}
#[derive(Default)]
struct CoordinationState {
	generation: u64,
	outcome: Option<Result<Credential, Arc<Error>>>,
}
impl RefreshCoordinator {
	fn new() -> Self {
		Self { serializer: AsyncMutex::new(()), state: Mutex::new(CoordinationState::default()) }
	}

	fn generation(&self) -> u64 {
		self.state.lock().generation
	}

	async fn coordinate<C, M>(
		&self,
		broker: &SessionBroker<C, M>,
		jar: &mut CookieJar,
		observed: u64,
	) -> Result<Credential, Arc<Error>>
	where
		C: ?Sized + TokenHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let _leader = self.serializer.lock().await;

		{
			let state = self.state.lock();

			// A refresh settled while this caller was queued; share its
			// outcome. Resolutions at or before `observed` predate the 401
			// and are never adopted.
			if state.generation > observed
				&& let Some(outcome) = state.outcome.clone()
			{
				return outcome;
			}
		}

		let outcome = match broker.refresh_session(jar).await {
			Ok(credential) => Ok(credential),
			Err(err) => Err(Arc::new(err)),
		};
		let mut state = self.state.lock();

		state.generation += 1;
		state.outcome = Some(outcome.clone());

		outcome
	}
}

/// Backend API client wrapping every resource call with bearer attachment
/// and refresh coordination.
pub struct ResourceClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	broker: Arc<SessionBroker<C, M>>,
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	base_url: Url,
	coordinator: RefreshCoordinator,
}
impl<C, M> ResourceClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client that reuses the caller-provided transport + mapper
	/// pair.
	pub fn with_http_client(
		broker: Arc<SessionBroker<C, M>>,
		base_url: Url,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			broker,
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			base_url,
			coordinator: RefreshCoordinator::new(),
		}
	}

	/// Issues a GET against the backend.
	pub async fn get(&self, path: &str, jar: &mut CookieJar) -> Result<ApiResponse> {
		self.send(http::Method::GET, path, None, jar).await
	}

	/// Issues a POST with a JSON body.
	pub async fn post(
		&self,
		path: &str,
		body: &serde_json::Value,
		jar: &mut CookieJar,
	) -> Result<ApiResponse> {
		self.send(http::Method::POST, path, Some(body_bytes(body)?), jar).await
	}

	/// Issues a PUT with a JSON body.
	pub async fn put(
		&self,
		path: &str,
		body: &serde_json::Value,
		jar: &mut CookieJar,
	) -> Result<ApiResponse> {
		self.send(http::Method::PUT, path, Some(body_bytes(body)?), jar).await
	}

	/// Issues a PATCH with a JSON body.
	pub async fn patch(
		&self,
		path: &str,
		body: &serde_json::Value,
		jar: &mut CookieJar,
	) -> Result<ApiResponse> {
		self.send(http::Method::PATCH, path, Some(body_bytes(body)?), jar).await
	}

	/// Issues a DELETE against the backend.
	pub async fn delete(&self, path: &str, jar: &mut CookieJar) -> Result<ApiResponse> {
		self.send(http::Method::DELETE, path, None, jar).await
	}

	async fn send(
		&self,
		method: http::Method,
		path: &str,
		body: Option<Vec<u8>>,
		jar: &mut CookieJar,
	) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::Resource;

		let span = FlowSpan::new(KIND, "send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let uri =
					format!("{}{path}", self.base_url.as_str().trim_end_matches('/'));
				let token = self.broker.valid_access_token(jar);
				let response =
					self.dispatch(&uri, &method, body.clone(), token.as_deref()).await?;

				if response.status != STATUS_UNAUTHORIZED {
					return Ok(response);
				}

				// The generation is read at the moment of failure so only a
				// refresh that settles AFTER this 401 can be adopted.
				let observed = self.coordinator.generation();
				let credential =
					match self.coordinator.coordinate(&self.broker, jar, observed).await {
						Ok(credential) => credential,
						Err(shared) => {
							// Doomed refresh: fail fast from here on instead
							// of re-attempting it on every request.
							self.broker.clear_local(jar);

							return Err(Error::RefreshRejected(shared));
						},
					};

				// Followers write the shared credential onto their own
				// carrier; for the leader this re-write is a no-op.
				self.broker.adopt_credential(&credential, jar)?;

				let retry = self
					.dispatch(&uri, &method, body, Some(credential.access_token.expose()))
					.await?;

				if retry.status == STATUS_UNAUTHORIZED {
					return Err(Error::Unauthorized);
				}

				Ok(retry)
			})
			.await;

		obs::record_flow_result(KIND, &result);

		result
	}

	async fn dispatch(
		&self,
		uri: &str,
		method: &http::Method,
		body: Option<Vec<u8>>,
		bearer: Option<&str>,
	) -> Result<ApiResponse> {
		let mut builder = http::Request::builder().method(method.clone()).uri(uri);

		if let Some(token) = bearer {
			builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
		}
		if body.is_some() {
			builder = builder.header(header::CONTENT_TYPE, "application/json");
		}

		let request = builder.body(body.unwrap_or_default()).map_err(ConfigError::from)?;
		let meta = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(meta.clone());
		let response = handle.call(request).await.map_err(|err| {
			self.transport_mapper.map_transport_error(meta.take().as_ref(), err)
		})?;

		Ok(ApiResponse { status: response.status().as_u16(), body: response.into_body() })
	}
}
#[cfg(feature = "reqwest")]
impl ReqwestResourceClient {
	/// Creates a client with the crate's default reqwest transport stack.
	pub fn new(broker: Arc<ReqwestSessionBroker>, base_url: Url) -> Self {
		Self::with_http_client(
			broker,
			base_url,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for ResourceClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResourceClient").field("base_url", &self.base_url).finish()
	}
}

fn body_bytes(body: &serde_json::Value) -> Result<Vec<u8>> {
	serde_json::to_vec(body)
		.map_err(|source| ConfigError::BodySerialization { source }.into())
}

//! Identity provider client covering the four remote session operations.
//!
//! [`IdpClient`] wraps the `oauth2` crate for the two grant exchanges
//! (`grant_type=password` and `grant_type=refresh_token`) and RFC 7662
//! introspection, and issues the revocation call as a plain form POST because
//! the provider's logout endpoint takes `refresh_token=` rather than the
//! RFC 7009 `token=` field. Every operation is a single bounded network call;
//! mapping provider rejections into the crate's typed errors happens here so
//! callers never see raw OAuth plumbing.

// crates.io
use oauth2::{
	AccessToken, AsyncHttpClient, AuthType, Client, ClientId, ClientSecret, EndpointNotSet,
	EndpointSet, ExtraTokenFields, HttpClientError, IntrospectionUrl, RefreshToken,
	RequestTokenError, ResourceOwnerPassword, ResourceOwnerUsername, StandardRevocableToken,
	StandardTokenResponse, TokenIntrospectionResponse, TokenResponse as _, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
		BasicTokenType,
	},
};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, ProviderError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Extra token endpoint fields beyond the RFC 6749 set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshLifetime {
	/// Relative refresh token lifetime in seconds; `0` means unbounded.
	#[serde(default)]
	pub refresh_expires_in: Option<u64>,
}
impl ExtraTokenFields for RefreshLifetime {}

type IdpTokenResponse = StandardTokenResponse<RefreshLifetime, BasicTokenType>;
type UnconfiguredOAuthClient = Client<
	BasicErrorResponse,
	IdpTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
>;
type ConfiguredOAuthClient = Client<
	BasicErrorResponse,
	IdpTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
	EndpointNotSet,
	EndpointSet,
>;

/// Remote endpoints of one identity provider realm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdpEndpoints {
	/// Token endpoint serving both grant types.
	pub token: Url,
	/// Revocation endpoint consuming `refresh_token=` form posts.
	pub revocation: Url,
	/// RFC 7662 introspection endpoint.
	pub introspection: Url,
}
impl IdpEndpoints {
	/// Derives the standard Keycloak realm endpoints from a base URL.
	///
	/// `base` must end with a trailing slash when the provider lives under a
	/// subpath, because the realm paths are joined relative to it.
	pub fn keycloak(base: &Url, realm: &str) -> Result<Self, ConfigError> {
		let prefix = format!("realms/{realm}/protocol/openid-connect");
		let join = |endpoint: &'static str, suffix: &str| {
			base.join(&format!("{prefix}/{suffix}"))
				.map_err(|source| ConfigError::InvalidEndpoint { endpoint, source })
		};

		Ok(Self {
			token: join("token", "token")?,
			revocation: join("revocation", "logout")?,
			introspection: join("introspection", "token/introspect")?,
		})
	}
}

/// Relative-lifetime token response as handed to the lifecycle manager.
///
/// Absolute expiry instants are deliberately NOT computed here; the caller
/// stamps the issue instant so expiry math happens exactly once.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// Newly issued access token.
	pub access_token: String,
	/// Rotated refresh token, absent when the provider reuses the old one.
	pub refresh_token: Option<String>,
	/// Relative access token lifetime.
	pub expires_in: Duration,
	/// Relative refresh token lifetime, absent when unreported or unbounded.
	pub refresh_expires_in: Option<Duration>,
	/// Space-joined scope string echoed by the provider.
	pub scope: Option<String>,
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate
	/// error.
	fn map_transport_error(
		&self,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => {
				let inner = *inner;

				if inner.is_builder() {
					ConfigError::from(inner).into()
				} else {
					TransportError::from(inner).into()
				}
			},
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => ProviderError::TokenEndpoint {
				message: format!("HTTP client error occurred: {message}"),
				status: meta.and_then(|value| value.status),
			}
			.into(),
			_ => ProviderError::TokenEndpoint {
				message: "HTTP client error occurred.".into(),
				status: meta.and_then(|value| value.status),
			}
			.into(),
		}
	}
}

/// Which grant a failed token endpoint call was performing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GrantKind {
	Password,
	RefreshToken,
}

/// Identity provider client executing the four remote session operations.
pub struct IdpClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredOAuthClient,
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	endpoints: IdpEndpoints,
	client_id: String,
	client_secret: Option<String>,
}
impl<C, M> IdpClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client that reuses the caller-provided transport + mapper
	/// pair.
	pub fn with_http_client(
		endpoints: IdpEndpoints,
		client_id: impl Into<String>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		let client_id = client_id.into();
		let oauth_client = UnconfiguredOAuthClient::new(ClientId::new(client_id.clone()))
			// The provider expects client credentials in the form body, per
			// its token endpoint contract.
			.set_auth_type(AuthType::RequestBody)
			.set_token_uri(TokenUrl::from_url(endpoints.token.clone()))
			.set_introspection_url(IntrospectionUrl::from_url(endpoints.introspection.clone()));

		Self {
			oauth_client,
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			endpoints,
			client_id,
			client_secret: None,
		}
	}

	/// Sets or replaces the confidential client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		let secret = secret.into();

		self.oauth_client = self.oauth_client.set_client_secret(ClientSecret::new(secret.clone()));
		self.client_secret = Some(secret);

		self
	}

	/// Client identifier used for every grant and for role scoping.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Configured endpoint set.
	pub fn endpoints(&self) -> &IdpEndpoints {
		&self.endpoints
	}

	/// Exchanges a username/password pair for a token grant.
	pub async fn password_login(&self, username: &str, password: &str) -> Result<TokenGrant> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.with_metadata(meta.clone());
		let response = self
			.oauth_client
			.exchange_password(
				&ResourceOwnerUsername::new(username.to_owned()),
				&ResourceOwnerPassword::new(password.to_owned()),
			)
			.request_async(&instrumented)
			.await
			.map_err(|err| {
				self.map_request_error(GrantKind::Password, meta.take().as_ref(), err)
			})?;

		grant_from_response(response)
	}

	/// Renews the session from a refresh token.
	pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.with_metadata(meta.clone());
		let refresh_secret = RefreshToken::new(refresh_token.to_owned());
		let response = self
			.oauth_client
			.exchange_refresh_token(&refresh_secret)
			.request_async(&instrumented)
			.await
			.map_err(|err| {
				self.map_request_error(GrantKind::RefreshToken, meta.take().as_ref(), err)
			})?;

		grant_from_response(response)
	}

	/// Asks the provider to invalidate a refresh token.
	///
	/// Callers performing logout swallow this operation's failures; local
	/// clearing never depends on the remote outcome.
	pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
		let body = {
			let mut form = form_urlencoded::Serializer::new(String::new());

			form.append_pair("client_id", &self.client_id);

			if let Some(secret) = &self.client_secret {
				form.append_pair("client_secret", secret);
			}

			form.append_pair("refresh_token", refresh_token);

			form.finish().into_bytes()
		};

		let request = oauth2::http::Request::builder()
			.method(oauth2::http::Method::POST)
			.uri(self.endpoints.revocation.as_str())
			.header(oauth2::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
			.body(body)
			.map_err(ConfigError::from)?;
		let meta = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(meta.clone());
		let response = handle.call(request).await.map_err(|err| {
			self.transport_mapper.map_transport_error(meta.take().as_ref(), err)
		})?;
		let status = response.status();

		// Response bodies are ignored by contract; only success matters.
		if status.is_success() {
			Ok(())
		} else {
			Err(ProviderError::TokenEndpoint {
				message: "Revocation endpoint rejected the request".into(),
				status: Some(status.as_u16()),
			}
			.into())
		}
	}

	/// Returns whether the provider considers `token` active.
	///
	/// Fails closed: any transport or provider error reads as inactive
	/// rather than granting access on an ambiguous failure.
	pub async fn introspect(&self, token: &str) -> bool {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.with_metadata(meta.clone());

		match self
			.oauth_client
			.introspect(&AccessToken::new(token.to_owned()))
			.request_async(&instrumented)
			.await
		{
			Ok(response) => response.active(),
			Err(_) => false,
		}
	}

	fn map_request_error(
		&self,
		grant: GrantKind,
		meta: Option<&ResponseMetadata>,
		err: RequestTokenError<HttpClientError<C::TransportError>, BasicErrorResponse>,
	) -> Error {
		let status = meta.and_then(|value| value.status);

		match err {
			RequestTokenError::ServerResponse(response) =>
				map_server_rejection(grant, &response, status),
			RequestTokenError::Request(error) =>
				self.transport_mapper.map_transport_error(meta, error),
			RequestTokenError::Parse(error, _body) =>
				ProviderError::ResponseParse { source: error, status }.into(),
			RequestTokenError::Other(message) => ProviderError::TokenEndpoint {
				message: format!("Token endpoint returned an unexpected response: {message}"),
				status,
			}
			.into(),
		}
	}
}
#[cfg(feature = "reqwest")]
impl IdpClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a client with the crate's default reqwest transport stack.
	pub fn new(endpoints: IdpEndpoints, client_id: impl Into<String>) -> Self {
		Self::with_http_client(
			endpoints,
			client_id,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for IdpClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdpClient")
			.field("endpoints", &self.endpoints)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.finish()
	}
}

fn map_server_rejection(
	grant: GrantKind,
	response: &BasicErrorResponse,
	status: Option<u16>,
) -> Error {
	let code = response.error().as_ref();
	let rejected_grant = matches!(
		code,
		"invalid_grant" | "invalid_client" | "unauthorized_client" | "invalid_request"
	);

	match (grant, rejected_grant) {
		// The raw provider payload never travels past this point for login
		// failures; end users only ever see the generic message.
		(GrantKind::Password, true) => Error::InvalidCredentials,
		(GrantKind::RefreshToken, true) => Error::RefreshFailed { reason: code.to_owned() },
		(_, false) => ProviderError::TokenEndpoint {
			message: format!("Token endpoint returned an OAuth error: {code}"),
			status,
		}
		.into(),
	}
}

fn grant_from_response(response: IdpTokenResponse) -> Result<TokenGrant> {
	let expires_in = response.expires_in().ok_or(ProviderError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ProviderError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ProviderError::NonPositiveExpiresIn.into());
	}

	let refresh_expires_in = response
		.extra_fields()
		.refresh_expires_in
		.and_then(|secs| i64::try_from(secs).ok())
		.filter(|secs| *secs > 0)
		.map(Duration::seconds);
	let scope = response
		.scopes()
		.map(|scopes| scopes.iter().map(|scope| scope.as_ref()).collect::<Vec<&str>>().join(" "));

	Ok(TokenGrant {
		access_token: response.access_token().secret().to_owned(),
		refresh_token: response.refresh_token().map(|token| token.secret().to_owned()),
		expires_in: Duration::seconds(expires_in),
		refresh_expires_in,
		scope,
	})
}

//! Session-level error types shared across the broker, client, and gate.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical session error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Access token payload could not be decoded.
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Identity provider returned an unexpected response.
	#[error(transparent)]
	Provider(#[from] ProviderError),
	/// Cookie carrier failure.
	#[error(transparent)]
	Store(#[from] StoreError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Identity provider rejected the supplied username/password pair.
	///
	/// Deliberately carries no provider payload; the raw rejection body must
	/// never reach an end user.
	#[error("Invalid username or password.")]
	InvalidCredentials,
	/// Session carries no refresh token, so it cannot be renewed.
	#[error("Session has no refresh token.")]
	NoRefreshToken,
	/// Identity provider rejected the refresh token.
	#[error("Session refresh was rejected: {reason}.")]
	RefreshFailed {
		/// OAuth error code reported by the provider, or a broker-supplied
		/// summary when none was given.
		reason: String,
	},
	/// Session refresh owned by a concurrent request failed; this caller
	/// shares that outcome instead of issuing its own provider call.
	#[error("Session refresh failed while retrying an unauthorized request.")]
	RefreshRejected(#[source] Arc<Error>),
	/// Backend rejected the bearer credential even after a refresh cycle.
	#[error("Backend rejected the request as unauthorized.")]
	Unauthorized,
}

/// Failures raised while decoding an access token payload.
///
/// Callers treat any of these as "unauthenticated"; they never abort the
/// process.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// Token does not consist of exactly three dot-separated segments.
	#[error("Access token has {found} segments where 3 were expected.")]
	SegmentCount {
		/// Number of segments found in the raw token.
		found: usize,
	},
	/// Payload segment is not valid base64url.
	#[error("Access token payload is not valid base64url.")]
	Encoding(#[from] base64::DecodeError),
	/// Payload segment decoded but is not a valid claims document.
	#[error("Access token payload is not a valid claims document.")]
	Payload(#[source] serde_path_to_error::Error<serde_json::Error>),
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	BodySerialization {
		/// Underlying serialization failure.
		#[source]
		source: serde_json::Error,
	},
	/// A provider endpoint URL is invalid.
	#[error("Identity provider endpoint `{endpoint}` is invalid.")]
	InvalidEndpoint {
		/// Endpoint label (`token`, `revocation`, `introspection`).
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Unexpected identity provider responses that are not grant rejections.
#[derive(Debug, ThisError)]
pub enum ProviderError {
	/// Token endpoint returned an unexpected response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint issued a credential without any usable refresh token.
	#[error("Token endpoint response is missing a refresh token.")]
	MissingRefreshToken,
	/// Token endpoint returned an `expires_in` outside the supported range.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive lifetime.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the remote endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The remote endpoint did not respond within the configured timeout.
	#[error("The remote endpoint did not respond within the timeout.")]
	Timeout,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the remote endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

/// Failures raised by the credential store while serializing session fields.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StoreError {
	/// Claims payload could not be serialized for the user-info field.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
}

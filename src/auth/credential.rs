//! Credential pair models and the redacting secret wrapper.

// self
use crate::_prelude::*;

/// Redacted token wrapper keeping sensitive material out of logs.
///
/// `Debug` and `Display` both print `<redacted>`; the raw value is only
/// reachable through [`TokenSecret::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Freshly issued credential pair with absolute expiry instants.
///
/// Built once per successful login or refresh and written to the carrier as a
/// whole; individual fields are never patched in place. Both expiries are
/// derived from the issue instant plus the provider-reported relative
/// lifetimes, never from the token body.
#[derive(Clone)]
pub struct Credential {
	/// Bearer access token.
	pub access_token: TokenSecret,
	/// Refresh token; replaced wholesale when the provider rotates it.
	pub refresh_token: TokenSecret,
	/// Instant at which the access token stops being presentable.
	pub access_expires_at: OffsetDateTime,
	/// Instant at which the refresh token stops being presentable.
	pub refresh_expires_at: OffsetDateTime,
}
impl Credential {
	/// Builds a credential from provider-reported relative lifetimes.
	pub fn issue(
		access_token: impl Into<String>,
		refresh_token: impl Into<String>,
		issued_at: OffsetDateTime,
		lifetime: Duration,
		refresh_lifetime: Duration,
	) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: TokenSecret::new(refresh_token),
			access_expires_at: issued_at + lifetime,
			refresh_expires_at: issued_at + refresh_lifetime,
		}
	}

	/// Returns `true` if the access token is still presentable at `now`.
	pub fn is_access_valid_at(&self, now: OffsetDateTime) -> bool {
		self.access_expires_at > now
	}

	/// Access expiry as epoch milliseconds, the store's wire encoding.
	pub fn access_expiry_unix_ms(&self) -> i64 {
		unix_ms(self.access_expires_at)
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &self.access_token)
			.field("refresh_token", &self.refresh_token)
			.field("access_expires_at", &self.access_expires_at)
			.field("refresh_expires_at", &self.refresh_expires_at)
			.finish()
	}
}

/// Session fields as read back from the cookie carrier.
///
/// The refresh expiry never round-trips: it only exists as the refresh
/// cookie's own max-age, so an expired refresh token simply reads back as
/// [`None`].
#[derive(Clone, Debug)]
pub struct StoredCredential {
	/// Bearer access token as stored.
	pub access_token: TokenSecret,
	/// Refresh token, when its cookie is still alive.
	pub refresh_token: Option<TokenSecret>,
	/// Access expiry parsed from the stored epoch-millisecond field.
	pub access_expires_at: OffsetDateTime,
}
impl StoredCredential {
	/// Returns `true` if the stored access token is still valid at `now`.
	///
	/// A present-but-expired token is indistinguishable from an absent one
	/// for every caller of this check.
	pub fn is_access_valid_at(&self, now: OffsetDateTime) -> bool {
		self.access_expires_at > now
	}
}

/// Converts an instant to epoch milliseconds.
pub(crate) fn unix_ms(instant: OffsetDateTime) -> i64 {
	i64::try_from(instant.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// Parses an epoch-millisecond value back into an instant.
pub(crate) fn from_unix_ms(ms: i64) -> OffsetDateTime {
	OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
		.unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

//! Access token claims model and the payload codec.
//!
//! The codec is pure: it splits the compact token on `.`, base64url-decodes
//! the middle segment, and parses it as JSON. It does NOT verify the issuer's
//! signature, so the output is only as trustworthy as the channel the token
//! arrived on. Deployments that let decoded roles cross a trust boundary must
//! verify tokens against the provider's published keys first.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{_prelude::*, error::DecodeError};

/// Decoded access token payload.
///
/// Field names follow the provider's wire claims so the same struct serves as
/// the stored user-info document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
	/// Subject identifier.
	pub sub: String,
	/// Issued-at instant, epoch seconds.
	pub iat: i64,
	/// Expiry instant, epoch seconds.
	pub exp: i64,
	/// Login name preferred by the user.
	#[serde(default)]
	pub preferred_username: Option<String>,
	/// Email address, when released by the provider.
	#[serde(default)]
	pub email: Option<String>,
	/// Human-readable display name.
	#[serde(default)]
	pub name: Option<String>,
	/// Per-client role grants keyed by client identifier.
	#[serde(default)]
	pub resource_access: BTreeMap<String, ClientAccess>,
}
impl Claims {
	/// Decodes the payload segment of a compact access token.
	///
	/// Fails with [`DecodeError`] on wrong segment count, invalid base64url,
	/// or an unparseable claims document; callers treat every failure as
	/// "unauthenticated".
	pub fn decode(access_token: &str) -> Result<Self, DecodeError> {
		let segments = access_token.split('.').collect::<Vec<_>>();

		if segments.len() != 3 {
			return Err(DecodeError::SegmentCount { found: segments.len() });
		}

		let payload = URL_SAFE_NO_PAD.decode(segments[1])?;
		let mut deserializer = serde_json::Deserializer::from_slice(&payload);

		serde_path_to_error::deserialize(&mut deserializer).map_err(DecodeError::Payload)
	}

	/// Returns the roles granted to the given client, empty when none.
	pub fn roles_for(&self, client_id: &str) -> BTreeSet<String> {
		self.resource_access
			.get(client_id)
			.map(|access| access.roles.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Issued-at instant as [`OffsetDateTime`].
	pub fn issued_at(&self) -> OffsetDateTime {
		OffsetDateTime::from_unix_timestamp(self.iat).unwrap_or(OffsetDateTime::UNIX_EPOCH)
	}

	/// Expiry instant as [`OffsetDateTime`].
	pub fn expires_at(&self) -> OffsetDateTime {
		OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
	}

	/// Projects the flat profile document served to UI collaborators.
	pub fn profile(&self, client_id: &str) -> UserProfile {
		UserProfile {
			sub: self.sub.clone(),
			username: self.preferred_username.clone().unwrap_or_else(|| self.sub.clone()),
			preferred_username: self.preferred_username.clone(),
			email: self.email.clone(),
			name: self.name.clone(),
			roles: self.roles_for(client_id),
			iat: self.iat,
			exp: self.exp,
		}
	}
}

/// Role grants a provider client has released for one resource client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAccess {
	/// Role names granted to the subject for this client.
	#[serde(default)]
	pub roles: Vec<String>,
}

/// Flattened claims view consumed by UI/page collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
	/// Subject identifier.
	pub sub: String,
	/// Login name, falling back to the subject when the provider released
	/// no preferred username.
	pub username: String,
	/// Login name preferred by the user, verbatim.
	pub preferred_username: Option<String>,
	/// Email address, when released.
	pub email: Option<String>,
	/// Human-readable display name.
	pub name: Option<String>,
	/// Roles granted for the configured client.
	pub roles: BTreeSet<String>,
	/// Issued-at instant, epoch seconds.
	pub iat: i64,
	/// Expiry instant, epoch seconds.
	pub exp: i64,
}

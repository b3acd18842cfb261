//! Session lifecycle broker for OIDC-backed web apps - password login,
//! singleflight refresh coordination, signed-cookie credential storage, and
//! route gating in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod client;
pub mod error;
pub mod gate;
pub mod http;
pub mod obs;
pub mod provider;
pub mod session;
pub mod store;
#[cfg(feature = "axum")] pub mod web;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixtures for tests; enabled via
	//! `cfg(test)` or the `test` crate feature.

	pub use crate::_prelude::*;

	// crates.io
	use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
	#[cfg(feature = "reqwest")] use cookie::Key;
	// self
	#[cfg(feature = "reqwest")]
	use crate::{
		http::ReqwestHttpClient,
		provider::{IdpClient, IdpEndpoints, ReqwestTransportErrorMapper},
		session::{ReqwestSessionBroker, SessionBroker},
		store::{CookiePolicy, CredentialStore},
	};

	/// Builds an unsigned three-segment access token around `payload`.
	///
	/// Good enough for every consumer in this crate: the codec never
	/// verifies signatures, so the third segment is a fixed marker.
	pub fn forge_access_token(payload: &serde_json::Value) -> String {
		let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
		let body = URL_SAFE_NO_PAD.encode(payload.to_string());

		format!("{header}.{body}.forged-signature")
	}

	/// Builds a reqwest HTTP client that accepts the self-signed
	/// certificates produced by `httpmock` during tests.
	#[cfg(feature = "reqwest")]
	pub fn test_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Endpoint set pointing every operation at a mock server base URL.
	#[cfg(feature = "reqwest")]
	pub fn test_endpoints(base: &str) -> IdpEndpoints {
		let url = |suffix: &str| {
			Url::parse(&format!("{base}{suffix}"))
				.expect("Mock endpoint URL should parse successfully.")
		};

		IdpEndpoints {
			token: url("/token"),
			revocation: url("/logout"),
			introspection: url("/introspect"),
		}
	}

	/// Constructs a [`SessionBroker`] over the mock endpoints with a fresh
	/// signing key and test-friendly (non-secure) cookies.
	#[cfg(feature = "reqwest")]
	pub fn build_test_broker(
		endpoints: IdpEndpoints,
		client_id: &str,
		client_secret: &str,
	) -> ReqwestSessionBroker {
		let idp = IdpClient::with_http_client(
			endpoints,
			client_id,
			test_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.with_client_secret(client_secret);
		let store = CredentialStore::new(Key::generate())
			.with_policy(CookiePolicy::default().with_secure(false));

		SessionBroker::new(idp, store)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use cookie;
pub use url;
#[cfg(test)] use {color_eyre as _, http_body_util as _, httpmock as _, tower as _};

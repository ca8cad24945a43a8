use secrecy::{ExposeSecret as _, SecretString};

use super::{Error, RegexImageScanner};

pub const SECRET_VAR: &str = "ENCRYPTION_SECRET";
pub const WORKERS_VAR: &str = "DIARY_ROTATION_WORKERS";
pub const UPLOAD_PREFIX_VAR: &str = "DIARY_UPLOAD_PREFIX";
pub const PUBLIC_ORIGIN_VAR: &str = "DIARY_PUBLIC_ORIGIN";

pub const DEFAULT_ROTATION_WORKERS: usize = 4;
pub const DEFAULT_UPLOAD_PREFIX: &str = "/api/uploads/";

// Older deployments silently fell back to this when the secret was unset
const LEGACY_INSECURE_SECRET: &str = "default-insecure-secret-change-me";

/// The server-wide secret that wraps every user's security key.
#[derive(Debug)]
pub struct ServerSecret(SecretString);

impl ServerSecret {
	/// # Errors
	///
	/// Returns [`Error::Config`] if the secret is empty or is the well-known insecure default.
	pub fn new(secret: impl Into<String>) -> Result<Self, Error> {
		let secret = secret.into();

		if secret.trim().is_empty() {
			return Err(Error::config(format!("{SECRET_VAR} must not be empty")));
		}

		if secret == LEGACY_INSECURE_SECRET {
			return Err(Error::config(format!(
				"{SECRET_VAR} is set to the insecure default; generate a real secret"
			)));
		}

		Ok(Self(secret.into()))
	}

	pub fn expose_secret(&self) -> &str {
		self.0.expose_secret()
	}
}

/// Process-wide settings, loaded once at startup.
#[derive(Debug)]
pub struct Config {
	pub server_secret: ServerSecret,
	/// Upper bound on blobs re-encrypted in parallel during a key rotation.
	pub rotation_workers: usize,
	/// URL prefix managed images are served from.
	pub upload_prefix: String,
	/// Where the diary itself is served (such as `https://diary.example`), if absolute image
	/// URLs pointing there should count as managed.
	pub public_origin: Option<String>,
}

impl Config {
	/// Load from the process environment.
	///
	/// # Errors
	///
	/// Returns [`Error::Config`] if `ENCRYPTION_SECRET` is missing or unusable, or if any
	/// optional setting doesn't parse.
	pub fn from_env() -> Result<Self, Error> {
		Self::from_lookup(|var| std::env::var(var).ok())
	}

	/// Load from an arbitrary variable lookup.
	///
	/// # Errors
	///
	/// As for [`Config::from_env`].
	#[tracing::instrument(level = "debug", skip(lookup))]
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
		let server_secret = lookup(SECRET_VAR)
			.ok_or_else(|| Error::config(format!("{SECRET_VAR} is not set")))
			.and_then(ServerSecret::new)?;

		let rotation_workers = match lookup(WORKERS_VAR) {
			Some(v) => match v.trim().parse::<usize>() {
				Ok(n) if n > 0 => n,
				_ => {
					return Err(Error::config(format!(
						"{WORKERS_VAR} must be a positive integer, got {v:?}"
					)));
				}
			},
			None => DEFAULT_ROTATION_WORKERS,
		};

		let upload_prefix = lookup(UPLOAD_PREFIX_VAR)
			.filter(|p| !p.trim().is_empty())
			.unwrap_or_else(|| DEFAULT_UPLOAD_PREFIX.to_string());

		let public_origin = lookup(PUBLIC_ORIGIN_VAR).filter(|o| !o.trim().is_empty());

		tracing::debug!(
			rotation_workers,
			%upload_prefix,
			?public_origin,
			"Configuration loaded"
		);

		Ok(Self {
			server_secret,
			rotation_workers,
			upload_prefix,
			public_origin,
		})
	}

	/// The image scanner matching these settings.
	///
	/// # Errors
	///
	/// Returns [`Error::Config`] if the upload prefix isn't usable.
	pub fn image_scanner(&self) -> Result<RegexImageScanner, Error> {
		let scanner = RegexImageScanner::new(self.upload_prefix.as_str())?;

		Ok(match &self.public_origin {
			Some(origin) => scanner.with_origin(origin.as_str()),
			None => scanner,
		})
	}
}

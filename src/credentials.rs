//! Password generation and the one-shot credential hand-off.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, SinkError};
use crate::identity::{Identifier, TierMap};

pub const DEFAULT_PASSWORD_LENGTH: usize = 32;

const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const SPECIAL: &str = "!#$%^&*()-_=+[]{}|;:,.<>?~`";

/// Character-set policy for generated passwords
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// `None` or `Some(0)` means [`DEFAULT_PASSWORD_LENGTH`]
    pub length: Option<usize>,
    pub use_letters: bool,
    pub use_digits: bool,
    pub use_special: bool,
    /// Characters stripped from the union of the requested classes
    pub exclude: String,
}

impl PasswordConfig {
    pub fn effective_length(&self) -> usize {
        self.length.filter(|&n| n > 0).unwrap_or(DEFAULT_PASSWORD_LENGTH)
    }

    /// Union of the requested classes minus exclusions, or letters+digits when that is empty
    pub fn charset(&self) -> Vec<char> {
        let mut classes = String::new();
        if self.use_letters {
            classes.push_str(LETTERS);
        }
        if self.use_digits {
            classes.push_str(DIGITS);
        }
        if self.use_special {
            classes.push_str(SPECIAL);
        }

        let charset: Vec<char> = classes.chars().filter(|c| !self.exclude.contains(*c)).collect();

        if charset.is_empty() {
            return LETTERS.chars().chain(DIGITS.chars()).collect();
        }
        charset
    }
}

/// Generate a password from the OS entropy source.
///
/// Each character is an independent uniform draw over the charset. `Uniform` uses
/// rejection sampling, so there is no modulo bias for non-power-of-two sizes.
pub fn generate_password(config: &PasswordConfig) -> Result<String, ProvisionError> {
    let charset = config.charset();
    let mut rng = StdRng::from_rng(OsRng)?;
    let index = Uniform::from(0..charset.len());

    Ok((0..config.effective_length())
        .map(|_| charset[index.sample(&mut rng)])
        .collect())
}

/// Login credentials of one freshly created role
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn issue(username: &Identifier, config: &PasswordConfig) -> Result<Self, ProvisionError> {
        Ok(Self {
            username: username.to_string(),
            password: generate_password(config)?,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One credential per tier; `None` (`null` in JSON) where the login role could not be recreated
pub type TenantCredentialSet = TierMap<Option<Credential>>;

/// Receives the credential set exactly once per schema provisioning run
pub trait CredentialSink: Send + Sync {
    fn emit(&self, credentials: &TenantCredentialSet) -> Result<(), SinkError>;
}

/// Writes the credential set as JSON to a file readable only by its owner
#[derive(Debug, Clone)]
pub struct FileCredentialSink {
    path: PathBuf,
}

impl FileCredentialSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSink for FileCredentialSink {
    fn emit(&self, credentials: &TenantCredentialSet) -> Result<(), SinkError> {
        let data = serde_json::to_vec(credentials)?;

        let mut file = owner_only(OpenOptions::new().write(true).create(true).truncate(true))
            .open(&self.path)?;
        restrict_permissions(&self.path)?;
        file.write_all(&data)?;
        file.flush()?;

        tracing::info!("Wrote tenant credentials to {}", self.path.display());
        Ok(())
    }
}

/// Open options that create files with mode 0600
pub(crate) fn owner_only(options: &mut OpenOptions) -> &mut OpenOptions {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

/// An existing file keeps its mode on open, so tighten it explicitly
pub(crate) fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

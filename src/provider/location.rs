//! URL backed master secret provider.
//!
//! The secret is the whole content of the file behind a `file:` URL, minus
//! a trailing line break. Plain filesystem paths are accepted as locations
//! and turned into `file:` URLs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use super::{MasterSecretProvider, ProviderError};
use crate::secret::SecretValue;

/// Master secret kept in a file addressed by URL.
#[derive(Debug, Clone)]
pub struct UrlSecretProvider {
    name: String,
    location: Url,
    path: PathBuf,
    read_only: bool,
}

impl UrlSecretProvider {
    pub fn new(name: impl Into<String>, location: &str, read_only: bool) -> Result<Self, ProviderError> {
        let name = name.into();
        let url = parse_location(&name, location)?;
        if url.scheme() != "file" {
            return Err(ProviderError::UnsupportedScheme(url.scheme().to_string()));
        }
        let path = url.to_file_path().map_err(|()| ProviderError::InvalidConfig {
            name: name.clone(),
            reason: format!("'{url}' does not name a local file"),
        })?;

        Ok(Self {
            name,
            location: url,
            path,
            read_only,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> ProviderError {
        ProviderError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl MasterSecretProvider for UrlSecretProvider {
    fn read(&self) -> Result<SecretValue, ProviderError> {
        let mut content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let trimmed = content.trim_end_matches(['\r', '\n']).len();
        content.truncate(trimmed);

        if content.is_empty() {
            return Err(ProviderError::Empty(self.location.to_string()));
        }
        debug!(provider = %self.name, "Read master secret from location");
        Ok(SecretValue::new(content))
    }

    fn write(&self, secret: &SecretValue) -> Result<(), ProviderError> {
        if self.read_only {
            return Err(ProviderError::ReadOnly {
                name: self.name.clone(),
            });
        }
        write_private(&self.path, secret.as_bytes()).map_err(|e| self.io_error(e))?;
        info!(provider = %self.name, location = %self.location, "Wrote master secret to location");
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// `file:` URL string for a filesystem path.
pub fn file_location(path: &Path) -> Result<String, ProviderError> {
    let absolute = absolutize(path).map_err(|source| ProviderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|()| ProviderError::InvalidConfig {
            name: absolute.display().to_string(),
            reason: "path cannot be expressed as a file URL".to_string(),
        })
}

fn parse_location(name: &str, location: &str) -> Result<Url, ProviderError> {
    match Url::parse(location) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let location = file_location(Path::new(location))?;
            Url::parse(&location).map_err(|source| ProviderError::InvalidLocation { location, source })
        }
        Err(source) => Err(ProviderError::InvalidLocation {
            location: format!("{location} (provider {name})"),
            source,
        }),
    }
}

fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Replace the file in one step, readable by the owner only on unix.
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, path)
}

//! Storage for uploaded candidate images and scorecards.

use std::path::PathBuf;

use data_encoding::HEXLOWER;
use rand::Rng;
use rocket::{
    fairing::{Fairing, Info, Kind},
    fs::{FileServer, TempFile},
    http::ContentType,
    tokio::fs,
    Build, Rocket,
};
use serde::Deserialize;

use crate::error::{Error, Result};

/// URL prefix uploaded files are served under.
pub const UPLOADS_BASE: &str = "/uploads";

/// What an upload is for; decides which file types are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// A profile photo: PNG, JPEG or WEBP.
    Image,
    /// A marks scorecard: an image, or a PDF.
    Scorecard,
}

impl UploadKind {
    /// The file extension to store an upload of this content type under, or a
    /// validation error if the type is not accepted.
    pub fn extension_for(self, content_type: Option<&ContentType>) -> Result<&'static str> {
        let content_type = content_type.ok_or_else(|| {
            Error::Validation(format!("{} has no content type", self.field()))
        })?;
        if *content_type == ContentType::PNG {
            Ok("png")
        } else if *content_type == ContentType::JPEG {
            Ok("jpg")
        } else if *content_type == ContentType::WEBP {
            Ok("webp")
        } else if self == Self::Scorecard && *content_type == ContentType::PDF {
            Ok("pdf")
        } else {
            Err(Error::Validation(format!(
                "{} may not be of type {content_type}",
                self.field()
            )))
        }
    }

    fn field(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Scorecard => "scorecard",
        }
    }
}

/// Configuration for upload storage.
#[derive(Deserialize)]
struct StorageConfig {
    upload_dir: PathBuf,
}

/// Keeps uploads on the local filesystem under random names.
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Validate and store an upload, returning the URL it is served at.
    pub async fn save(&self, file: &mut TempFile<'_>, kind: UploadKind) -> Result<String> {
        if file.len() == 0 {
            return Err(Error::Validation(format!("{} is empty", kind.field())));
        }
        let extension = kind.extension_for(file.content_type())?;
        let name = format!("{}.{extension}", random_name());
        file.copy_to(self.dir.join(&name)).await?;
        debug!("Stored {} as {name}", kind.field());
        Ok(format!("{UPLOADS_BASE}/{name}"))
    }

    /// Delete a stored upload by the URL [`ImageStore::save`] returned.
    /// References that do not name a file in the store are ignored.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let Some(name) = file_name(reference) else {
            warn!("Ignoring removal of foreign upload reference '{reference}'");
            return Ok(());
        };
        match fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 16 random bytes, hex-encoded.
fn random_name() -> String {
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// The stored file name inside an upload URL, if it is one of ours.
fn file_name(reference: &str) -> Option<&str> {
    let name = reference
        .strip_prefix(UPLOADS_BASE)?
        .strip_prefix('/')?;
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.');
    valid.then_some(name)
}

/// A fairing that prepares the upload directory, places an [`ImageStore`]
/// into managed state, and serves the uploads.
pub struct StorageFairing;

#[rocket::async_trait]
impl Fairing for StorageFairing {
    fn info(&self) -> Info {
        Info {
            name: "Upload storage",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StorageConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load storage config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let dir = get_upload_dir(config.upload_dir);
        if let Err(e) = fs::create_dir_all(&dir).await {
            error!("Failed to create upload directory {}: {e}", dir.display());
            return Err(rocket);
        }
        info!("Storing uploads in {}", dir.display());

        // Manage the state.
        rocket = rocket
            .mount(UPLOADS_BASE, FileServer::from(&dir))
            .manage(ImageStore::new(dir));
        Ok(rocket)
    }
}

/// Get the upload directory to use (production version).
#[cfg(not(test))]
fn get_upload_dir(configured: PathBuf) -> PathBuf {
    configured
}

/// Get the upload directory to use (test version).
/// Use a random directory to avoid collisions between tests.
#[cfg(test)]
fn get_upload_dir(_configured: PathBuf) -> PathBuf {
    std::env::temp_dir().join(format!("uploads-{}", random_name()))
}

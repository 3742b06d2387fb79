//! Image references passed between the UI and the generative backend.
//!
//! Images travel as `data:<mime>;base64,<payload>` URIs and are never
//! re-encoded on the way through; the backend receives exactly what the
//! user attached and the conversation stores exactly what the backend sent.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageRefError {
    #[error("not a base64 data URI")]
    NotDataUri,
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("invalid base64 payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// An opaque image handle in data-URI form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn from_data_uri(uri: impl Into<String>) -> Result<Self, ImageRefError> {
        let uri = uri.into();
        let (mime, _) = split_data_uri(&uri).ok_or(ImageRefError::NotDataUri)?;
        if !mime.starts_with("image/") {
            return Err(ImageRefError::UnsupportedType(mime.to_string()));
        }
        Ok(Self(uri))
    }

    /// Wrap an already base64-encoded payload (as returned by the API)
    pub fn from_base64(mime_type: &str, payload: &str) -> Result<Self, ImageRefError> {
        Self::from_data_uri(format!("data:{};base64,{}", mime_type, payload.trim()))
    }

    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Result<Self, ImageRefError> {
        Self::from_base64(mime_type, &BASE64.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn mime_type(&self) -> &str {
        split_data_uri(&self.0).map(|(mime, _)| mime).unwrap_or_default()
    }

    /// The base64 payload without the `data:` header
    pub fn payload(&self) -> &str {
        split_data_uri(&self.0).map(|(_, data)| data).unwrap_or_default()
    }

    pub fn decode(&self) -> Result<Vec<u8>, ImageRefError> {
        Ok(BASE64.decode(self.payload().as_bytes())?)
    }

    /// Decoded size in bytes, estimated from the payload length
    pub fn approx_size(&self) -> usize {
        let payload = self.payload();
        let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
        (payload.len() / 4 * 3).saturating_sub(padding)
    }

    /// Write the decoded image as `<stem>.<ext>` inside `dir`
    pub fn save_to(&self, dir: &Path, stem: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("could not create {}", dir.display()))?;
        let path = dir.join(format!("{}.{}", stem, extension_for_mime(self.mime_type())));
        let bytes = self.decode()?;
        fs::write(&path, bytes).with_context(|| format!("could not write {}", path.display()))?;
        Ok(path)
    }
}

fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    uri.strip_prefix("data:")?.split_once(";base64,")
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        "image/heif" => "heif",
        _ => "png",
    }
}

/// An image the user has attached to the next message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub image: ImageRef,
    pub mime_type: String,
    pub file_name: String,
}

impl Attachment {
    pub fn from_path(path: &Path) -> Result<Self> {
        let mime_type = mime_for_path(path)
            .ok_or_else(|| anyhow!("{} is not a supported image file", path.display()))?;
        let bytes = fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            image: ImageRef::from_bytes(mime_type, &bytes)?,
            mime_type: mime_type.to_string(),
            file_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_parts() {
        let image = ImageRef::from_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.payload(), "aGVsbG8=");
        assert_eq!(image.decode().unwrap(), b"hello");
        assert_eq!(image.approx_size(), 5);
    }

    #[test]
    fn test_rejects_non_image_uris() {
        assert!(matches!(
            ImageRef::from_data_uri("https://example.com/cat.png"),
            Err(ImageRefError::NotDataUri)
        ));
        assert!(matches!(
            ImageRef::from_data_uri("data:text/plain;base64,aGk="),
            Err(ImageRefError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("cat.PNG")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("a/b/photo.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_attachment_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.jpg");
        fs::write(&path, [0xff, 0xd8, 0xff]).unwrap();

        let attachment = Attachment::from_path(&path).unwrap();
        assert_eq!(attachment.mime_type, "image/jpeg");
        assert_eq!(attachment.file_name, "cube.jpg");
        assert_eq!(attachment.image.decode().unwrap(), vec![0xff, 0xd8, 0xff]);
    }

    #[test]
    fn test_attachment_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "hi").unwrap();
        assert!(Attachment::from_path(&path).is_err());
    }

    #[test]
    fn test_save_to_uses_mime_extension() {
        let dir = tempfile::tempdir().unwrap();
        let image = ImageRef::from_bytes("image/webp", b"RIFF").unwrap();
        let path = image.save_to(dir.path(), "jahid-7").unwrap();
        assert_eq!(path.file_name().unwrap(), "jahid-7.webp");
        assert_eq!(fs::read(path).unwrap(), b"RIFF");
    }
}

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::ImageReader;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_image_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => lowered,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match normalize_image_mime_type(mime_type).as_str() {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/heic" | "image/heif" => "heic",
        _ => "png",
    }
}

/// An encoded image together with its MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: normalize_image_mime_type(&mime_type.into()),
            data,
        }
    }

    /// Builds a payload from raw bytes, sniffing the MIME type and falling
    /// back to JPEG like the upload form does.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mime_type = detect_mime_type(&data).unwrap_or_else(|| "image/jpeg".to_string());
        Self::new(mime_type, data)
    }

    pub fn from_base64(mime_type: &str, encoded: &str) -> Result<Self, base64::DecodeError> {
        let data = general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self::new(mime_type, data))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.data)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Pixel dimensions read from the image header, if the format is known.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        ImageReader::new(Cursor::new(&self.data))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

pub async fn load_image_file(path: &Path) -> Result<ImagePayload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    if data.is_empty() {
        return Err(anyhow!("Image file {} is empty", path.display()));
    }
    let payload = ImagePayload::from_bytes(data);
    if !payload.mime_type.starts_with("image/") {
        return Err(anyhow!(
            "File {} is not an image (detected {})",
            path.display(),
            payload.mime_type
        ));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    #[test]
    fn data_uri_embeds_mime_and_base64() {
        let payload = ImagePayload::new("image/jpg", vec![1, 2, 3]);
        assert_eq!(payload.mime_type, "image/jpeg");
        assert_eq!(payload.to_data_uri(), "data:image/jpeg;base64,AQID");
    }

    #[test]
    fn sniffs_png_bytes_and_reads_dimensions() {
        let payload = ImagePayload::from_bytes(sample_png(9, 16));
        assert_eq!(payload.mime_type, "image/png");
        assert_eq!(payload.dimensions(), Some((9, 16)));
    }

    #[test]
    fn unknown_bytes_fall_back_to_jpeg_without_dimensions() {
        let payload = ImagePayload::from_bytes(vec![0, 1, 2, 3]);
        assert_eq!(payload.mime_type, "image/jpeg");
        assert_eq!(payload.dimensions(), None);
    }

    #[test]
    fn base64_decoding_round_trips_inline_data() {
        let payload = ImagePayload::from_base64("image/png", " AQID ").unwrap();
        assert_eq!(payload.data, vec![1, 2, 3]);
        assert!(ImagePayload::from_base64("image/png", "***").is_err());
    }

    #[test]
    fn extensions_follow_mime_type() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("IMAGE/WEBP"), "webp");
        assert_eq!(extension_for_mime("image/png"), "png");
    }

    #[tokio::test]
    async fn rejects_missing_and_non_image_files() {
        let dir = std::env::temp_dir().join(format!("affiliate-media-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        assert!(load_image_file(&dir.join("missing.png")).await.is_err());

        let text_path = dir.join("notes.pdf");
        tokio::fs::write(&text_path, b"%PDF-1.4 not an image").await.unwrap();
        assert!(load_image_file(&text_path).await.is_err());

        let png_path = dir.join("person.png");
        tokio::fs::write(&png_path, sample_png(4, 4)).await.unwrap();
        let payload = load_image_file(&png_path).await.unwrap();
        assert_eq!(payload.mime_type, "image/png");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}

//! Upload pre-processing: shrink photos before they are sent to the vision model.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ImageConfig;
use crate::error::{HomeFixError, HomeFixResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageProcessingResult {
    pub processed_path: PathBuf,
    pub original_size: u64,
    pub processed_size: u64,
    pub width: u32,
    pub height: u32,
}

impl ImageProcessingResult {
    /// Percentage saved, negative when re-encoding grew the file
    pub fn reduction_percent(&self) -> i64 {
        if self.original_size == 0 {
            return 0;
        }
        let ratio = self.processed_size as f64 / self.original_size as f64;
        ((1.0 - ratio) * 100.0).round() as i64
    }
}

/// Fit `width` x `height` inside the bounds keeping the aspect ratio. Never enlarges.
pub fn target_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return (width, height);
    }

    let aspect = width as f64 / height as f64;
    if aspect > max_width as f64 / max_height as f64 {
        let h = (max_width as f64 / aspect).round().max(1.0) as u32;
        (max_width, h)
    } else {
        let w = (max_height as f64 * aspect).round().max(1.0) as u32;
        (w, max_height)
    }
}

/// `<dir>/<stem>_processed.jpg`, next to the original unless `out_dir` is given
pub fn processed_path_for(original: &Path, out_dir: Option<&Path>) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let dir = out_dir
        .map(Path::to_path_buf)
        .or_else(|| original.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{}_processed.jpg", stem))
}

fn process_blocking(original: &Path, output: &Path, config: &ImageConfig) -> HomeFixResult<ImageProcessingResult> {
    let original_size = std::fs::metadata(original)
        .map_err(|_| HomeFixError::FileSystem { path: original.display().to_string() })?
        .len();

    let decoded = image::open(original)
        .map_err(|e| HomeFixError::image(format!("Failed to decode {}: {}", original.display(), e)))?;

    let (width, height) = target_dimensions(decoded.width(), decoded.height(), config.max_width, config.max_height);
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Lanczos3)
    };

    let file = File::create(output).map_err(|_| HomeFixError::FileSystem { path: output.display().to_string() })?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, config.jpeg_quality)
        .encode_image(&resized.to_rgb8())
        .map_err(|e| HomeFixError::image(format!("Failed to encode JPEG: {}", e)))?;
    writer
        .flush()
        .map_err(|_| HomeFixError::FileSystem { path: output.display().to_string() })?;

    let processed_size = std::fs::metadata(output)
        .map_err(|_| HomeFixError::FileSystem { path: output.display().to_string() })?
        .len();

    Ok(ImageProcessingResult {
        processed_path: output.to_path_buf(),
        original_size,
        processed_size,
        width,
        height,
    })
}

/// Resize and re-encode an upload as JPEG for the vision model
pub async fn process_image_for_vision(
    original: &Path,
    out_dir: Option<&Path>,
    config: &ImageConfig,
) -> HomeFixResult<ImageProcessingResult> {
    let output = processed_path_for(original, out_dir);
    let original = original.to_path_buf();
    let config = config.clone();

    let result = tokio::task::spawn_blocking(move || process_blocking(&original, &output, &config))
        .await
        .map_err(|e| HomeFixError::internal(format!("Image task failed: {}", e)))??;

    info!(
        "Image processed: {} bytes -> {} bytes ({}% reduction), {}x{}",
        result.original_size,
        result.processed_size,
        result.reduction_percent(),
        result.width,
        result.height
    );
    Ok(result)
}

/// Remove a processed copy. Failures are only logged.
pub async fn cleanup_processed_image(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to clean up processed image {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, Rgb([200, 120, 40])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(800, 600, 1920, 1080), (800, 600));
        assert_eq!(target_dimensions(3840, 2160, 1920, 1080), (1920, 1080));
        assert_eq!(target_dimensions(4000, 1000, 1920, 1080), (1920, 480));
        assert_eq!(target_dimensions(1000, 3000, 1920, 1080), (360, 1080));
    }

    #[test]
    fn test_processed_path() {
        let path = processed_path_for(Path::new("/tmp/uploads/photo.png"), None);
        assert_eq!(path, PathBuf::from("/tmp/uploads/photo_processed.jpg"));

        let path = processed_path_for(Path::new("/tmp/uploads/photo.png"), Some(Path::new("/out")));
        assert_eq!(path, PathBuf::from("/out/photo_processed.jpg"));
    }

    #[tokio::test]
    async fn test_large_image_is_downscaled() {
        let dir = tempfile::tempdir().unwrap();
        let original = write_png(dir.path(), "wall.png", 2400, 1200);
        let config = AppConfig::default().images;

        let result = process_image_for_vision(&original, None, &config).await.unwrap();
        assert_eq!((result.width, result.height), (1920, 960));
        assert!(result.processed_path.exists());
        assert_eq!(image::image_dimensions(&result.processed_path).unwrap(), (1920, 960));

        cleanup_processed_image(&result.processed_path).await;
        assert!(!result.processed_path.exists());
    }

    #[tokio::test]
    async fn test_small_image_keeps_size() {
        let dir = tempfile::tempdir().unwrap();
        let original = write_png(dir.path(), "leak.png", 64, 48);

        let result = process_image_for_vision(&original, None, &AppConfig::default().images)
            .await
            .unwrap();
        assert_eq!((result.width, result.height), (64, 48));
    }

    #[tokio::test]
    async fn test_non_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.png");
        std::fs::write(&path, b"not an image").unwrap();

        let err = process_image_for_vision(&path, None, &AppConfig::default().images)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "image");
    }

    #[tokio::test]
    async fn test_cleanup_missing_file_is_quiet() {
        cleanup_processed_image(Path::new("/nonexistent/never_processed.jpg")).await;
    }
}

//! Raster image operations with the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, WebP) | `image` crate, format guessed from content |
//! | Resize | `DynamicImage::resize_to_fill` with `Lanczos3` |
//! | Encode | format inferred from the target extension |
//! | Optimize PNG | `PngEncoder` with best compression, adaptive filtering |
//! | Optimize JPEG | `JpegEncoder` at quality 85 |

use super::{ImageTool, ToolError};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;

const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, Default)]
pub struct RasterImageTool;

fn load_image(path: &Path) -> Result<DynamicImage, ToolError> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Option<Vec<u8>>, ToolError> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            // JPEG has no alpha channel.
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        }
        _ => return Ok(None),
    }
    Ok(Some(out.into_inner()))
}

impl ImageTool for RasterImageTool {
    fn resize(
        &self,
        source: &Path,
        target: &Path,
        width: u32,
        height: u32,
    ) -> Result<(), ToolError> {
        let img = load_image(source)?;
        let resized = img.resize_to_fill(width, height, FilterType::Lanczos3);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let resized = match ImageFormat::from_path(target) {
            Ok(ImageFormat::Jpeg) => DynamicImage::ImageRgb8(resized.to_rgb8()),
            _ => resized,
        };
        resized.save(target)?;
        Ok(())
    }

    fn optimize(&self, path: &Path) -> Result<Option<Vec<u8>>, ToolError> {
        let original = std::fs::read(path)?;
        let Ok(format) = image::guess_format(&original) else {
            return Ok(None);
        };
        let img = image::load_from_memory_with_format(&original, format)?;
        Ok(encode(&img, format)?.filter(|bytes| bytes.len() < original.len()))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use image::{ImageEncoder, RgbImage};
    use std::sync::Mutex;

    /// Image tool that records operations instead of decoding anything.
    /// `resize` writes a small marker file so existence checks see the output.
    #[derive(Default)]
    pub struct MockImageTool {
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Resize {
            source: String,
            target: String,
            width: u32,
            height: u32,
        },
        Optimize(String),
    }

    impl MockImageTool {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl ImageTool for MockImageTool {
        fn resize(
            &self,
            source: &Path,
            target: &Path,
            width: u32,
            height: u32,
        ) -> Result<(), ToolError> {
            self.operations.lock().unwrap().push(RecordedOp::Resize {
                source: source.to_string_lossy().to_string(),
                target: target.to_string_lossy().to_string(),
                width,
                height,
            });
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, format!("{width}x{height}"))?;
            Ok(())
        }

        fn optimize(&self, path: &Path) -> Result<Option<Vec<u8>>, ToolError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Optimize(path.to_string_lossy().to_string()));
            Ok(None)
        }
    }

    /// Create a small valid PNG file with the given dimensions.
    pub fn create_test_png(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let file = std::fs::File::create(path).unwrap();
        let writer = std::io::BufWriter::new(file);
        image::codecs::png::PngEncoder::new_with_quality(
            writer,
            CompressionType::Fast,
            PngFilter::NoFilter,
        )
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    }

    #[test]
    fn resize_produces_exact_dimensions() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("icon.png");
        create_test_png(&source, 64, 48);

        let target = tmp.path().join("out/icon-32x32.png");
        RasterImageTool.resize(&source, &target, 32, 32).unwrap();

        assert_eq!(image::image_dimensions(&target).unwrap(), (32, 32));
    }

    #[test]
    fn resize_to_jpeg_target() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("icon.png");
        create_test_png(&source, 20, 20);

        let target = tmp.path().join("tile.jpg");
        RasterImageTool.resize(&source, &target, 10, 5).unwrap();
        assert_eq!(image::image_dimensions(&target).unwrap(), (10, 5));
    }

    #[test]
    fn resize_nonexistent_source_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = RasterImageTool.resize(
            &tmp.path().join("missing.png"),
            &tmp.path().join("out.png"),
            10,
            10,
        );
        assert!(result.is_err());
    }

    #[test]
    fn optimize_keeps_only_smaller_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("big.png");
        create_test_png(&path, 128, 128);
        let before = std::fs::metadata(&path).unwrap().len() as usize;

        if let Some(bytes) = RasterImageTool.optimize(&path).unwrap() {
            assert!(bytes.len() < before);
            assert!(image::load_from_memory(&bytes).is_ok());
        }
    }

    #[test]
    fn optimize_ignores_non_images() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.png");
        std::fs::write(&path, "not an image").unwrap();
        assert_eq!(RasterImageTool.optimize(&path).unwrap(), None);
    }

    #[test]
    fn mock_records_operations() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mock = MockImageTool::new();
        let target = tmp.path().join("a/b.png");
        mock.resize(Path::new("src.png"), &target, 4, 2).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "4x2");
        assert_eq!(
            mock.get_operations(),
            vec![RecordedOp::Resize {
                source: "src.png".into(),
                target: target.to_string_lossy().to_string(),
                width: 4,
                height: 2,
            }]
        );
    }
}

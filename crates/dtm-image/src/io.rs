use std::path::Path;

use image::{imageops::FilterType, GrayImage};
use serde::{Deserialize, Serialize};

use crate::error::ImageError;
use crate::grid::{ImageSize, IntensityGrid};

/// Controls how decoded images are turned into intensity grids.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// The size every intensity grid must have.
    pub size: ImageSize,
    /// Resample images of another size to `size` instead of rejecting them.
    pub resize: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            size: ImageSize::default(),
            resize: true,
        }
    }
}

/// Reads an image file into a normalized intensity grid.
///
/// The method decodes any format supported by the image crate, converts it to
/// 8-bit luma and scales it to `[0, 1]`.
///
/// # Arguments
///
/// * `file_path` - The path to a valid image file.
/// * `config` - The target size and resize policy.
///
/// # Returns
///
/// A grid of the configured size.
///
/// # Errors
///
/// * [`ImageError::FileDoesNotExist`] if the path does not exist.
/// * [`ImageError::Decode`] if the file is not a decodable image.
/// * [`ImageError::ShapeMismatch`] if resizing is disabled and the size differs.
pub fn read_intensity_grid(
    file_path: impl AsRef<Path>,
    config: &LoaderConfig,
) -> Result<IntensityGrid, ImageError> {
    let file_path = file_path.as_ref().to_owned();

    // verify the file exists
    if !file_path.exists() {
        return Err(ImageError::FileDoesNotExist(file_path));
    }

    let bytes = std::fs::read(&file_path)?;
    log::debug!("Read {} bytes from {}", bytes.len(), file_path.display());

    decode_intensity_grid(&bytes, config)
}

/// Decodes in-memory image bytes into a normalized intensity grid.
///
/// See [`read_intensity_grid`] for the semantics.
pub fn decode_intensity_grid(
    bytes: &[u8],
    config: &LoaderConfig,
) -> Result<IntensityGrid, ImageError> {
    let img = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;

    gray_to_intensity_grid(img.into_luma8(), config)
}

/// Converts an 8-bit grayscale image into an intensity grid of the configured size.
pub fn gray_to_intensity_grid(
    gray: GrayImage,
    config: &LoaderConfig,
) -> Result<IntensityGrid, ImageError> {
    let actual = ImageSize {
        width: gray.width() as usize,
        height: gray.height() as usize,
    };

    let gray = if actual == config.size {
        gray
    } else if config.resize {
        log::debug!("Resizing image from {} to {}", actual, config.size);
        let [width, height]: [u32; 2] = config.size.into();
        image::imageops::resize(&gray, width, height, FilterType::Triangle)
    } else {
        return Err(ImageError::ShapeMismatch {
            expected: config.size,
            actual,
        });
    };

    let data = gray
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect::<Vec<_>>();

    IntensityGrid::new(config.size, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    fn write_gray_png(dir: &Path, name: &str, width: u32, height: u32, val: u8) -> std::path::PathBuf {
        let path = dir.join(name);
        let img = GrayImage::from_pixel(width, height, Luma([val]));
        img.save(&path).expect("write test image");
        path
    }

    #[test]
    fn read_gray_png() -> Result<(), ImageError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = write_gray_png(tmp_dir.path(), "flat.png", 16, 8, 255);

        let config = LoaderConfig {
            size: [16, 8].into(),
            resize: false,
        };
        let grid = read_intensity_grid(&path, &config)?;
        assert_eq!(grid.width(), 16);
        assert_eq!(grid.height(), 8);
        assert!(grid.as_slice().iter().all(|&v| v == 1.0));
        Ok(())
    }

    #[test]
    fn read_resizes_to_target() -> Result<(), ImageError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = write_gray_png(tmp_dir.path(), "small.png", 20, 10, 128);

        let grid = read_intensity_grid(&path, &LoaderConfig::default())?;
        assert_eq!(grid.size(), ImageSize { width: 512, height: 512 });
        for &v in grid.as_slice() {
            assert_relative_eq!(v, 128.0 / 255.0, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn read_rejects_other_size_without_resize() -> Result<(), ImageError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = write_gray_png(tmp_dir.path(), "odd.png", 300, 200, 10);

        let config = LoaderConfig {
            resize: false,
            ..Default::default()
        };
        let res = read_intensity_grid(&path, &config);
        assert!(matches!(res, Err(ImageError::ShapeMismatch { .. })));
        Ok(())
    }

    #[test]
    fn read_rgb_as_luma() -> Result<(), ImageError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("rgb.png");
        image::RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255]))
            .save(&path)
            .expect("write test image");

        let config = LoaderConfig {
            size: [4, 4].into(),
            resize: false,
        };
        let grid = read_intensity_grid(&path, &config)?;
        assert!(grid.as_slice().iter().all(|&v| v == 1.0));
        Ok(())
    }

    #[test]
    fn read_missing_file() {
        let res = read_intensity_grid("does/not/exist.png", &LoaderConfig::default());
        assert!(matches!(res, Err(ImageError::FileDoesNotExist(_))));
    }

    #[test]
    fn decode_garbage() {
        let res = decode_intensity_grid(b"definitely not an image", &LoaderConfig::default());
        assert!(matches!(res, Err(ImageError::Decode(_))));
    }
}

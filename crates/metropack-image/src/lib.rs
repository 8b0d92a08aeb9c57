//! Image dimension probing for asset metadata.
//!
//! Only the header is read; decode failures and unrecognized formats
//! degrade to `(0, 0)` rather than failing the build — dimensions are a
//! nicety for layout, not a correctness requirement.

use std::path::Path;

use metropack_core::transformer::{ImageDimensions, ImageProber};
use tracing::debug;

pub struct ImageSizeProber;

impl ImageProber for ImageSizeProber {
    fn probe(&self, path: &Path) -> ImageDimensions {
        match image::image_dimensions(path) {
            Ok((width, height)) => ImageDimensions { width, height },
            Err(error) => {
                debug!(path = %path.display(), %error, "unable to probe image dimensions");
                ImageDimensions::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // a complete 1×1 transparent PNG
    const ONE_BY_ONE_PNG: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
        0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78,
        0x9c, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00,
        0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn png_dimensions_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.png");
        std::fs::write(&path, ONE_BY_ONE_PNG).unwrap();
        let dims = ImageSizeProber.probe(&path);
        assert_eq!((dims.width, dims.height), (1, 1));
    }

    #[test]
    fn unknown_formats_report_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strange.png");
        std::fs::write(&path, b"definitely not an image").unwrap();
        let dims = ImageSizeProber.probe(&path);
        assert_eq!((dims.width, dims.height), (0, 0));
    }

    #[test]
    fn missing_files_report_zeros() {
        let dims = ImageSizeProber.probe(Path::new("/does/not/exist.png"));
        assert_eq!((dims.width, dims.height), (0, 0));
    }
}

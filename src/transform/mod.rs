//! Image operations behind the [`ImageBackend`] seam.
//!
//! Handlers only know operation names, typed [`ImageOptions`] and the
//! resulting bytes; the pixel work is owned by the backend.

mod backend;
pub mod options;

pub use backend::ImageCrateBackend;
pub use options::ImageOptions;

#[cfg(test)]
pub(crate) use backend::tests as backend_samples;

use image::ImageFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Resize,
    Fit,
    Enlarge,
    Extract,
    Crop,
    SmartCrop,
    Rotate,
    Flip,
    Flop,
    Thumbnail,
    Zoom,
    Convert,
    Watermark,
    WatermarkImage,
    Info,
    Blur,
    Pipeline,
}

impl Operation {
    pub const ALL: [Operation; 17] = [
        Operation::Resize,
        Operation::Fit,
        Operation::Enlarge,
        Operation::Extract,
        Operation::Crop,
        Operation::SmartCrop,
        Operation::Rotate,
        Operation::Flip,
        Operation::Flop,
        Operation::Thumbnail,
        Operation::Zoom,
        Operation::Convert,
        Operation::Watermark,
        Operation::WatermarkImage,
        Operation::Info,
        Operation::Blur,
        Operation::Pipeline,
    ];

    /// Route segment and pipeline name of the operation
    pub fn name(self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Fit => "fit",
            Operation::Enlarge => "enlarge",
            Operation::Extract => "extract",
            Operation::Crop => "crop",
            Operation::SmartCrop => "smartcrop",
            Operation::Rotate => "rotate",
            Operation::Flip => "flip",
            Operation::Flop => "flop",
            Operation::Thumbnail => "thumbnail",
            Operation::Zoom => "zoom",
            Operation::Convert => "convert",
            Operation::Watermark => "watermark",
            Operation::WatermarkImage => "watermarkimage",
            Operation::Info => "info",
            Operation::Blur => "blur",
            Operation::Pipeline => "pipeline",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

/// Output encodings the gateway can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Tiff,
    Bmp,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::Webp),
            "gif" => Some(OutputFormat::Gif),
            "tiff" => Some(OutputFormat::Tiff),
            "bmp" => Some(OutputFormat::Bmp),
            _ => None,
        }
    }

    /// Type name, also used as the file extension of derived artifacts
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Gif => "gif",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Bmp => "bmp",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Tiff => "image/tiff",
            OutputFormat::Bmp => "image/bmp",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Webp => ImageFormat::WebP,
            OutputFormat::Gif => ImageFormat::Gif,
            OutputFormat::Tiff => ImageFormat::Tiff,
            OutputFormat::Bmp => ImageFormat::Bmp,
        }
    }

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
            ImageFormat::Png => Some(OutputFormat::Png),
            ImageFormat::WebP => Some(OutputFormat::Webp),
            ImageFormat::Gif => Some(OutputFormat::Gif),
            ImageFormat::Tiff => Some(OutputFormat::Tiff),
            ImageFormat::Bmp => Some(OutputFormat::Bmp),
            _ => None,
        }
    }
}

/// Result of an operation; owned by the request that produced it
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub body: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("cannot encode image: {0}")]
    Encode(String),
    #[error("missing required param: {0}")]
    MissingParam(&'static str),
    #[error("invalid param {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },
    #[error("{0}")]
    Unsupported(String),
}

/// The image library seam
pub trait ImageBackend: Send + Sync {
    /// Short identifier reported on the index route
    fn name(&self) -> &'static str;

    /// Whether the backend can decode images of this mime type
    fn supports(&self, mime: &str) -> bool;

    fn process(
        &self,
        operation: Operation,
        buf: &[u8],
        options: &ImageOptions,
    ) -> Result<ProcessedImage, TransformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
        assert_eq!(Operation::from_name("explode"), None);
    }

    #[test]
    fn test_output_format_names() {
        assert_eq!(OutputFormat::from_name("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_name("webp"), Some(OutputFormat::Webp));
        assert_eq!(OutputFormat::from_name("auto"), None);
        assert_eq!(OutputFormat::from_name("svg"), None);
    }
}

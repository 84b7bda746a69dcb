//! [`ImageBackend`] implemented on the `image` crate.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::Serialize;

use super::options::{Colorspace, Gravity, PipelineStep, MAX_DIMENSION, MAX_PIXELS};
use super::{ImageBackend, ImageOptions, Operation, OutputFormat, ProcessedImage, TransformError};

const DEFAULT_QUALITY: u8 = 80;
const FILTER: FilterType = FilterType::Lanczos3;

const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/tiff",
    "image/bmp",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateBackend;

impl ImageBackend for ImageCrateBackend {
    fn name(&self) -> &'static str {
        "image-rs"
    }

    fn supports(&self, mime: &str) -> bool {
        SUPPORTED_MIME_TYPES.contains(&mime)
    }

    fn process(
        &self,
        operation: Operation,
        buf: &[u8],
        options: &ImageOptions,
    ) -> Result<ProcessedImage, TransformError> {
        let input_format =
            image::guess_format(buf).map_err(|e| TransformError::Decode(e.to_string()))?;
        let img = image::load_from_memory_with_format(buf, input_format)
            .map_err(|e| TransformError::Decode(e.to_string()))?;

        if operation == Operation::Info {
            return info(&img, input_format);
        }

        let mut output = options.output;
        let img = if operation == Operation::Pipeline {
            run_pipeline(img, &options.operations, &mut output)?
        } else {
            apply(operation, img, options)?
        };

        let format = output
            .or_else(|| OutputFormat::from_image_format(input_format))
            .unwrap_or(OutputFormat::Jpeg);

        Ok(ProcessedImage {
            body: encode(&img, format, options.quality)?,
            mime: format.mime().to_string(),
        })
    }
}

fn run_pipeline(
    mut img: DynamicImage,
    steps: &[PipelineStep],
    output: &mut Option<OutputFormat>,
) -> Result<DynamicImage, TransformError> {
    if steps.is_empty() {
        return Err(TransformError::MissingParam("operations"));
    }

    for step in steps {
        let step_output = step.options.explicit_output()?;
        match apply(step.operation, img.clone(), &step.options) {
            Ok(next) => {
                img = next;
                if step_output.is_some() {
                    *output = step_output;
                }
            }
            Err(err) if step.ignore_failure => {
                tracing::debug!(operation = step.operation.name(), error = %err, "Ignoring failed pipeline step");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(img)
}

fn apply(
    operation: Operation,
    img: DynamicImage,
    o: &ImageOptions,
) -> Result<DynamicImage, TransformError> {
    let img = match operation {
        Operation::Resize => match (o.width, o.height) {
            (None, None) => return Err(TransformError::MissingParam("width or height")),
            (Some(w), Some(h)) if o.force => {
                let (w, h) = check_dimensions(w, h)?;
                img.resize_exact(w, h, FILTER)
            }
            (Some(w), Some(h)) if o.no_crop => img.resize(w, h, FILTER),
            (Some(w), Some(h)) => fill(&img, w, h, o.gravity)?,
            (w, h) => {
                let (w, h) = keep_aspect(&img, w, h)?;
                img.resize_exact(w, h, FILTER)
            }
        },
        Operation::Fit => {
            let (w, h) = both(o)?;
            img.resize(w, h, FILTER)
        }
        Operation::Enlarge => {
            let (w, h) = both(o)?;
            if o.force {
                let (w, h) = check_dimensions(w, h)?;
                img.resize_exact(w, h, FILTER)
            } else {
                fill(&img, w, h, o.gravity)?
            }
        }
        Operation::Extract => extract_area(&img, o)?,
        Operation::Crop | Operation::SmartCrop => {
            if o.width.is_none() && o.height.is_none() {
                return Err(TransformError::MissingParam("width or height"));
            }
            let gravity = if operation == Operation::SmartCrop {
                Gravity::Smart
            } else {
                o.gravity
            };
            let (w, h) = (o.width.unwrap_or(img.width()), o.height.unwrap_or(img.height()));
            fill(&img, w, h, gravity)?
        }
        Operation::Rotate => match o.rotate {
            None => return Err(TransformError::MissingParam("rotate")),
            Some(90) => img.rotate90(),
            Some(180) => img.rotate180(),
            Some(270) => img.rotate270(),
            Some(_) => img,
        },
        Operation::Flip => img.flipv(),
        Operation::Flop => img.fliph(),
        Operation::Thumbnail => {
            if o.width.is_none() && o.height.is_none() {
                return Err(TransformError::MissingParam("width or height"));
            }
            let (w, h) = keep_aspect(&img, o.width, o.height)?;
            img.thumbnail(w, h)
        }
        Operation::Zoom => {
            let factor = o.factor.ok_or(TransformError::MissingParam("factor"))?;
            let area = if o.area_width.is_some() || o.area_height.is_some() {
                extract_area(&img, o)?
            } else {
                img
            };
            let (w, h) = (
                scaled(area.width(), factor)?,
                scaled(area.height(), factor)?,
            );
            let (w, h) = check_dimensions(w, h)?;
            area.resize_exact(w, h, FILTER)
        }
        Operation::Convert => {
            if o.type_name.is_none() {
                return Err(TransformError::MissingParam("type"));
            }
            img
        }
        Operation::Watermark => {
            if o.text.is_none() {
                return Err(TransformError::MissingParam("text"));
            }
            return Err(TransformError::Unsupported(
                "text watermarks are not supported by this image backend".to_string(),
            ));
        }
        Operation::WatermarkImage => {
            if o.image.is_none() {
                return Err(TransformError::MissingParam("image"));
            }
            return Err(TransformError::Unsupported(
                "image watermarks are not supported by this image backend".to_string(),
            ));
        }
        Operation::Blur => match o.sigma {
            Some(sigma) if sigma > 0.0 => img.blur(sigma),
            _ => return Err(TransformError::MissingParam("sigma")),
        },
        Operation::Info | Operation::Pipeline => {
            return Err(TransformError::Unsupported(format!(
                "{} cannot be chained",
                operation.name()
            )))
        }
    };

    Ok(match o.colorspace {
        Colorspace::BlackAndWhite => img.grayscale(),
        Colorspace::Srgb => img,
    })
}

fn both(o: &ImageOptions) -> Result<(u32, u32), TransformError> {
    match (o.width, o.height) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => Err(TransformError::MissingParam("width and height")),
    }
}

/// Fill in a missing dimension from the source aspect ratio.
fn keep_aspect(
    img: &DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(u32, u32), TransformError> {
    let (sw, sh) = (img.width() as f64, img.height() as f64);
    let (w, h) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, (sh * w as f64 / sw).round() as u32),
        (None, Some(h)) => ((sw * h as f64 / sh).round() as u32, h),
        (None, None) => (img.width(), img.height()),
    };
    check_dimensions(w.max(1), h.max(1))
}

fn scaled(side: u32, factor: u32) -> Result<u32, TransformError> {
    side.checked_mul(factor)
        .filter(|v| *v <= MAX_DIMENSION)
        .ok_or_else(|| TransformError::InvalidParam {
            name: "factor",
            reason: format!("zoomed size exceeds {MAX_DIMENSION}px"),
        })
}

fn check_dimensions(w: u32, h: u32) -> Result<(u32, u32), TransformError> {
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(TransformError::InvalidParam {
            name: "width",
            reason: format!("target size exceeds {MAX_DIMENSION}px"),
        });
    }
    if u64::from(w) * u64::from(h) > MAX_PIXELS {
        return Err(TransformError::InvalidParam {
            name: "width",
            reason: format!("{w}x{h} exceeds {MAX_PIXELS} pixels"),
        });
    }
    Ok((w, h))
}

/// Scale to cover `w`x`h`, then cut the box selected by `gravity`.
///
/// The image crate has no saliency detection, so `Smart` crops from the centre.
fn fill(
    img: &DynamicImage,
    w: u32,
    h: u32,
    gravity: Gravity,
) -> Result<DynamicImage, TransformError> {
    let (w, h) = check_dimensions(w.max(1), h.max(1))?;
    let (sw, sh) = img.dimensions();
    let scale = f64::max(w as f64 / sw as f64, h as f64 / sh as f64);
    // Float to int casts saturate, so oversized covers fail the check below
    let cover_w = ((sw as f64 * scale).ceil() as u32).max(w);
    let cover_h = ((sh as f64 * scale).ceil() as u32).max(h);
    let (cover_w, cover_h) = check_dimensions(cover_w, cover_h)?;
    let covered = img.resize_exact(cover_w, cover_h, FILTER);

    let centre_x = (cover_w - w) / 2;
    let centre_y = (cover_h - h) / 2;
    let (x, y) = match gravity {
        Gravity::Centre | Gravity::Smart => (centre_x, centre_y),
        Gravity::North => (centre_x, 0),
        Gravity::South => (centre_x, cover_h - h),
        Gravity::West => (0, centre_y),
        Gravity::East => (cover_w - w, centre_y),
    };

    Ok(covered.crop_imm(x, y, w, h))
}

fn extract_area(img: &DynamicImage, o: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let (aw, ah) = match (o.area_width, o.area_height) {
        (Some(aw), Some(ah)) => (aw, ah),
        _ => return Err(TransformError::MissingParam("areawidth and areaheight")),
    };
    let (left, top) = (o.left.unwrap_or(0), o.top.unwrap_or(0));

    if left.saturating_add(aw) > img.width() || top.saturating_add(ah) > img.height() {
        return Err(TransformError::InvalidParam {
            name: "areawidth",
            reason: format!(
                "area {aw}x{ah}+{left}+{top} is outside the {}x{} image",
                img.width(),
                img.height()
            ),
        });
    }

    Ok(img.crop_imm(left, top, aw, ah))
}

fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    quality: Option<u8>,
) -> Result<Vec<u8>, TransformError> {
    let mut out = Cursor::new(Vec::new());

    let written = match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, quality.unwrap_or(DEFAULT_QUALITY));
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
        }
        OutputFormat::Webp | OutputFormat::Gif | OutputFormat::Bmp => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut out, format.image_format())
        }
        OutputFormat::Png | OutputFormat::Tiff => img.write_to(&mut out, format.image_format()),
    };

    written.map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageInfo {
    width: u32,
    height: u32,
    #[serde(rename = "type")]
    kind: String,
    space: &'static str,
    has_alpha: bool,
    channels: u8,
}

fn info(img: &DynamicImage, format: ImageFormat) -> Result<ProcessedImage, TransformError> {
    let color = img.color();
    let meta = ImageInfo {
        width: img.width(),
        height: img.height(),
        kind: OutputFormat::from_image_format(format)
            .map(|f| f.name().to_string())
            .unwrap_or_else(|| format!("{format:?}").to_lowercase()),
        space: if color.has_color() { "srgb" } else { "b-w" },
        has_alpha: color.has_alpha(),
        channels: color.channel_count(),
    };

    let body = serde_json::to_vec(&meta).map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(ProcessedImage {
        body,
        mime: "application/json".to_string(),
    })
}

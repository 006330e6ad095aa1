// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor: rotate, crop, threshold, negate, brightness/contrast,
// unsharp mask and channel statistics. Operates on in-memory images using the
// `image` and `imageproc` crates.

use std::borrow::Cow;

use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{self, Interpolation};
use scanpaper_core::error::ScanpaperError;
use scanpaper_core::types::PageFormat;
use tracing::{debug, info, instrument};

/// Image processing pipeline operating on a single in-memory image.
///
/// All operations are non-destructive: each method consumes `self` and returns a
/// new `ImageProcessor` wrapping the transformed image, enabling method chaining.
///
/// ```ignore
/// let png = ImageProcessor::open("scan.pnm")?
///     .rotate(90.0)
///     .threshold(128)
///     .to_png_bytes()?;
/// ```
#[derive(Clone)]
pub struct ImageProcessor {
    /// The current working image.
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path.
    ///
    /// The format is sniffed from the file contents, so temp files whose
    /// suffix does not match their encoding still load.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, ScanpaperError> {
        let path = path.as_ref();
        let img = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|err| {
                ScanpaperError::Image(format!("failed to open {}: {}", path.display(), err))
            })?
            .decode()
            .map_err(|err| {
                ScanpaperError::Image(format!("failed to decode {}: {}", path.display(), err))
            })?;
        debug!(width = img.width(), height = img.height(), "Image loaded");
        Ok(Self { image: img })
    }

    /// Sniff the encoding of an image file from its contents.
    ///
    /// Returns `None` for formats a page cannot be stored as.
    pub fn detect_format(path: impl AsRef<std::path::Path>) -> Result<Option<PageFormat>, ScanpaperError> {
        let path = path.as_ref();
        let format = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|err| {
                ScanpaperError::Image(format!("failed to open {}: {}", path.display(), err))
            })?
            .format();
        Ok(match format {
            Some(ImageFormat::Png) => Some(PageFormat::Png),
            Some(ImageFormat::Jpeg) => Some(PageFormat::Jpeg),
            Some(ImageFormat::Tiff) => Some(PageFormat::Tiff),
            Some(ImageFormat::Pnm) => Some(PageFormat::Pnm),
            Some(ImageFormat::Bmp) => Some(PageFormat::Bmp),
            _ => None,
        })
    }

    /// Create a processor from raw encoded bytes (PNG, PNM, etc.).
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self, ScanpaperError> {
        let img = image::load_from_memory(data).map_err(|err| {
            ScanpaperError::Image(format!("failed to decode image: {}", err))
        })?;
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    /// Whether the image has a single (grey) channel.
    pub fn is_grayscale(&self) -> bool {
        !self.image.color().has_color()
    }

    // -- Geometry -------------------------------------------------------------

    /// Rotate the image by an arbitrary angle in degrees (clockwise).
    ///
    /// For 90/180/270 degree rotations, lossless rotation is used. For other
    /// angles the canvas expands to contain the whole rotated image and the
    /// uncovered corners are filled with white.
    #[instrument(skip(self), fields(degrees))]
    pub fn rotate(self, degrees: f32) -> Self {
        info!(degrees, "Rotating image");

        // Fast-path for exact multiples of 90.
        let normalised = degrees.rem_euclid(360.0);
        if (normalised - 90.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate90(),
            };
        }
        if (normalised - 180.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate180(),
            };
        }
        if (normalised - 270.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate270(),
            };
        }
        if normalised.abs() < 0.01 || (normalised - 360.0).abs() < 0.01 {
            return self;
        }

        // Expand the canvas to the rotated bounding box first, then rotate
        // about the centre so nothing is clipped.
        let radians = degrees.to_radians();
        let (w, h) = (self.image.width() as f32, self.image.height() as f32);
        let new_w = (w * radians.cos().abs() + h * radians.sin().abs()).ceil() as u32;
        let new_h = (w * radians.sin().abs() + h * radians.cos().abs()).ceil() as u32;
        let white = Rgba([255u8, 255, 255, 255]);

        let mut canvas = RgbaImage::from_pixel(new_w.max(1), new_h.max(1), white);
        let offset_x = i64::from((new_w.saturating_sub(self.image.width())) / 2);
        let offset_y = i64::from((new_h.saturating_sub(self.image.height())) / 2);
        image::imageops::overlay(&mut canvas, &self.image.to_rgba8(), offset_x, offset_y);

        let rotated: RgbaImage = geometric_transformations::rotate_about_center(
            &canvas,
            radians,
            Interpolation::Bilinear,
            white,
        );

        debug!(new_w, new_h, "General rotation applied");
        Self {
            image: DynamicImage::ImageRgba8(rotated),
        }
    }

    /// Crop a rectangular region from the image.
    ///
    /// Fails if the rectangle is empty or reaches outside the image.
    #[instrument(skip(self), fields(x, y, width, height))]
    pub fn crop(self, x: u32, y: u32, width: u32, height: u32) -> Result<Self, ScanpaperError> {
        let img_w = self.image.width();
        let img_h = self.image.height();

        if width == 0
            || height == 0
            || x.checked_add(width).is_none_or(|right| right > img_w)
            || y.checked_add(height).is_none_or(|bottom| bottom > img_h)
        {
            return Err(ScanpaperError::InvalidArgument(format!(
                "crop rectangle {x},{y} {width}x{height} is outside the {img_w}x{img_h} image"
            )));
        }

        info!(x, y, width, height, "Cropping image");
        Ok(Self {
            image: self.image.crop_imm(x, y, width, height),
        })
    }

    /// Resize to fit within `max` x `max`, preserving aspect ratio.
    pub fn thumbnail(self, max: u32) -> Self {
        Self {
            image: self.image.thumbnail(max, max),
        }
    }

    // -- Pixel filters --------------------------------------------------------

    /// Binarize: convert to grey, then `p > threshold ? 255 : 0`.
    #[instrument(skip(self), fields(threshold))]
    pub fn threshold(self, threshold: u8) -> Self {
        info!(threshold, "Thresholding image");
        let mut luma = self.image.to_luma8();
        for pixel in luma.pixels_mut() {
            pixel.0[0] = if pixel.0[0] > threshold { 255 } else { 0 };
        }
        Self {
            image: DynamicImage::ImageLuma8(luma),
        }
    }

    /// Invert every colour channel. Alpha is left alone.
    #[instrument(skip(self))]
    pub fn negate(mut self) -> Self {
        info!("Negating image");
        self.image.invert();
        self
    }

    /// Brightness and contrast enhancement factors, where 1.0 is a no-op.
    ///
    /// Brightness scales every channel towards black (< 1.0) or white (> 1.0).
    /// Contrast scales each channel's distance from the mean grey level of
    /// the brightened image.
    #[instrument(skip(self), fields(brightness, contrast))]
    pub fn brightness_contrast(self, brightness: f32, contrast: f32) -> Self {
        info!(brightness, contrast, "Adjusting brightness and contrast");
        let has_alpha = self.image.color().has_alpha();
        let grey = self.is_grayscale();
        let mut rgba = self.image.to_rgba8();

        let scale = |channel: u8, factor: f32, centre: f32| -> u8 {
            (centre + factor * (channel as f32 - centre)).round().clamp(0.0, 255.0) as u8
        };

        for pixel in rgba.pixels_mut() {
            for c in 0..3 {
                pixel.0[c] = scale(pixel.0[c], brightness, 0.0);
            }
        }

        let luma = DynamicImage::ImageRgba8(rgba.clone()).to_luma8();
        let pixels = u64::from(luma.width()) * u64::from(luma.height());
        let mean = if pixels == 0 {
            0.0
        } else {
            luma.pixels().map(|p| u64::from(p.0[0])).sum::<u64>() as f32 / pixels as f32
        };
        let mean = mean.round();

        for pixel in rgba.pixels_mut() {
            for c in 0..3 {
                pixel.0[c] = scale(pixel.0[c], contrast, mean);
            }
        }

        Self {
            image: restore_color_type(DynamicImage::ImageRgba8(rgba), grey, has_alpha),
        }
    }

    /// Unsharp mask. `radius` is the gaussian sigma, `percent` the strength
    /// and `threshold` the minimum channel difference that gets sharpened.
    #[instrument(skip(self), fields(radius, percent, threshold))]
    pub fn unsharp(self, radius: f32, percent: u32, threshold: u8) -> Self {
        info!(radius, percent, threshold, "Unsharp mask");
        if radius <= 0.0 || percent == 0 {
            return self;
        }
        let has_alpha = self.image.color().has_alpha();
        let grey = self.is_grayscale();
        let original = self.image.to_rgba8();
        let blurred = gaussian_blur_f32(&original, radius);
        let amount = percent as f32 / 100.0;

        let mut sharpened = original.clone();
        for (out, (orig, blur)) in sharpened
            .pixels_mut()
            .zip(original.pixels().zip(blurred.pixels()))
        {
            for c in 0..3 {
                let diff = orig.0[c] as i32 - blur.0[c] as i32;
                if diff.unsigned_abs() >= u32::from(threshold) {
                    let value = orig.0[c] as f32 + diff as f32 * amount;
                    out.0[c] = value.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        Self {
            image: restore_color_type(DynamicImage::ImageRgba8(sharpened), grey, has_alpha),
        }
    }

    // -- Analysis -------------------------------------------------------------

    /// Per-channel mean and population standard deviation.
    ///
    /// Grey images yield one channel, colour images three (alpha ignored).
    pub fn channel_stats(&self) -> (Vec<f64>, Vec<f64>) {
        let (samples, channels): (Vec<u8>, usize) = if self.is_grayscale() {
            (self.image.to_luma8().into_raw(), 1)
        } else {
            (self.image.to_rgb8().into_raw(), 3)
        };

        let mut sum = vec![0f64; channels];
        let mut sum_sq = vec![0f64; channels];
        for px in samples.chunks_exact(channels) {
            for (c, &v) in px.iter().enumerate() {
                let v = f64::from(v);
                sum[c] += v;
                sum_sq[c] += v * v;
            }
        }

        let count = (samples.len() / channels).max(1) as f64;
        let mean: Vec<f64> = sum.iter().map(|s| s / count).collect();
        let std_dev = sum_sq
            .iter()
            .zip(&mean)
            .map(|(sq, m)| (sq / count - m * m).max(0.0).sqrt())
            .collect();
        (mean, std_dev)
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, ScanpaperError> {
        encode_to_format(&self.image, ImageFormat::Png)
    }

    /// Write the image to a file in the given page format.
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
        format: PageFormat,
    ) -> Result<(), ScanpaperError> {
        let (image, image_format) = prepare_for(&self.image, format);
        image
            .save_with_format(path.as_ref(), image_format)
            .map_err(|err| {
                ScanpaperError::Image(format!(
                    "failed to save image to {}: {}",
                    path.as_ref().display(),
                    err
                ))
            })
    }

    /// Write a one-bit PBM file. Pixels darker than mid-grey become black.
    pub fn save_bitmap(&self, path: impl AsRef<std::path::Path>) -> Result<(), ScanpaperError> {
        let path = path.as_ref();
        // The PBM encoder treats 0 as black and anything else as white.
        let mut bits = self.image.to_luma8();
        for pixel in bits.pixels_mut() {
            pixel.0[0] = u8::from(pixel.0[0] >= 128);
        }
        let file = std::fs::File::create(path).map_err(|err| {
            ScanpaperError::Image(format!("failed to create {}: {}", path.display(), err))
        })?;
        let encoder = PnmEncoder::new(std::io::BufWriter::new(file))
            .with_subtype(PnmSubtype::Bitmap(SampleEncoding::Binary));
        DynamicImage::ImageLuma8(bits)
            .write_with_encoder(encoder)
            .map_err(|err| {
                ScanpaperError::Image(format!(
                    "failed to save bitmap to {}: {}",
                    path.display(),
                    err
                ))
            })
    }
}

/// Convert to a pixel layout the target encoder accepts.
fn prepare_for<'a>(image: &'a DynamicImage, format: PageFormat) -> (Cow<'a, DynamicImage>, ImageFormat) {
    let opaque = |img: &'a DynamicImage| -> Cow<'a, DynamicImage> {
        if !img.color().has_alpha() {
            Cow::Borrowed(img)
        } else if img.color().has_color() {
            Cow::Owned(DynamicImage::ImageRgb8(img.to_rgb8()))
        } else {
            Cow::Owned(DynamicImage::ImageLuma8(img.to_luma8()))
        }
    };

    match format {
        PageFormat::Png => (Cow::Borrowed(image), ImageFormat::Png),
        PageFormat::Monochrome => (
            Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8())),
            ImageFormat::Png,
        ),
        PageFormat::Jpeg => (opaque(image), ImageFormat::Jpeg),
        PageFormat::Tiff => (Cow::Borrowed(image), ImageFormat::Tiff),
        PageFormat::Pnm => (opaque(image), ImageFormat::Pnm),
        PageFormat::Bmp => (opaque(image), ImageFormat::Bmp),
    }
}

/// Go back to the colour type the filter started from.
fn restore_color_type(image: DynamicImage, grey: bool, has_alpha: bool) -> DynamicImage {
    match (grey, has_alpha) {
        (true, false) => DynamicImage::ImageLuma8(image.to_luma8()),
        (true, true) => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        (false, false) => DynamicImage::ImageRgb8(image.to_rgb8()),
        (false, true) => image,
    }
}

/// Encode a `DynamicImage` into the specified format, returning the raw bytes.
fn encode_to_format(
    image: &DynamicImage,
    format: ImageFormat,
) -> Result<Vec<u8>, ScanpaperError> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image.write_to(&mut cursor, format).map_err(|err| {
        ScanpaperError::Image(format!("image encoding failed: {}", err))
    })?;
    Ok(buffer)
}

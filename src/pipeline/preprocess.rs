//! Raster cleanup ahead of recognition.
//!
//! Transforms run in a fixed order: downscale, denoise, binarize, deskew.
//! Each one that actually changes the raster is recorded, along with the
//! geometry needed to map engine boxes back onto the decoded source.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use tracing::debug;

use super::error::ExtractionError;
use super::types::{
    NormalizedRaster, PreprocessOptions, PreprocessedRaster, RasterGeometry, Transform,
};

/// Median window radius (3x3).
const DENOISE_RADIUS: u32 = 1;

/// Skew search range and step, in degrees.
const MAX_SKEW_DEGREES: f32 = 5.0;
const SKEW_STEP_DEGREES: f32 = 0.25;

/// Angles smaller than this are left alone.
const MIN_SKEW_DEGREES: f32 = 0.5;

/// Minimum fraction of ink pixels for a usable skew estimate.
const MIN_INK_FRACTION: f64 = 0.02;

/// Minimum peak sharpness for a skew estimate to be trusted.
const MIN_SKEW_CONFIDENCE: f32 = 0.05;

/// Skew estimation runs on a copy no larger than this on its longest side.
const SKEW_PROBE_SIDE: u32 = 1000;

/// Clean up a decoded raster. Pure: the same input and options always give
/// the same output.
pub fn preprocess(
    raster: NormalizedRaster,
    options: &PreprocessOptions,
) -> Result<PreprocessedRaster, ExtractionError> {
    let (source_width, source_height) = (raster.width(), raster.height());
    if source_width == 0 || source_height == 0 {
        return Err(ExtractionError::preprocessing(format!(
            "raster has zero area ({}x{})",
            source_width, source_height
        )));
    }
    if options.max_dimension == 0 {
        return Err(ExtractionError::preprocessing(
            "max_dimension must be at least 1",
        ));
    }

    let mut image = raster.into_image();
    let mut transforms = Vec::new();
    let mut geometry = RasterGeometry::identity(source_width, source_height);

    if let Some((resized, scale)) = downscale(&image, options.max_dimension) {
        transforms.push(Transform::Downscale {
            from_width: source_width,
            from_height: source_height,
            to_width: resized.width(),
            to_height: resized.height(),
        });
        geometry.scale = scale;
        geometry.width = resized.width();
        geometry.height = resized.height();
        image = resized;
    }

    // A blank page has nothing to clean up or straighten.
    if is_uniform(&image) {
        debug!(transforms = transforms.len(), "Uniform raster, skipping cleanup");
        return Ok(PreprocessedRaster::new(image, transforms, geometry));
    }

    if options.denoise {
        image = median_filter(&image, DENOISE_RADIUS, DENOISE_RADIUS);
        transforms.push(Transform::Denoise {
            radius: DENOISE_RADIUS,
        });
    }

    if options.binarize && !is_uniform(&image) {
        let threshold = otsu_level(&image);
        binarize(&mut image, threshold);
        transforms.push(Transform::Binarize { threshold });
    }

    if options.deskew {
        if let Some(skew) = estimate_skew(&image) {
            if skew.angle_degrees.abs() >= MIN_SKEW_DEGREES {
                // Lines sloping down to the right are rotated back counter-clockwise.
                let correction = -skew.angle_degrees;
                image = rotate_about_center(
                    &image,
                    correction.to_radians(),
                    Interpolation::Bilinear,
                    Luma([255u8]),
                );
                geometry.rotation_degrees = correction;
                transforms.push(Transform::Deskew {
                    angle_degrees: correction,
                    confidence: skew.confidence,
                });
            }
        }
    }

    debug!(
        width = image.width(),
        height = image.height(),
        applied = ?transforms.iter().map(Transform::name).collect::<Vec<_>>(),
        "Preprocessed raster"
    );

    Ok(PreprocessedRaster::new(image, transforms, geometry))
}

/// Shrink so the longest side is at most `max_dimension`, preserving aspect
/// ratio. Returns `None` when the raster already fits.
fn downscale(image: &GrayImage, max_dimension: u32) -> Option<(GrayImage, f64)> {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_dimension {
        return None;
    }

    let scale = max_dimension as f64 / longest as f64;
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_dimension);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_dimension);

    let resized = imageops::resize(image, new_width, new_height, FilterType::Lanczos3);
    Some((resized, scale))
}

fn binarize(image: &mut GrayImage, threshold: u8) {
    for pixel in image.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > threshold { 255 } else { 0 };
    }
}

fn is_uniform(image: &GrayImage) -> bool {
    let raw = image.as_raw();
    match raw.first() {
        Some(first) => raw.iter().all(|p| p == first),
        None => true,
    }
}

/// Estimated clockwise skew of the text lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    pub angle_degrees: f32,
    /// Relative sharpness of the winning projection, 0 to 1.
    pub confidence: f32,
}

/// Estimate document skew with a projection profile search.
///
/// For each candidate angle the ink pixels are projected onto rows sheared by
/// that angle; text lines produce the sharpest histogram when the shear
/// matches their slope. Returns `None` when there is too little ink or the
/// best angle does not stand out.
pub fn estimate_skew(image: &GrayImage) -> Option<SkewEstimate> {
    let probe = skew_probe(image);
    let (width, height) = probe.dimensions();
    if width < 2 || height < 2 {
        return None;
    }

    let threshold = otsu_level(&probe);
    let ink: Vec<(f64, f64)> = probe
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] <= threshold && p.0[0] < 255)
        .map(|(x, y, _)| (x as f64, y as f64))
        .collect();

    let total = (width as f64) * (height as f64);
    let ink_fraction = ink.len() as f64 / total;
    // Mostly-dark rasters are photos or inverted scans, not text on paper.
    if ink_fraction < MIN_INK_FRACTION || ink_fraction > 0.5 {
        return None;
    }

    let max_shift = (width as f64 * MAX_SKEW_DEGREES.to_radians().tan() as f64).ceil() as i64;
    let bins = height as usize + 2 * max_shift as usize + 1;
    let mut histogram = vec![0u64; bins];

    let steps = (MAX_SKEW_DEGREES / SKEW_STEP_DEGREES).round() as i32;
    let mut best: Option<(f32, u64)> = None;
    let mut worst = u64::MAX;

    for step in -steps..=steps {
        let angle = step as f32 * SKEW_STEP_DEGREES;
        let tan = (angle as f64).to_radians().tan();

        histogram.iter_mut().for_each(|b| *b = 0);
        for &(x, y) in &ink {
            let row = (y - x * tan).round() as i64 + max_shift;
            if row >= 0 && (row as usize) < bins {
                histogram[row as usize] += 1;
            }
        }
        let score: u64 = histogram.iter().map(|&c| c * c).sum();

        worst = worst.min(score);
        // Ties go to the smaller rotation.
        let better = match best {
            None => true,
            Some((best_angle, best_score)) => {
                score > best_score || (score == best_score && angle.abs() < best_angle.abs())
            }
        };
        if better {
            best = Some((angle, score));
        }
    }

    let (angle_degrees, best_score) = best?;
    if best_score == 0 {
        return None;
    }
    let confidence = (best_score - worst) as f32 / best_score as f32;
    if confidence < MIN_SKEW_CONFIDENCE {
        return None;
    }

    Some(SkewEstimate {
        angle_degrees,
        confidence,
    })
}

fn skew_probe(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= SKEW_PROBE_SIDE {
        return image.clone();
    }
    let scale = SKEW_PROBE_SIDE as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    imageops::resize(image, w, h, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: u32, height: u32, value: u8) -> NormalizedRaster {
        NormalizedRaster::new(GrayImage::from_pixel(width, height, Luma([value])))
    }

    /// White page with horizontal dark bars sloping by `slope` px per px.
    fn lined_page(width: u32, height: u32, slope: f64) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let shifted = y as f64 - x as f64 * slope;
            let row = shifted.rem_euclid(40.0);
            if (10.0..16.0).contains(&row) && x > 20 && x < width - 20 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    fn options(denoise: bool, binarize: bool, deskew: bool, max_dimension: u32) -> PreprocessOptions {
        PreprocessOptions {
            denoise,
            binarize,
            deskew,
            max_dimension,
        }
    }

    #[test]
    fn test_downscale_bounds_longest_side() {
        let raster = NormalizedRaster::new(lined_page(800, 400, 0.0));
        let out = preprocess(raster, &options(false, false, false, 200)).unwrap();
        assert_eq!(out.width(), 200);
        assert_eq!(out.height(), 100);
        assert!((out.geometry().scale - 0.25).abs() < 1e-9);
        assert!(matches!(
            out.transforms()[0],
            Transform::Downscale {
                from_width: 800,
                to_width: 200,
                ..
            }
        ));
    }

    #[test]
    fn test_no_downscale_when_fits() {
        let raster = NormalizedRaster::new(lined_page(100, 50, 0.0));
        let out = preprocess(raster, &options(false, false, false, 3000)).unwrap();
        assert_eq!(out.width(), 100);
        assert!(out.transforms().is_empty());
        assert_eq!(out.geometry().scale, 1.0);
    }

    #[test]
    fn test_uniform_raster_stays_uniform() {
        let out = preprocess(blank(64, 64, 255), &PreprocessOptions::default()).unwrap();
        assert!(out.is_uniform());
        assert!(out.transforms().is_empty());

        let out = preprocess(blank(64, 64, 0), &PreprocessOptions::default()).unwrap();
        assert!(out.is_uniform());
    }

    #[test]
    fn test_binarize_produces_two_levels() {
        let img = GrayImage::from_fn(50, 50, |x, _| Luma([if x < 25 { 40 } else { 210 }]));
        let out = preprocess(
            NormalizedRaster::new(img),
            &options(false, true, false, 3000),
        )
        .unwrap();
        assert!(out.image().pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(matches!(out.transforms()[0], Transform::Binarize { .. }));
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let page = lined_page(300, 200, 0.03);
        let a = preprocess(NormalizedRaster::new(page.clone()), &PreprocessOptions::default())
            .unwrap();
        let b = preprocess(NormalizedRaster::new(page), &PreprocessOptions::default()).unwrap();
        assert_eq!(a.image().as_raw(), b.image().as_raw());
        assert_eq!(a.transforms(), b.transforms());
    }

    #[test]
    fn test_estimate_skew_finds_slope() {
        let slope = (2.0f64).to_radians().tan();
        let estimate = estimate_skew(&lined_page(400, 300, slope)).unwrap();
        assert!((estimate.angle_degrees - 2.0).abs() <= 0.25, "{:?}", estimate);
        assert!(estimate.confidence > 0.0);
    }

    #[test]
    fn test_estimate_skew_flat_page() {
        let estimate = estimate_skew(&lined_page(400, 300, 0.0)).unwrap();
        assert_eq!(estimate.angle_degrees, 0.0);
    }

    #[test]
    fn test_estimate_skew_needs_ink() {
        let mut img = GrayImage::from_pixel(200, 200, Luma([255]));
        img.put_pixel(10, 10, Luma([0]));
        assert!(estimate_skew(&img).is_none());
    }

    #[test]
    fn test_deskew_records_correction() {
        let slope = (3.0f64).to_radians().tan();
        let out = preprocess(
            NormalizedRaster::new(lined_page(400, 300, slope)),
            &options(false, false, true, 3000),
        )
        .unwrap();
        let deskew = out
            .transforms()
            .iter()
            .find(|t| matches!(t, Transform::Deskew { .. }))
            .expect("deskew applied");
        if let Transform::Deskew { angle_degrees, .. } = deskew {
            assert!((angle_degrees + 3.0).abs() <= 0.25);
        }
        assert_eq!(out.width(), 400);
        assert_eq!(out.height(), 300);
    }

    #[test]
    fn test_zero_max_dimension_rejected() {
        let err = preprocess(blank(10, 10, 128), &options(true, true, true, 0)).unwrap_err();
        assert_eq!(err.kind, crate::pipeline::error::ErrorKind::PreprocessingError);
    }

    #[test]
    fn test_zero_area_rejected() {
        let err = preprocess(blank(0, 0, 0), &PreprocessOptions::default()).unwrap_err();
        assert_eq!(err.kind, crate::pipeline::error::ErrorKind::PreprocessingError);
    }
}

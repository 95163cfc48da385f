use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgba};
use rand::Rng;

const NOISE_AMPLITUDE: i16 = 2;

/// Small random shift in brightness, contrast and hue plus light pixel noise.
/// Dimensions are preserved; output is always PNG.
pub fn perturb_image<R: Rng>(bytes: &[u8], rng: &mut R) -> Result<Vec<u8>> {
    let decoded =
        image::load_from_memory(bytes).context("generated image could not be decoded")?;

    let adjusted = decoded
        .brighten(signed(rng, 1, 4))
        .adjust_contrast(signed(rng, 1, 3) as f32 * 0.75)
        .huerotate(signed(rng, 1, 3));

    let mut pixels = adjusted.to_rgba8();
    for pixel in pixels.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        *pixel = Rgba([jitter(rng, r), jitter(rng, g), jitter(rng, b), a]);
    }

    let mut out = Vec::new();
    DynamicImage::ImageRgba8(pixels)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .context("failed to encode varied image")?;
    Ok(out)
}

/// Nonzero integer with magnitude in `min..=max` and a random sign.
fn signed<R: Rng>(rng: &mut R, min: i32, max: i32) -> i32 {
    let magnitude = rng.gen_range(min..=max);
    if rng.gen_bool(0.5) {
        magnitude
    } else {
        -magnitude
    }
}

fn jitter<R: Rng>(rng: &mut R, channel: u8) -> u8 {
    let delta = rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
    (i16::from(channel) + delta).clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn sample_png(width: u32, height: u32) -> Result<Vec<u8>> {
        let mut image = RgbImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 8) as u8, (y * 8) as u8, 128]);
        }
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        Ok(out)
    }

    #[test]
    fn variation_keeps_dimensions_and_changes_pixels() -> Result<()> {
        let original = sample_png(24, 16)?;
        let mut rng = StdRng::seed_from_u64(3);
        let varied = perturb_image(&original, &mut rng)?;

        let before = image::load_from_memory(&original)?.to_rgba8();
        let after = image::load_from_memory(&varied)?;
        assert_eq!(after.dimensions(), (24, 16));
        assert_ne!(before.as_raw(), after.to_rgba8().as_raw());
        Ok(())
    }

    #[test]
    fn same_seed_gives_same_variation() -> Result<()> {
        let original = sample_png(8, 8)?;
        let first = perturb_image(&original, &mut StdRng::seed_from_u64(11))?;
        let second = perturb_image(&original, &mut StdRng::seed_from_u64(11))?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn undecodable_input_is_an_error() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(perturb_image(b"not an image", &mut rng).is_err());
    }
}

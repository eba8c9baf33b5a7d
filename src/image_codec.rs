use image::{codecs::jpeg::JpegEncoder, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InvalidImageError {
    #[error("empty image payload")]
    Empty,
    #[error("unrecognized image format: {0}")]
    UnknownFormat(std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decodes uploaded bytes into an 8-bit RGB bitmap.
///
/// The format is sniffed from the payload itself; whatever content type the
/// client declared is ignored. Grayscale, palette, alpha and 16-bit inputs
/// all come out as three 8-bit channels.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, InvalidImageError> {
    if bytes.is_empty() {
        return Err(InvalidImageError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(InvalidImageError::UnknownFormat)?;

    let image = reader.decode()?;

    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(buf)
}

pub fn guess_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{
        codecs::gif::GifEncoder, DynamicImage, Frame, GrayImage, ImageBuffer, ImageFormat, Luma,
        Rgb, Rgba, RgbaImage,
    };

    fn to_png(image: DynamicImage) -> Vec<u8> {
        let mut data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .unwrap();
        data
    }

    #[test]
    fn test_decode_rgb_png() {
        let img = RgbImage::from_pixel(20, 10, Rgb([255, 0, 0]));
        let decoded = decode(&to_png(DynamicImage::ImageRgb8(img))).unwrap();

        assert_eq!(decoded.dimensions(), (20, 10));
        assert_eq!(decoded.get_pixel(3, 3), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_decode_normalizes_grayscale_and_alpha() {
        let gray = GrayImage::from_pixel(8, 6, Luma([128]));
        let decoded = decode(&to_png(DynamicImage::ImageLuma8(gray))).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([128, 128, 128]));

        let rgba = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 0]));
        let decoded = decode(&to_png(DynamicImage::ImageRgba8(rgba))).unwrap();
        assert_eq!(decoded.get_pixel(1, 1), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_normalizes_palette_gif() {
        let rgba = RgbaImage::from_fn(12, 7, |x, _| {
            if x < 6 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let mut data = Vec::new();
        GifEncoder::new(&mut data)
            .encode_frame(Frame::new(rgba))
            .unwrap();
        assert_eq!(image::guess_format(&data).unwrap(), ImageFormat::Gif);

        let decoded = decode(&data).unwrap();
        assert_eq!(decoded.dimensions(), (12, 7));
        let left = decoded.get_pixel(1, 1);
        let right = decoded.get_pixel(10, 1);
        assert!(left[0] > 200 && left[2] < 50);
        assert!(right[2] > 200 && right[0] < 50);
    }

    #[test]
    fn test_decode_normalizes_16_bit() {
        let rgb16: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(5, 3, Rgb([65535, 0, 128 * 257]));
        let decoded = decode(&to_png(DynamicImage::ImageRgb16(rgb16))).unwrap();

        assert_eq!(decoded.dimensions(), (5, 3));
        assert_eq!(decoded.get_pixel(4, 2), &Rgb([255, 0, 128]));
    }

    #[test]
    fn test_decode_rejects_non_image_bytes() {
        assert!(matches!(decode(b""), Err(InvalidImageError::Empty)));
        assert!(decode(b"definitely not an image").is_err());

        let mut truncated = to_png(DynamicImage::ImageRgb8(RgbImage::new(16, 16)));
        truncated.truncate(24);
        assert!(decode(&truncated).is_err());
    }

    #[test]
    fn test_encode_jpeg_is_decodable() {
        let img = RgbImage::from_pixel(32, 16, Rgb([0, 128, 255]));
        let jpeg = encode_jpeg(&img, 90).unwrap();

        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        assert_eq!(decode(&jpeg).unwrap().dimensions(), (32, 16));
    }

    #[test]
    fn test_guess_extension() {
        let png = to_png(DynamicImage::ImageRgb8(RgbImage::new(2, 2)));
        assert_eq!(guess_extension(&png), "png");

        let jpeg = encode_jpeg(&RgbImage::new(2, 2), 80).unwrap();
        assert_eq!(guess_extension(&jpeg), "jpg");

        assert_eq!(guess_extension(b"plain text"), "bin");
    }
}

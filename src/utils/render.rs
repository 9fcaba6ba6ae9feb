use crate::core::{GymError, Result};
use crate::frame::Frame;

/// Encode a byte frame with 1, 3 or 4 channels as PNG.
/// - When the `image` feature is enabled, this will encode using the `image` crate.
/// - Without the feature, returns GymError::NotSupported.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>> {
    let pixels = frame
        .as_bytes()
        .ok_or_else(|| GymError::NotSupported(format!("only uint8 frames can be encoded to PNG, got {}", frame.kind())))?;
    let width = u32::try_from(frame.width()).map_err(|_| GymError::InvalidArgument("frame too wide for PNG".into()))?;
    let height = u32::try_from(frame.height()).map_err(|_| GymError::InvalidArgument("frame too tall for PNG".into()))?;
    encode_pixels_png(width, height, frame.channels(), pixels)
}

#[cfg(feature = "image")]
fn encode_pixels_png(width: u32, height: u32, channels: usize, pixels: &[u8]) -> Result<Vec<u8>> {
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder};
    use std::io::Cursor;

    let color = match channels {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        4 => ExtendedColorType::Rgba8,
        n => return Err(GymError::NotSupported(format!("PNG needs 1, 3 or 4 channels, frame has {n}"))),
    };

    let mut buf = Vec::new();
    PngEncoder::new(Cursor::new(&mut buf))
        .write_image(pixels, width, height, color)
        .map_err(|e| GymError::Resource(format!("PNG encode error: {e}")))?;
    Ok(buf)
}

#[cfg(not(feature = "image"))]
fn encode_pixels_png(_width: u32, _height: u32, _channels: usize, _pixels: &[u8]) -> Result<Vec<u8>> {
    Err(GymError::NotSupported("PNG encoding requires the `image` feature".into()))
}

/// Save a frame as a PNG file at the given path.
/// Requires the `image` feature; otherwise returns NotSupported.
pub fn save_png<P: AsRef<std::path::Path>>(path: P, frame: &Frame) -> Result<()> {
    let bytes = encode_png(frame)?;
    std::fs::write(path, bytes).map_err(|e| GymError::Resource(format!("failed to write PNG: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameShape;
    use crate::value::ValueKind;

    #[test]
    fn float_frames_are_not_encodable() {
        let frame = Frame::new(FrameShape::new(ValueKind::Float, 2, 2, 3)).unwrap();
        assert!(matches!(encode_png(&frame), Err(GymError::NotSupported(_))));
    }

    #[cfg(not(feature = "image"))]
    #[test]
    fn encode_png_without_feature_not_supported() {
        let frame = Frame::new(FrameShape::rgb8(2, 2)).unwrap();
        assert!(matches!(encode_png(&frame), Err(GymError::NotSupported(_))));
    }

    #[cfg(feature = "image")]
    #[test]
    fn encode_png_with_feature_produces_png_signature() {
        let frame = Frame::new(FrameShape::rgb8(2, 2)).unwrap();
        let bytes = encode_png(&frame).expect("PNG encoding should succeed");
        assert_eq!(&bytes[..8], &[137, 80, 78, 71, 13, 10, 26, 10]);

        let two_channel = Frame::new(FrameShape::new(ValueKind::Byte, 2, 2, 2)).unwrap();
        assert!(encode_png(&two_channel).is_err());
    }
}

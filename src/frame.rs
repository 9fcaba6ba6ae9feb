//! Rendered frames.
//!
//! A frame is one buffer with explicit width, height, channel count and
//! element kind. The layout is fixed: channel varies fastest, then x, then y,
//! so element `(x, y, c)` lives at `c + channels * (x + width * y)`.

use crate::core::{GymError, Result};
use crate::value::{BufferMut, Value, ValueBuffer, ValueKind};

/// Dimensions and element kind of a frame, declared by the environment at `make`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameShape {
    pub kind: ValueKind,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl FrameShape {
    pub fn new(kind: ValueKind, width: usize, height: usize, channels: usize) -> Self {
        Self { kind, width, height, channels }
    }

    /// 8-bit RGB.
    pub fn rgb8(width: usize, height: usize) -> Self {
        Self::new(ValueKind::Byte, width, height, 3)
    }

    /// Total element count, or `None` on overflow.
    pub fn len(&self) -> Option<usize> {
        self.width.checked_mul(self.height)?.checked_mul(self.channels)
    }
}

/// An image buffer owned by the environment instance and overwritten in place by `render`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    shape: FrameShape,
    buffer: ValueBuffer,
}

impl Frame {
    /// Allocate a zeroed frame.
    pub fn new(shape: FrameShape) -> Result<Self> {
        if shape.width == 0 || shape.height == 0 || shape.channels == 0 {
            return Err(GymError::Resource(format!(
                "frame dimensions must be non-zero, got {}x{}x{}",
                shape.width, shape.height, shape.channels
            )));
        }
        let len = shape
            .len()
            .filter(|&n| i32::try_from(n).is_ok())
            .ok_or_else(|| GymError::Resource("frame too large".into()))?;
        Ok(Self { shape, buffer: ValueBuffer::zeros(shape.kind, len) })
    }

    /// Wrap an existing buffer. Its length must be `width * height * channels`.
    pub fn from_buffer(width: usize, height: usize, channels: usize, buffer: ValueBuffer) -> Result<Self> {
        let shape = FrameShape::new(buffer.kind(), width, height, channels);
        if shape.len() != Some(buffer.len()) {
            return Err(GymError::shape_mismatch(
                "frame",
                format!("{width}x{height}x{channels}"),
                format!("{} elements", buffer.len()),
            ));
        }
        Ok(Self { shape, buffer })
    }

    pub fn shape(&self) -> FrameShape { self.shape }
    pub fn kind(&self) -> ValueKind { self.shape.kind }
    pub fn width(&self) -> usize { self.shape.width }
    pub fn height(&self) -> usize { self.shape.height }
    pub fn channels(&self) -> usize { self.shape.channels }
    pub fn buffer(&self) -> &ValueBuffer { &self.buffer }

    /// In-place write access to the whole buffer.
    pub fn buffer_mut(&mut self) -> BufferMut<'_> { self.buffer.view_mut() }

    /// Element index of `(x, y, channel)`, or `None` when out of bounds.
    #[inline]
    pub fn index(&self, x: usize, y: usize, channel: usize) -> Option<usize> {
        let FrameShape { width, height, channels, .. } = self.shape;
        if x >= width || y >= height || channel >= channels {
            return None;
        }
        Some(channel + channels * (x + width * y))
    }

    pub fn get(&self, x: usize, y: usize, channel: usize) -> Option<Value> {
        self.index(x, y, channel).and_then(|i| self.buffer.get(i))
    }

    pub fn set(&mut self, x: usize, y: usize, channel: usize, value: Value) -> Result<()> {
        let i = self.index(x, y, channel).ok_or_else(|| {
            GymError::InvalidArgument(format!("pixel ({x}, {y}, {channel}) outside {}x{}x{}", self.width(), self.height(), self.channels()))
        })?;
        self.buffer.view_mut().set(i, value)
    }

    /// Write one value per channel at `(x, y)`.
    pub fn set_pixel(&mut self, x: usize, y: usize, pixel: &[Value]) -> Result<()> {
        if pixel.len() != self.channels() {
            return Err(GymError::shape_mismatch("pixel", self.channels(), pixel.len()));
        }
        for (c, v) in pixel.iter().enumerate() {
            self.set(x, y, c, *v)?;
        }
        Ok(())
    }

    /// Fill every pixel with `pixel`, one value per channel.
    pub fn fill(&mut self, pixel: &[Value]) -> Result<()> {
        for y in 0..self.height() {
            for x in 0..self.width() {
                self.set_pixel(x, y, pixel)?;
            }
        }
        Ok(())
    }

    /// Raw bytes of a `uint8` frame.
    pub fn as_bytes(&self) -> Option<&[u8]> { self.buffer.as_u8() }

    pub fn data_addr(&self) -> usize { self.buffer.data_addr() }

    pub(crate) fn release(&mut self) {
        self.buffer = ValueBuffer::zeros(self.shape.kind, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_channel_fastest_then_x_then_y() {
        let frame = Frame::new(FrameShape::rgb8(8, 8)).unwrap();
        assert_eq!(frame.index(0, 0, 0), Some(0));
        assert_eq!(frame.index(0, 0, 2), Some(2));
        assert_eq!(frame.index(1, 0, 0), Some(3));
        assert_eq!(frame.index(0, 1, 0), Some(24));
        assert_eq!(frame.index(7, 7, 2), Some(8 * 8 * 3 - 1));
        assert_eq!(frame.index(8, 0, 0), None);
        assert_eq!(frame.index(0, 0, 3), None);
    }

    #[test]
    fn set_and_get_agree_with_raw_layout() {
        let mut frame = Frame::new(FrameShape::rgb8(4, 3)).unwrap();
        frame.set(2, 1, 1, Value::Byte(77)).unwrap();
        let raw = frame.as_bytes().unwrap();
        assert_eq!(raw[1 + 3 * (2 + 4 * 1)], 77);
        assert_eq!(frame.get(2, 1, 1), Some(Value::Byte(77)));
        assert!(frame.set(2, 1, 1, Value::Float(1.0)).is_err());
    }

    #[test]
    fn fill_writes_every_pixel_in_place() {
        let mut frame = Frame::new(FrameShape::new(ValueKind::Float, 2, 2, 1)).unwrap();
        let addr = frame.data_addr();
        frame.fill(&[Value::Float(0.5)]).unwrap();
        assert_eq!(frame.buffer().as_f32(), Some(&[0.5; 4][..]));
        assert_eq!(frame.data_addr(), addr);
        assert!(frame.fill(&[Value::Float(0.5), Value::Float(0.5)]).is_err());
    }

    #[test]
    fn degenerate_shapes_are_rejected() {
        assert!(Frame::new(FrameShape::rgb8(0, 4)).is_err());
        assert!(Frame::new(FrameShape::rgb8(usize::MAX, 2)).is_err());
        assert!(Frame::from_buffer(2, 2, 3, ValueBuffer::Byte(vec![0; 11])).is_err());
        assert!(Frame::from_buffer(2, 2, 3, ValueBuffer::Byte(vec![0; 12])).is_ok());
    }
}

//! Numeric backends interop.
//! Optional conversions between contract buffers and ndarray types.
//!
//! Gated behind the `ndarray` feature; the core crate keeps plain vectors.

#[cfg(feature = "ndarray")]
pub mod ndarray_impl {
    use ndarray::{Array1, Array3};

    use crate::core::{GymError, Result};
    use crate::frame::Frame;
    use crate::spaces::BoxSpace;
    use crate::value::ValueBuffer;

    impl ValueBuffer {
        /// Copy a float64 view of the buffer into an `Array1`.
        pub fn to_ndarray_f64(&self) -> Array1<f64> {
            let view = self.view();
            (0..view.len()).filter_map(|i| view.get(i)).map(|v| v.as_f64()).collect()
        }
    }

    impl BoxSpace {
        /// Lower and upper bounds as float64 arrays.
        pub fn bounds_ndarray(&self) -> (Array1<f64>, Array1<f64>) {
            let n = self.dim();
            let low = (0..n).filter_map(|i| self.low(i)).collect();
            let high = (0..n).filter_map(|i| self.high(i)).collect();
            (low, high)
        }
    }

    impl Frame {
        /// Copy a byte frame into an array shaped `(height, width, channels)`.
        ///
        /// The frame layout (channel fastest, then x, then y) is exactly the
        /// standard row-major order of that shape.
        pub fn to_ndarray_u8(&self) -> Result<Array3<u8>> {
            let data = self
                .as_bytes()
                .ok_or_else(|| GymError::InvalidArgument(format!("frame is {}, not uint8", self.kind())))?;
            let shape = (self.height(), self.width(), self.channels());
            Array3::from_shape_vec(shape, data.to_vec()).map_err(|e| GymError::InvalidArgument(e.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::frame::FrameShape;
        use crate::value::Value;

        #[test]
        fn frame_ndarray_indexing_matches_frame_addressing() {
            let mut frame = Frame::new(FrameShape::rgb8(4, 2)).unwrap();
            frame.set(3, 1, 2, Value::Byte(200)).unwrap();
            let arr = frame.to_ndarray_u8().unwrap();
            assert_eq!(arr.dim(), (2, 4, 3));
            assert_eq!(arr[[1, 3, 2]], 200);
            assert_eq!(arr.iter().filter(|&&v| v != 0).count(), 1);
        }

        #[test]
        fn box_bounds_round_trip_to_ndarray() {
            let b = BoxSpace::new_f32(vec![-1.0, 0.0], vec![1.0, 2.0]).unwrap();
            let (low, high) = b.bounds_ndarray();
            assert_eq!(low.to_vec(), vec![-1.0, 0.0]);
            assert_eq!(high.to_vec(), vec![1.0, 2.0]);
            assert_eq!(b.descriptor().to_ndarray_f64().len(), 4);
        }
    }
}

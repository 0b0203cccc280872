//! Tensor layout descriptions: element type, memory format, and shape.

use std::fmt;

/// Element data type of a tensor buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point.
    F16,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 32-bit integer.
    I32,
}

impl DataType {
    /// Size in bytes of one element.
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F16 => 2,
            Self::I8 | Self::U8 => 1,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I32 => "i32",
        })
    }
}

/// Memory order of a 4-dimensional tensor.
///
/// Letters name the dimensions from outermost to innermost stride:
/// `b` = batch, `f` = feature, `y`/`x` = spatial, `o`/`i` = output/input
/// channels for weight tensors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// batch, feature, y, x; the default activation format.
    Bfyx,
    /// batch, y, x, feature.
    Byxf,
    /// y, x, feature, batch.
    Yxfb,
    /// output channels, input channels, y, x; the weight format.
    Oiyx,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bfyx => "bfyx",
            Self::Byxf => "byxf",
            Self::Yxfb => "yxfb",
            Self::Oiyx => "oiyx",
        })
    }
}

/// The memory layout of one tensor: element type, format, and logical shape.
///
/// The shape is always rank 4; tensors of lower rank pad trailing
/// dimensions with 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Layout {
    /// Element type.
    pub data_type: DataType,
    /// Memory order.
    pub format: Format,
    /// Logical dimensions in `bfyx` order.
    pub shape: [i64; 4],
}

impl Layout {
    /// Creates a layout, padding a short shape with trailing 1s.
    ///
    /// # Panics
    ///
    /// Panics if `shape` has more than 4 dimensions or any non-positive
    /// dimension.
    pub fn new(data_type: DataType, format: Format, shape: &[i64]) -> Self {
        assert!(
            shape.len() <= 4,
            "layout rank {} exceeds maximum of 4",
            shape.len()
        );
        let mut dims = [1i64; 4];
        for (slot, &d) in dims.iter_mut().zip(shape.iter()) {
            assert!(d > 0, "non-positive dimension {d} in layout shape");
            *slot = d;
        }
        Self {
            data_type,
            format,
            shape: dims,
        }
    }

    /// Total number of elements.
    pub fn count(&self) -> i64 {
        self.shape.iter().product()
    }

    /// Total size in bytes.
    pub fn bytes_count(&self) -> usize {
        self.count() as usize * self.data_type.size_bytes()
    }

    /// The single-row layout kernels expect for bias operands:
    /// `1 x C x 1 x 1` in `bfyx`, where `C` is the operand's element count.
    pub fn bias_layout(&self) -> Layout {
        Layout {
            data_type: self.data_type,
            format: Format::Bfyx,
            shape: [1, self.count(), 1, 1],
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}x{}x{}x{}",
            self.data_type, self.format, self.shape[0], self.shape[1], self.shape[2], self.shape[3]
        )
    }
}

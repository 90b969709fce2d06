//! Reader for the IDX binary array format used to distribute MNIST.
//!
//! An IDX file starts with a 4 byte magic number: two zero bytes, a byte
//! encoding the element type and a byte holding the number of dimensions.
//! Each dimension size follows as a big-endian `u32`, then the raw elements
//! in row-major order.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

const MAGIC_LEN: usize = 4;
const DIM_LEN: usize = 4;

/// Element type stored in an IDX array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdxElement {
    U8,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl IdxElement {
    /// Element type for the third magic byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x08 => Some(Self::U8),
            0x09 => Some(Self::I8),
            0x0B => Some(Self::I16),
            0x0C => Some(Self::I32),
            0x0D => Some(Self::F32),
            0x0E => Some(Self::F64),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::U8 => 0x08,
            Self::I8 => 0x09,
            Self::I16 => 0x0B,
            Self::I32 => 0x0C,
            Self::F32 => 0x0D,
            Self::F64 => 0x0E,
        }
    }

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Error type for [IdxArray](IdxArray) parsing.
#[derive(thiserror::Error, Debug)]
pub enum IdxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated header: expected at least {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid magic number {0:02x?}")]
    InvalidMagic([u8; MAGIC_LEN]),

    #[error("unknown element type code 0x{0:02x}")]
    UnknownElementType(u8),

    #[error("the array declares no dimensions")]
    NoDimensions,

    /// The shape cannot be addressed in memory or encoded in an IDX header.
    #[error("shape {0:?} is too large for an IDX array")]
    ShapeOverflow(Vec<usize>),

    #[error("payload holds {actual} bytes, the declared shape needs {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("expected {expected:?} elements, found {actual:?}")]
    ElementType {
        expected: IdxElement,
        actual: IdxElement,
    },
}

/// A typed N-dimensional array decoded from an IDX file.
#[derive(Clone, Debug, PartialEq)]
pub struct IdxArray {
    element: IdxElement,
    dims: Vec<usize>,
    data: Vec<u8>,
}

impl IdxArray {
    /// Builds an unsigned byte array, checking that `data` matches `dims`.
    pub fn from_u8(dims: Vec<usize>, data: Vec<u8>) -> std::result::Result<Self, IdxError> {
        if dims.is_empty() {
            return Err(IdxError::NoDimensions);
        }
        let encodable = dims.len() <= u8::MAX as usize
            && dims.iter().all(|dim| *dim <= u32::MAX as usize);
        let expected = match payload_len(&dims, IdxElement::U8) {
            Some(expected) if encodable => expected,
            _ => return Err(IdxError::ShapeOverflow(dims)),
        };
        if expected != data.len() {
            return Err(IdxError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            element: IdxElement::U8,
            dims,
            data,
        })
    }

    /// Decodes an in-memory IDX buffer.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, IdxError> {
        if bytes.len() < MAGIC_LEN {
            return Err(IdxError::Truncated {
                expected: MAGIC_LEN,
                actual: bytes.len(),
            });
        }
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic[0] != 0 || magic[1] != 0 {
            return Err(IdxError::InvalidMagic(magic));
        }
        let element = IdxElement::from_code(magic[2]).ok_or(IdxError::UnknownElementType(magic[2]))?;
        let num_dims = magic[3] as usize;
        if num_dims == 0 {
            return Err(IdxError::NoDimensions);
        }

        let header_len = MAGIC_LEN + num_dims * DIM_LEN;
        if bytes.len() < header_len {
            return Err(IdxError::Truncated {
                expected: header_len,
                actual: bytes.len(),
            });
        }

        let dims: Vec<usize> = bytes[MAGIC_LEN..header_len]
            .chunks_exact(DIM_LEN)
            .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize)
            .collect();

        let payload = &bytes[header_len..];
        let expected =
            payload_len(&dims, element).ok_or_else(|| IdxError::ShapeOverflow(dims.clone()))?;
        if payload.len() != expected {
            return Err(IdxError::LengthMismatch {
                expected,
                actual: payload.len(),
            });
        }

        Ok(Self {
            element,
            dims,
            data: payload.to_vec(),
        })
    }

    /// Reads and decodes the IDX file at `path`.
    ///
    /// Any failure is reported as [Error::DatasetLoad] naming the file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let load_error = |source: IdxError| Error::DatasetLoad {
            path: path.to_path_buf(),
            source,
        };

        let bytes = fs::read(path).map_err(|err| load_error(IdxError::Io(err)))?;
        let array = Self::from_bytes(&bytes).map_err(load_error)?;
        log::debug!(
            "Read {:?} array with shape {:?} from {}",
            array.element,
            array.dims,
            path.display()
        );

        Ok(array)
    }

    /// Encodes the array in the IDX format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MAGIC_LEN + self.dims.len() * DIM_LEN + self.data.len());
        bytes.extend_from_slice(&[0, 0, self.element.code(), self.dims.len() as u8]);
        for dim in self.dims.iter() {
            bytes.extend_from_slice(&(*dim as u32).to_be_bytes());
        }
        bytes.extend_from_slice(&self.data);
        bytes
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn element(&self) -> IdxElement {
        self.element
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of entries along the first dimension.
    pub fn len(&self) -> usize {
        self.dims[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw payload, only available for unsigned byte arrays.
    pub fn as_u8(&self) -> std::result::Result<&[u8], IdxError> {
        match self.element {
            IdxElement::U8 => Ok(&self.data),
            actual => Err(IdxError::ElementType {
                expected: IdxElement::U8,
                actual,
            }),
        }
    }
}

/// Payload size in bytes, `None` when it overflows `usize`.
fn payload_len(dims: &[usize], element: IdxElement) -> Option<usize> {
    dims.iter()
        .try_fold(1usize, |len, dim| len.checked_mul(*dim))?
        .checked_mul(element.size())
}

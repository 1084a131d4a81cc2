use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Frame;
use crate::error::{Result, SerializationError};
use crate::family::SerializationFamily;

pub const DEVICE_ARRAY_TAG: &str = "rocml.device-array";

/// A device buffer described by the array interface (`typestr` like `<f4`)
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceArray {
    pub shape: Vec<usize>,
    pub typestr: String,
    /// Byte strides; `None` means C-contiguous
    pub strides: Option<Vec<isize>>,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ArrayHeader {
    shape: Vec<usize>,
    typestr: String,
    strides: Option<Vec<isize>>,
    lengths: Vec<usize>,
}

impl DeviceArray {
    pub fn contiguous(shape: Vec<usize>, typestr: impl Into<String>, data: Vec<u8>) -> Result<Self> {
        let array = Self {
            shape,
            typestr: typestr.into(),
            strides: None,
            data,
        };
        array.validate()?;
        Ok(array)
    }

    /// Element size in bytes, parsed from the digits of `typestr`
    pub fn itemsize(&self) -> Result<usize> {
        let digits = self.typestr.trim_start_matches(|c: char| !c.is_ascii_digit());
        digits
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| SerializationError::Codec(format!("bad typestr {:?}", self.typestr)))
    }

    /// Element count; shapes arrive from the wire, so overflow is an error
    pub fn len(&self) -> Result<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| self.overflow())
    }

    pub fn is_empty(&self) -> bool {
        self.shape.contains(&0)
    }

    pub fn nbytes(&self) -> Result<usize> {
        self.len()?
            .checked_mul(self.itemsize()?)
            .ok_or_else(|| self.overflow())
    }

    fn overflow(&self) -> SerializationError {
        SerializationError::Codec(format!(
            "shape {:?} of {} overflows the address space",
            self.shape, self.typestr
        ))
    }

    fn validate(&self) -> Result<()> {
        let expected = self.nbytes()?;
        // Strided views may cover a larger buffer than their logical size
        let ok = match self.strides {
            None => self.data.len() == expected,
            Some(_) => self.data.len() >= expected,
        };
        if !ok {
            return Err(SerializationError::Codec(format!(
                "buffer of {} bytes does not hold shape {:?} of {}",
                self.data.len(),
                self.shape,
                self.typestr
            )));
        }
        Ok(())
    }
}

fn dump_array(array: &DeviceArray) -> Result<(Value, Vec<Frame>)> {
    array.validate()?;
    let header = ArrayHeader {
        shape: array.shape.clone(),
        typestr: array.typestr.clone(),
        strides: array.strides.clone(),
        lengths: vec![array.data.len()],
    };
    Ok((serde_json::to_value(&header)?, vec![array.data.clone()]))
}

fn load_array(sub_header: Value, mut frames: Vec<Frame>) -> Result<DeviceArray> {
    let header: ArrayHeader = serde_json::from_value(sub_header)?;
    if frames.len() != 1 || header.lengths.len() != 1 {
        return Err(SerializationError::FrameCountMismatch {
            flags: header.lengths.len(),
            frames: frames.len(),
        });
    }

    let data = frames.remove(0);
    if data.len() != header.lengths[0] {
        return Err(SerializationError::Codec(format!(
            "frame holds {} bytes, header says {}",
            data.len(),
            header.lengths[0]
        )));
    }

    let array = DeviceArray {
        shape: header.shape,
        typestr: header.typestr,
        strides: header.strides,
        data,
    };
    array.validate()?;
    Ok(array)
}

pub fn register_device_array(family: &SerializationFamily) {
    family.register_as::<DeviceArray, _, _>(DEVICE_ARRAY_TAG, dump_array, load_array);
}

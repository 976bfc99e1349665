//! Buffer pool sizing derived from platform limits.
//!
//! The buffer manager serves three size classes. Each bin must hold the
//! largest message of its class:
//!
//! - framer: the framed form of the largest com or file buffer, i.e.
//!   `max(com, file + length field) + digest + frame header`
//! - deframer: the unframed `max(com, file + length field)`
//! - driver: raw socket reads, a fixed platform size
//!
//! Everything here is pure arithmetic; nothing is cached between calls.
//! Platform values come from configuration, so [`ResourceSizingSpec::try_compute`]
//! rejects any set whose bins or pool total do not fit in `usize`.
//! [`ResourceSizingSpec::compute`] saturates instead.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

pub const FW_COM_BUFFER_MAX_SIZE: usize = 512;
pub const FW_FILE_BUFFER_MAX_SIZE: usize = 512;
pub const LENGTH_FIELD_SIZE: usize = core::mem::size_of::<u32>();
/// CRC32 digest appended to every frame.
pub const HASH_DIGEST_LENGTH: usize = 4;
/// Start word plus payload size word.
pub const FRAME_HEADER_SIZE: usize = 8;
pub const BUFFERS_PER_CLASS: u32 = 30;
pub const COM_DRIVER_BUFFER_SIZE: usize = 3000;
pub const BUFFER_MANAGER_MAX_BINS: usize = 10;

const fn const_max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

pub const DEFRAMER_BUFFER_SIZE: usize =
    const_max(FW_COM_BUFFER_MAX_SIZE, FW_FILE_BUFFER_MAX_SIZE + LENGTH_FIELD_SIZE);
pub const FRAMER_BUFFER_SIZE: usize = DEFRAMER_BUFFER_SIZE + HASH_DIGEST_LENGTH + FRAME_HEADER_SIZE;

const_assert!(FRAMER_BUFFER_SIZE >= FW_COM_BUFFER_MAX_SIZE + HASH_DIGEST_LENGTH + FRAME_HEADER_SIZE);
const_assert!(FRAMER_BUFFER_SIZE >= FW_FILE_BUFFER_MAX_SIZE + LENGTH_FIELD_SIZE + HASH_DIGEST_LENGTH + FRAME_HEADER_SIZE);
const_assert!(DEFRAMER_BUFFER_SIZE >= FW_COM_BUFFER_MAX_SIZE);
const_assert!(DEFRAMER_BUFFER_SIZE >= FW_FILE_BUFFER_MAX_SIZE + LENGTH_FIELD_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConstants {
    pub com_buffer_max_size: usize,
    pub file_buffer_max_size: usize,
    pub length_field_size: usize,
    pub hash_digest_length: usize,
    pub frame_header_size: usize,
    pub buffers_per_class: u32,
    pub com_driver_buffer_size: usize,
}

impl PlatformConstants {
    pub const REFERENCE: Self = Self {
        com_buffer_max_size: FW_COM_BUFFER_MAX_SIZE,
        file_buffer_max_size: FW_FILE_BUFFER_MAX_SIZE,
        length_field_size: LENGTH_FIELD_SIZE,
        hash_digest_length: HASH_DIGEST_LENGTH,
        frame_header_size: FRAME_HEADER_SIZE,
        buffers_per_class: BUFFERS_PER_CLASS,
        com_driver_buffer_size: COM_DRIVER_BUFFER_SIZE,
    };

    /// Largest unframed payload: a com buffer or a length-prefixed file buffer.
    pub fn max_payload(&self) -> usize {
        self.com_buffer_max_size
            .max(self.file_buffer_max_size.saturating_add(self.length_field_size))
    }

    pub fn frame_overhead(&self) -> usize {
        self.hash_digest_length.saturating_add(self.frame_header_size)
    }

    fn checked_max_payload(&self) -> Result<usize, SizingError> {
        let file = self
            .file_buffer_max_size
            .checked_add(self.length_field_size)
            .ok_or(SizingError::Overflow("deframer buffer size"))?;
        Ok(self.com_buffer_max_size.max(file))
    }

    fn checked_frame_overhead(&self) -> Result<usize, SizingError> {
        self.hash_digest_length
            .checked_add(self.frame_header_size)
            .ok_or(SizingError::Overflow("frame overhead"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizingError {
    #[error("platform constants overflow usize computing the {0}")]
    Overflow(&'static str),
}

impl Default for PlatformConstants {
    fn default() -> Self {
        Self::REFERENCE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeClass {
    Framer,
    Deframer,
    Driver,
}

impl SizeClass {
    pub const ALL: [SizeClass; 3] = [SizeClass::Framer, SizeClass::Deframer, SizeClass::Driver];

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Framer => "framer",
            SizeClass::Deframer => "deframer",
            SizeClass::Driver => "driver",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferBin {
    pub buffer_size: usize,
    pub buffer_count: u32,
}

impl BufferBin {
    pub fn total_bytes(&self) -> usize {
        self.buffer_size.saturating_mul(self.buffer_count as usize)
    }

    pub fn checked_total_bytes(&self) -> Option<usize> {
        self.buffer_size.checked_mul(self.buffer_count as usize)
    }
}

pub type BufferBins = Vec<BufferBin, BUFFER_MANAGER_MAX_BINS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceSizingSpec {
    constants: PlatformConstants,
    framer: BufferBin,
    deframer: BufferBin,
    driver: BufferBin,
}

impl ResourceSizingSpec {
    pub fn compute(constants: &PlatformConstants) -> Self {
        let payload = constants.max_payload();
        Self::with_sizes(constants, payload.saturating_add(constants.frame_overhead()), payload)
    }

    /// Like [`compute`](Self::compute), but fails where any bin size, bin
    /// total or the pool total would overflow.
    pub fn try_compute(constants: &PlatformConstants) -> Result<Self, SizingError> {
        let payload = constants.checked_max_payload()?;
        let framer = payload
            .checked_add(constants.checked_frame_overhead()?)
            .ok_or(SizingError::Overflow("framer buffer size"))?;
        let spec = Self::with_sizes(constants, framer, payload);

        let mut total = 0usize;
        for class in SizeClass::ALL {
            let bytes = spec
                .bin(class)
                .checked_total_bytes()
                .ok_or(SizingError::Overflow(match class {
                    SizeClass::Framer => "framer bin total",
                    SizeClass::Deframer => "deframer bin total",
                    SizeClass::Driver => "driver bin total",
                }))?;
            total = total
                .checked_add(bytes)
                .ok_or(SizingError::Overflow("buffer pool total"))?;
        }
        Ok(spec)
    }

    fn with_sizes(constants: &PlatformConstants, framer: usize, payload: usize) -> Self {
        let count = constants.buffers_per_class;
        Self {
            constants: *constants,
            framer: BufferBin {
                buffer_size: framer,
                buffer_count: count,
            },
            deframer: BufferBin {
                buffer_size: payload,
                buffer_count: count,
            },
            driver: BufferBin {
                buffer_size: constants.com_driver_buffer_size,
                buffer_count: count,
            },
        }
    }

    pub fn reference() -> Self {
        Self::compute(&PlatformConstants::REFERENCE)
    }

    pub fn constants(&self) -> &PlatformConstants {
        &self.constants
    }

    pub fn bin(&self, class: SizeClass) -> BufferBin {
        match class {
            SizeClass::Framer => self.framer,
            SizeClass::Deframer => self.deframer,
            SizeClass::Driver => self.driver,
        }
    }

    /// Largest message each class is required to hold.
    pub fn largest_payload(&self, class: SizeClass) -> usize {
        match class {
            SizeClass::Framer => self.constants.max_payload().saturating_add(self.constants.frame_overhead()),
            SizeClass::Deframer => self.constants.max_payload(),
            SizeClass::Driver => self.constants.com_driver_buffer_size,
        }
    }

    /// Bins in buffer-manager order: framer, deframer, driver.
    pub fn bins(&self) -> BufferBins {
        let mut bins = BufferBins::new();
        for class in SizeClass::ALL {
            let _ = bins.push(self.bin(class));
        }
        bins
    }

    pub fn total_bytes(&self) -> usize {
        SizeClass::ALL
            .iter()
            .fold(0usize, |total, class| total.saturating_add(self.bin(*class).total_bytes()))
    }

    /// Smallest class whose buffers fit `size` bytes.
    pub fn bin_for(&self, size: usize) -> Option<SizeClass> {
        SizeClass::ALL
            .into_iter()
            .filter(|class| self.bin(*class).buffer_size >= size)
            .min_by_key(|class| self.bin(*class).buffer_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_bin_sizes() {
        let spec = ResourceSizingSpec::reference();
        assert_eq!(spec.bin(SizeClass::Framer).buffer_size, 528);
        assert_eq!(spec.bin(SizeClass::Deframer).buffer_size, 516);
        assert_eq!(spec.bin(SizeClass::Driver).buffer_size, 3000);
        assert_eq!(spec.bin(SizeClass::Framer).buffer_size, FRAMER_BUFFER_SIZE);
        assert_eq!(spec.bin(SizeClass::Deframer).buffer_size, DEFRAMER_BUFFER_SIZE);
        assert!(SizeClass::ALL.iter().all(|c| spec.bin(*c).buffer_count == 30));
    }

    #[test]
    fn test_bins_order_and_total() {
        let spec = ResourceSizingSpec::reference();
        let bins = spec.bins();
        assert_eq!(bins.len(), 3);
        assert_eq!(bins[0], spec.bin(SizeClass::Framer));
        assert_eq!(bins[2], spec.bin(SizeClass::Driver));
        assert_eq!(spec.total_bytes(), 30 * (528 + 516 + 3000));
    }

    #[test]
    fn test_bin_for_picks_smallest_fit() {
        let spec = ResourceSizingSpec::reference();
        assert_eq!(spec.bin_for(100), Some(SizeClass::Deframer));
        assert_eq!(spec.bin_for(520), Some(SizeClass::Framer));
        assert_eq!(spec.bin_for(2000), Some(SizeClass::Driver));
        assert_eq!(spec.bin_for(3001), None);
    }

    #[test]
    fn test_com_buffer_dominates() {
        let constants = PlatformConstants {
            com_buffer_max_size: 2048,
            ..PlatformConstants::REFERENCE
        };
        let spec = ResourceSizingSpec::compute(&constants);
        assert_eq!(spec.bin(SizeClass::Deframer).buffer_size, 2048);
        assert_eq!(spec.bin(SizeClass::Framer).buffer_size, 2048 + 4 + 8);
    }

    #[test]
    fn test_overflowing_constants_rejected() {
        assert_eq!(
            ResourceSizingSpec::try_compute(&PlatformConstants::REFERENCE),
            Ok(ResourceSizingSpec::reference())
        );

        let wide_file = PlatformConstants {
            file_buffer_max_size: usize::MAX,
            ..PlatformConstants::REFERENCE
        };
        assert_eq!(
            ResourceSizingSpec::try_compute(&wide_file),
            Err(SizingError::Overflow("deframer buffer size"))
        );
        // The unchecked path saturates rather than wrapping to a tiny bin.
        let spec = ResourceSizingSpec::compute(&wide_file);
        assert_eq!(spec.bin(SizeClass::Framer).buffer_size, usize::MAX);
        assert_eq!(spec.total_bytes(), usize::MAX);

        let huge_driver = PlatformConstants {
            com_driver_buffer_size: usize::MAX / 2,
            ..PlatformConstants::REFERENCE
        };
        assert_eq!(
            ResourceSizingSpec::try_compute(&huge_driver),
            Err(SizingError::Overflow("driver bin total"))
        );

        // Each bin fits but the three together do not.
        let crowded = PlatformConstants {
            com_buffer_max_size: usize::MAX / 64,
            com_driver_buffer_size: usize::MAX / 64,
            buffers_per_class: 30,
            ..PlatformConstants::REFERENCE
        };
        assert_eq!(
            ResourceSizingSpec::try_compute(&crowded),
            Err(SizingError::Overflow("buffer pool total"))
        );
    }
}

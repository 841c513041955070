//! User memory access
//!
//! Every user pointer goes through [`check_user_range`] before the kernel
//! copies a single byte. A rejected pointer is an ordinary argument error:
//! it is logged at debug level and reported to the caller, nothing more.

use crate::{KernelError, MemoryManager};
use core_types::{AccessKind, MemoryError, ProcessId, ServiceName, UserRange, SERVICE_NAME_MAX};

/// Validates `[addr, addr + len)` for `access` by `process`
pub fn check_user_range(
    mm: &dyn MemoryManager,
    process: ProcessId,
    addr: u64,
    len: u64,
    access: AccessKind,
) -> Result<UserRange, KernelError> {
    let range = UserRange::new(addr, len).map_err(|err| {
        log::debug!("{}: rejected user range: {}", process, err);
        KernelError::from(err)
    })?;
    if !mm.validate_user_range(process, range, access) {
        log::debug!("{}: {} access to {} not permitted", process, access, range);
        return Err(MemoryError::Unmapped { addr }.into());
    }
    Ok(range)
}

/// Copies `len` bytes in from user space
pub fn copy_in(
    mm: &dyn MemoryManager,
    process: ProcessId,
    addr: u64,
    len: u64,
) -> Result<Vec<u8>, KernelError> {
    let range = check_user_range(mm, process, addr, len, AccessKind::Read)?;
    Ok(mm.copy_from_user(process, range)?)
}

/// Copies `data` out to a range that was already validated for writing
pub fn copy_out(
    mm: &dyn MemoryManager,
    process: ProcessId,
    range: UserRange,
    data: &[u8],
) -> Result<(), KernelError> {
    let target = range.truncated(data.len() as u64);
    Ok(mm.copy_to_user(process, target, &data[..target.len() as usize])?)
}

/// Reads the fixed-width service name buffer at `addr`
///
/// The whole buffer must be readable even if the name is shorter.
pub fn read_service_name(
    mm: &dyn MemoryManager,
    process: ProcessId,
    addr: u64,
) -> Result<ServiceName, KernelError> {
    let bytes = copy_in(mm, process, addr, SERVICE_NAME_MAX as u64)?;
    let mut raw = [0u8; SERVICE_NAME_MAX];
    raw.copy_from_slice(&bytes);
    ServiceName::from_padded(&raw).map_err(|err| {
        log::debug!("{}: rejected service name: {}", process, err);
        KernelError::from(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{PhysicalPages, USER_SPACE_END};
    use parking_lot::Mutex;

    /// One readable page at 0x1000 and one writable page at 0x2000
    struct TwoPages {
        bytes: Mutex<Vec<u8>>,
    }

    impl TwoPages {
        fn new() -> Self {
            Self {
                bytes: Mutex::new(vec![0u8; 0x2000]),
            }
        }
    }

    impl MemoryManager for TwoPages {
        fn validate_user_range(&self, _: ProcessId, range: UserRange, access: AccessKind) -> bool {
            match access {
                AccessKind::Read => range.addr() >= 0x1000 && range.end() <= 0x3000,
                AccessKind::Write => range.addr() >= 0x2000 && range.end() <= 0x3000,
            }
        }

        fn copy_from_user(&self, _: ProcessId, range: UserRange) -> Result<Vec<u8>, MemoryError> {
            let start = (range.addr() - 0x1000) as usize;
            Ok(self.bytes.lock()[start..start + range.len() as usize].to_vec())
        }

        fn copy_to_user(&self, _: ProcessId, range: UserRange, data: &[u8]) -> Result<(), MemoryError> {
            let start = (range.addr() - 0x1000) as usize;
            self.bytes.lock()[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn allocate_frames(&self, pages: u64) -> Result<PhysicalPages, MemoryError> {
            PhysicalPages::zeroed(pages)
        }

        fn map_physical(&self, _: ProcessId, _: u64, _: &PhysicalPages) -> Result<u64, MemoryError> {
            Err(MemoryError::AddressSpaceExhausted { pages: 1 })
        }

        fn unmap(&self, _: ProcessId, addr: u64, _: u64) -> Result<(), MemoryError> {
            Err(MemoryError::Unmapped { addr })
        }
    }

    const PID: ProcessId = ProcessId::new(1);

    #[test]
    fn test_check_user_range_accepts_mapped() {
        let mm = TwoPages::new();
        let range = check_user_range(&mm, PID, 0x1ff0, 32, AccessKind::Read).unwrap();
        assert_eq!(range.len(), 32);
    }

    #[test]
    fn test_check_user_range_rejects_unmapped_and_wrong_access() {
        let mm = TwoPages::new();
        assert!(matches!(
            check_user_range(&mm, PID, 0x0, 16, AccessKind::Read),
            Err(KernelError::BadAddress(MemoryError::Unmapped { .. }))
        ));
        assert!(check_user_range(&mm, PID, 0x1000, 16, AccessKind::Write).is_err());
    }

    #[test]
    fn test_check_user_range_rejects_overflow_and_kernel_half() {
        let mm = TwoPages::new();
        assert!(matches!(
            check_user_range(&mm, PID, u64::MAX - 1, 16, AccessKind::Read),
            Err(KernelError::BadAddress(MemoryError::RangeOverflow { .. }))
        ));
        assert!(matches!(
            check_user_range(&mm, PID, USER_SPACE_END, 1, AccessKind::Read),
            Err(KernelError::BadAddress(MemoryError::OutsideUserSpace { .. }))
        ));
    }

    #[test]
    fn test_read_service_name_requires_full_buffer() {
        let mm = TwoPages::new();
        let range = UserRange::new(0x2000, 8).unwrap();
        copy_out(&mm, PID, range, b"logger\0\0").unwrap();
        assert_eq!(read_service_name(&mm, PID, 0x2000).unwrap().as_str(), "logger");

        // Only 8 readable bytes remain before the end of the mapping
        assert!(read_service_name(&mm, PID, 0x2ff8).is_err());
    }

    #[test]
    fn test_copy_out_truncates_to_data() {
        let mm = TwoPages::new();
        let range = UserRange::new(0x2000, 64).unwrap();
        copy_out(&mm, PID, range, b"abc").unwrap();
        assert_eq!(copy_in(&mm, PID, 0x2000, 4).unwrap(), b"abc\0");
    }
}

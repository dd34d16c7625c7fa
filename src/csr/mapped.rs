//! PCI BAR windows mapped through sysfs `resourceN` files

use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use tracing::{debug, info};

use super::{BarSet, MmioRegion, MAX_BARS};
use crate::device::PciLocation;
use crate::error::{CcipError, CcipResult};

const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// One BAR mapped into the process address space
pub struct MappedBar {
    ptr: *mut u8,
    len: usize,
    phys: u64,
    bar: usize,
}

// SAFETY: the mapping is process-wide and owned exclusively by this value;
// nothing about it is tied to the creating thread.
unsafe impl Send for MappedBar {}

// SAFETY: all access is through volatile 64-bit loads/stores on bounds-checked
// offsets; the hardware serialises concurrent register accesses.
unsafe impl Sync for MappedBar {}

impl std::fmt::Debug for MappedBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBar")
            .field("bar", &self.bar)
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &format_args!("{:#x}", self.len))
            .field("phys", &format_args!("{:#x}", self.phys))
            .finish()
    }
}

impl MappedBar {
    /// Map BAR `bar` of the device at `location`
    pub fn map(location: &PciLocation, bar: usize) -> CcipResult<Self> {
        let dir = device_dir(location);
        let phys = bar_phys_start(&dir, bar)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join(format!("resource{bar}")))?;
        Self::map_file(&file, bar, phys)
    }

    fn map_file(file: &File, bar: usize, phys: u64) -> CcipResult<Self> {
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| CcipError::MissingBar { bar })?;
        if len == 0 {
            return Err(CcipError::MissingBar { bar });
        }

        // SAFETY: a fresh shared mapping of `len` bytes of the BAR file; the
        // kernel validates fd, length and offset and the result is only used
        // through this value until Drop unmaps it.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| CcipError::Io(e.into()))?;

        info!("Mapped BAR{} at {:p}, size={:#x}", bar, ptr, len);
        Ok(Self {
            ptr: ptr.cast(),
            len,
            phys,
            bar,
        })
    }

    pub const fn bar(&self) -> usize {
        self.bar
    }
}

impl MmioRegion for MappedBar {
    fn len(&self) -> usize {
        self.len
    }

    fn read64(&self, offset: usize) -> u64 {
        debug_assert!(offset + 8 <= self.len && offset % 8 == 0);
        // SAFETY: CsrBase checked alignment and bounds; the pointer comes from
        // mmap in map_file and stays valid until Drop.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u64>()) }
    }

    fn write64(&self, offset: usize, value: u64) {
        debug_assert!(offset + 8 <= self.len && offset % 8 == 0);
        // SAFETY: as for read64.
        unsafe { std::ptr::write_volatile(self.ptr.add(offset).cast::<u64>(), value) }
    }

    fn phys_base(&self) -> u64 {
        self.phys
    }
}

impl Drop for MappedBar {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping created in map_file and Drop
        // runs once; no CsrBase outlives the Arc holding this value.
        let _ = unsafe { munmap(self.ptr.cast(), self.len) };
        debug!("Unmapped BAR{}", self.bar);
    }
}

fn device_dir(location: &PciLocation) -> PathBuf {
    Path::new(SYSFS_PCI_DEVICES).join(location.to_string())
}

/// Physical start of `bar` from the sysfs `resource` table
fn bar_phys_start(dir: &Path, bar: usize) -> CcipResult<u64> {
    let table = fs::read_to_string(dir.join("resource"))?;
    table
        .lines()
        .nth(bar)
        .and_then(|line| line.split_whitespace().next())
        .and_then(|start| u64::from_str_radix(start.trim_start_matches("0x"), 16).ok())
        .ok_or(CcipError::MissingBar { bar })
}

/// Map every BAR the device exposes
///
/// BARs without a `resourceN` file are left unmapped.
pub fn map_device_bars(location: &PciLocation) -> CcipResult<BarSet> {
    let dir = device_dir(location);
    let mut bars = BarSet::new();
    for bar in 0..MAX_BARS {
        if !dir.join(format!("resource{bar}")).exists() {
            continue;
        }
        let region = MappedBar::map(location, bar)?;
        bars = bars.with_bar(bar, Arc::new(region))?;
    }
    Ok(bars)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash-resident log-structured storage (C2), backed by the `littlefs2`
//! crate, and the multi-core-safe dispatch every program/erase goes
//! through.
//!
//! `littlefs2::driver::Storage` asks for four device callbacks --
//! `read`/`write`/`erase`/`sync` -- which is exactly the shape
//! `LittleFsStorageManager.h` implements by hand against `lfs.h`; here
//! [`FlashDevice`] is the seam a board-support crate fills in with the
//! real peripheral, and [`LfsAdapter`] is the thin binding from that seam
//! to `littlefs2`'s trait, mirroring `drv/lpc55-flash`'s register-level
//! program/erase primitives one layer up.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use littlefs2::consts;
use littlefs2::driver::Storage as LfsStorage;
use littlefs2::fs::{Allocation, Filesystem};
use littlefs2::io::Result as LfsResult;
use littlefs2::path::Path;

use crate::{auto_mount, Error, FileInfo, LineReader, Storage};

pf_diag::counters!(FlashCounters { program_calls, erase_calls, program_failures, erase_failures });

/// Process-wide flash-programming activity, grounded on the teacher's
/// `drv/lpc55-flash`-style per-operation counters -- kept separate from
/// `pf_event`/`pf_timer`'s counters since flash program/erase failures are
/// the one event spec.md §7 calls out as triggering a state transition
/// (unmount) rather than just a logged outcome.
pub static FLASH_COUNTERS: FlashCounters = FlashCounters::new();

/// The four device callbacks a board-support crate implements against its
/// physical flash peripheral. `program`/`erase` are only ever invoked from
/// inside [`flash_safe_execute`].
pub trait FlashDevice {
    fn read(&mut self, off: usize, buf: &mut [u8]) -> Result<(), Error>;
    fn program(&mut self, off: usize, data: &[u8]) -> Result<(), Error>;
    fn erase(&mut self, off: usize, len: usize) -> Result<(), Error>;
    fn sync(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Parks the other core and all interrupts, runs `f`, then restores state.
/// `f` must be RAM-resident and must not read XIP flash while it runs.
/// Timeout budget is ~1000 ms; a board-support crate that actually owns a
/// second core (e.g. via `rp2040-hal::multicore`) plugs its "park the
/// other core" step in here. On a single-core target this degenerates to
/// disabling interrupts for the duration of `f`, which `critical_section`
/// already gives us.
pub fn flash_safe_execute<T>(f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    critical_section::with(|_cs| f())
}

/// Binds a [`FlashDevice`] to `littlefs2`'s `Storage` trait. Geometry
/// constants are the original's (`READ_SIZE`/`PROG_SIZE` = 256,
/// `BLOCK_SIZE` = 4096, `BLOCK_CYCLES` = 500); `BLOCK_COUNT` is a const
/// generic because the flash region's size is a link-time fact the
/// board-support crate bakes in, not something this binding can discover
/// on its own.
struct LfsAdapter<D: FlashDevice, const BLOCK_COUNT: usize> {
    device: D,
}

impl<D: FlashDevice, const BLOCK_COUNT: usize> LfsStorage for LfsAdapter<D, BLOCK_COUNT> {
    const READ_SIZE: usize = 256;
    const WRITE_SIZE: usize = 256;
    const BLOCK_SIZE: usize = 4096;
    const BLOCK_COUNT: usize = BLOCK_COUNT;
    const BLOCK_CYCLES: isize = 500;
    type CACHE_SIZE = consts::U256;
    type LOOKAHEAD_SIZE = consts::U16;

    fn read(&mut self, off: usize, buf: &mut [u8]) -> LfsResult<usize> {
        self.device
            .read(off, buf)
            .map(|_| buf.len())
            .map_err(|_| littlefs2::io::Error::Io)
    }

    fn write(&mut self, off: usize, data: &[u8]) -> LfsResult<usize> {
        FLASH_COUNTERS.program_calls.increment();
        flash_safe_execute(|| self.device.program(off, data))
            .map(|_| data.len())
            .map_err(|_| {
                FLASH_COUNTERS.program_failures.increment();
                littlefs2::io::Error::Io
            })
    }

    fn erase(&mut self, off: usize, len: usize) -> LfsResult<usize> {
        FLASH_COUNTERS.erase_calls.increment();
        flash_safe_execute(|| self.device.erase(off, len))
            .map(|_| len)
            .map_err(|_| {
                FLASH_COUNTERS.erase_failures.increment();
                littlefs2::io::Error::Io
            })
    }
}

/// The flash back-end. Mounting is validated once at `mount()` time and
/// then re-checked cheaply (a superblock read, not a full re-scan) on
/// every operation -- avoids holding a `Filesystem` borrow of `alloc`
/// across calls, which would make this struct self-referential for no
/// benefit: `littlefs2` mounts are inexpensive by design.
pub struct FlashStorage<D: FlashDevice, const BLOCK_COUNT: usize> {
    adapter: LfsAdapter<D, BLOCK_COUNT>,
    alloc: Allocation<LfsAdapter<D, BLOCK_COUNT>>,
    mounted: bool,
}

impl<D: FlashDevice, const BLOCK_COUNT: usize> FlashStorage<D, BLOCK_COUNT> {
    pub fn new(device: D) -> Self {
        FlashStorage {
            adapter: LfsAdapter { device },
            alloc: Allocation::new(),
            mounted: false,
        }
    }

    fn with_fs<R>(
        &mut self,
        f: impl FnOnce(&mut Filesystem<LfsAdapter<D, BLOCK_COUNT>>) -> LfsResult<R>,
    ) -> Result<R, Error> {
        let mut fs = Filesystem::mount(&mut self.alloc, &mut self.adapter).map_err(|_| Error::Io)?;
        f(&mut fs).map_err(|_| Error::Io)
    }

    fn path(p: &str) -> Result<&Path, Error> {
        Path::from_str_with_nul(p).or_else(|_| Path::from_str(p)).map_err(|_| Error::InvalidPath)
    }

    /// spec.md §7: "Flash programming failure triggers unmount and a
    /// `NotMounted` state until remounted." `auto_mount` (called at the
    /// start of every write-shaped operation) then lazily remounts on the
    /// caller's next call.
    fn unmount_on_program_failure<T>(&mut self, result: &Result<T, Error>) {
        if result.is_err() {
            self.mounted = false;
        }
    }
}

impl<D: FlashDevice, const BLOCK_COUNT: usize> Storage for FlashStorage<D, BLOCK_COUNT> {
    fn mount(&mut self) -> Result<(), Error> {
        self.with_fs(|_fs| Ok(()))?;
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), Error> {
        self.mounted = false;
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn exists(&mut self, path: &str) -> Result<bool, Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        self.with_fs(|fs| match fs.metadata(p) {
            Ok(_) => Ok(true),
            Err(littlefs2::io::Error::NoSuchEntry) => Ok(false),
            Err(e) => Err(e),
        })
    }

    fn remove(&mut self, path: &str) -> Result<(), Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        let result = self.with_fs(|fs| fs.remove(p));
        self.unmount_on_program_failure(&result);
        result
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), Error> {
        auto_mount(self)?;
        let from = Self::path(from)?;
        let to = Self::path(to)?;
        let result = self.with_fs(|fs| fs.rename(from, to));
        self.unmount_on_program_failure(&result);
        result
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        self.with_fs(|fs| {
            fs.open_file_and_then(p, |file| {
                let mut out = Vec::new();
                let mut chunk = [0u8; 256];
                loop {
                    let n = file.read(&mut chunk)?;
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&chunk[..n]);
                }
                Ok(out)
            })
        })
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        let result = self.with_fs(|fs| {
            fs.open_file_with_options_and_then(
                |o| o.write(true).create(true).truncate(true),
                p,
                |file| file.write(data).map(|_| ()),
            )
        });
        self.unmount_on_program_failure(&result);
        result
    }

    fn append_to_file(&mut self, path: &str, data: &[u8]) -> Result<(), Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        let result = self.with_fs(|fs| {
            fs.open_file_with_options_and_then(
                |o| o.write(true).create(true).append(true),
                p,
                |file| file.write(data).map(|_| ()),
            )
        });
        self.unmount_on_program_failure(&result);
        result
    }

    fn read_file_string(&mut self, path: &str, start: usize, len: usize) -> Result<String, Error> {
        let bytes = self.read_file(path)?;
        let end = (start + len).min(bytes.len());
        let start = start.min(end);
        Ok(String::from_utf8_lossy(&bytes[start..end]).into_owned())
    }

    fn stream_file(&mut self, path: &str, chunk_cb: &mut dyn FnMut(&[u8])) -> Result<(), Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        self.with_fs(|fs| {
            fs.open_file_and_then(p, |file| {
                let mut chunk = [0u8; 256];
                loop {
                    let n = file.read(&mut chunk)?;
                    if n == 0 {
                        break;
                    }
                    chunk_cb(&chunk[..n]);
                }
                Ok(())
            })
        })
    }

    fn get_file_size(&mut self, path: &str) -> Result<usize, Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        self.with_fs(|fs| fs.metadata(p).map(|m| m.len()))
    }

    fn list_directory(&mut self, path: &str) -> Result<Vec<FileInfo>, Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        self.with_fs(|fs| {
            fs.read_dir_and_then(p, |entries| {
                let mut out = Vec::new();
                for entry in entries {
                    let entry = entry?;
                    out.push(FileInfo {
                        name: entry.file_name().as_str().to_string(),
                        is_directory: entry.file_type().is_dir(),
                        is_read_only: false,
                        size: entry.metadata().len(),
                    });
                }
                Ok(out)
            })
        })
    }

    fn create_directory(&mut self, path: &str) -> Result<(), Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        let result = self.with_fs(|fs| fs.create_dir_all(p));
        self.unmount_on_program_failure(&result);
        result
    }

    fn remove_directory(&mut self, path: &str) -> Result<(), Error> {
        auto_mount(self)?;
        let p = Self::path(path)?;
        let result = self.with_fs(|fs| fs.remove(p));
        self.unmount_on_program_failure(&result);
        result
    }

    fn format_storage(&mut self) -> Result<(), Error> {
        let result = flash_safe_execute(|| Filesystem::format(&mut self.adapter).map_err(|_| Error::Io));
        if result.is_err() {
            self.mounted = false;
            return result;
        }
        self.mount()
    }

    fn open_reader(&mut self, path: &str) -> Result<LineReader, Error> {
        let bytes = self.read_file(path)?;
        Ok(LineReader::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_COUNT: usize = 16;
    const REGION_SIZE: usize = BLOCK_COUNT * 4096;

    /// A RAM-backed stand-in for the real NOR part, erased state is
    /// `0xFF` exactly like flash. `program_should_fail`/`erase_should_fail`
    /// let tests exercise the unmount-on-failure path (spec.md §7) without
    /// a real device that can be coaxed into failing on demand.
    struct FakeFlashDevice {
        bytes: alloc::boxed::Box<[u8; REGION_SIZE]>,
        program_should_fail: bool,
    }

    impl FakeFlashDevice {
        fn new() -> Self {
            FakeFlashDevice {
                bytes: alloc::boxed::Box::new([0xFFu8; REGION_SIZE]),
                program_should_fail: false,
            }
        }
    }

    impl FlashDevice for FakeFlashDevice {
        fn read(&mut self, off: usize, buf: &mut [u8]) -> Result<(), Error> {
            buf.copy_from_slice(&self.bytes[off..off + buf.len()]);
            Ok(())
        }

        fn program(&mut self, off: usize, data: &[u8]) -> Result<(), Error> {
            if self.program_should_fail {
                return Err(Error::Io);
            }
            self.bytes[off..off + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn erase(&mut self, off: usize, len: usize) -> Result<(), Error> {
            for b in &mut self.bytes[off..off + len] {
                *b = 0xFF;
            }
            Ok(())
        }
    }

    fn new_storage() -> FlashStorage<FakeFlashDevice, BLOCK_COUNT> {
        let mut storage = FlashStorage::new(FakeFlashDevice::new());
        storage.format_storage().unwrap();
        storage
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut storage = new_storage();
        storage.write_file("/x", b"hello").unwrap();
        assert_eq!(storage.read_file("/x").unwrap(), b"hello");
    }

    #[test]
    fn append_extends_the_file() {
        let mut storage = new_storage();
        storage.write_file("/log", b"ab").unwrap();
        storage.append_to_file("/log", b"cd").unwrap();
        assert_eq!(storage.read_file("/log").unwrap(), b"abcd");
    }

    #[test]
    fn format_clears_every_previously_written_path() {
        let mut storage = new_storage();
        storage.write_file("/x", &[b'a'; 4096]).unwrap();
        assert!(storage.exists("/x").unwrap());

        storage.format_storage().unwrap();
        assert!(!storage.exists("/x").unwrap());

        storage.write_file("/x", &[0x01]).unwrap();
        assert_eq!(storage.read_file("/x").unwrap(), &[0x01]);
    }

    #[test]
    fn remove_and_rename() {
        let mut storage = new_storage();
        storage.write_file("/a", b"1").unwrap();
        storage.rename("/a", "/b").unwrap();
        assert!(!storage.exists("/a").unwrap());
        assert_eq!(storage.read_file("/b").unwrap(), b"1");
        storage.remove("/b").unwrap();
        assert!(!storage.exists("/b").unwrap());
    }

    #[test]
    fn list_directory_reports_written_files() {
        let mut storage = new_storage();
        storage.write_file("/one.txt", b"1").unwrap();
        storage.write_file("/two.txt", b"22").unwrap();
        let mut names: Vec<_> = storage
            .list_directory("/")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, ["one.txt", "two.txt"]);
    }

    #[test]
    fn program_failure_unmounts_until_remounted() {
        let mut storage = new_storage();
        storage.adapter.device.program_should_fail = true;
        assert!(storage.write_file("/x", b"boom").is_err());
        assert!(!storage.is_mounted());

        // Auto-mount lazily remounts for the next call.
        storage.adapter.device.program_should_fail = false;
        storage.exists("/x").unwrap();
        assert!(storage.is_mounted());
    }

    #[test]
    fn auto_mount_happens_lazily_on_first_operation() {
        let mut storage = new_storage();
        storage.unmount().unwrap();
        assert!(!storage.is_mounted());

        assert!(!storage.exists("/nope").unwrap());
        assert!(storage.is_mounted(), "exists() should have lazily remounted");
    }
}

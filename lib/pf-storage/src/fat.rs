// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FAT-on-SDIO back-end (C3): a thin adapter over `embedded-sdmmc`.
//!
//! No teacher crate talks to a FAT filesystem, so this is enriched from
//! the rest of the pack rather than grounded in `oxidecomputer-hubris`
//! directly; `embedded-sdmmc` is the idiomatic no_std FAT implementation
//! and plays the same "thin adapter over a third-party driver" role the
//! original's `FatFsStorageManager` (implied by `StorageManager.h`'s
//! shared interface) plays over its vendor FAT library. Internal
//! serialization mirrors the mutex-guarded access pattern the teacher uses
//! for its own shared SPI-attached flash parts.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use critical_section::Mutex;
use embedded_sdmmc::{BlockDevice, Mode, TimeSource, Timestamp, Volume, VolumeIdx, VolumeManager};

use crate::{auto_mount, Error, FileInfo, LineReader, Storage};

const KNOWN_PROBE_DIR: &str = "SYSTEM";

/// The FAT back-end. `mount`ing is idempotent, and re-validates the mount
/// by probing [`KNOWN_PROBE_DIR`] exactly as the original's
/// `autoMountIfNeeded` does, creating it on first mount so later probes
/// succeed.
pub struct FatStorage<D: BlockDevice, const MAX_DIRS: usize = 4, const MAX_FILES: usize = 4> {
    inner: Mutex<RefCell<VolumeManager<D, FixedTimeSource, MAX_DIRS, MAX_FILES, 1>>>,
    mounted: bool,
}

/// `VolumeManager` owns its `TimeSource` for the lifetime of the struct,
/// which doesn't fit threading the framework's `&dyn Clock` through per
/// call; directory-entry timestamps are the only place this matters, and
/// FAT's one-second timestamp resolution makes a fixed epoch an acceptable
/// placeholder until a board-support crate wants to wire in real time.
#[derive(Clone, Copy, Default)]
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 0,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

impl<D: BlockDevice, const MAX_DIRS: usize, const MAX_FILES: usize>
    FatStorage<D, MAX_DIRS, MAX_FILES>
{
    pub fn new(device: D) -> Self {
        FatStorage {
            inner: Mutex::new(RefCell::new(VolumeManager::new(device, FixedTimeSource))),
            mounted: false,
        }
    }

    fn with_root<R>(
        &mut self,
        f: impl FnOnce(&mut VolumeManager<D, FixedTimeSource, MAX_DIRS, MAX_FILES, 1>, &mut Volume<'_, D, FixedTimeSource, MAX_DIRS, MAX_FILES, 1>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        critical_section::with(|cs| {
            let mut mgr = self.inner.borrow(cs).borrow_mut();
            let mut volume = mgr.open_volume(VolumeIdx(0)).map_err(|_| Error::Io)?;
            f(&mut mgr, &mut volume)
        })
    }
}

impl<D: BlockDevice, const MAX_DIRS: usize, const MAX_FILES: usize> Storage
    for FatStorage<D, MAX_DIRS, MAX_FILES>
{
    fn mount(&mut self) -> Result<(), Error> {
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            if root.find_directory_entry(KNOWN_PROBE_DIR).is_err() {
                root.make_dir_in_dir(KNOWN_PROBE_DIR).map_err(|_| Error::Io)?;
            }
            Ok(())
        })?;
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
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            Ok(root.find_directory_entry(path).is_ok())
        })
    }

    fn remove(&mut self, path: &str) -> Result<(), Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            root.delete_file_in_dir(path).map_err(|_| Error::Io)
        })
    }

    fn rename(&mut self, _from: &str, _to: &str) -> Result<(), Error> {
        // embedded-sdmmc has no atomic rename; callers needing it compose
        // read + write + remove themselves. Left unsupported rather than
        // faked with a non-atomic copy that could silently lose data on a
        // power cut mid-"rename".
        Err(Error::Unsupported)
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            let mut file = root.open_file_in_dir(path, Mode::ReadOnly).map_err(|_| Error::Io)?;
            let mut out = Vec::new();
            let mut chunk = [0u8; 512];
            while !file.is_eof() {
                let n = file.read(&mut chunk).map_err(|_| Error::Io)?;
                out.extend_from_slice(&chunk[..n]);
            }
            Ok(out)
        })
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            let mut file = root
                .open_file_in_dir(path, Mode::ReadWriteCreateOrTruncate)
                .map_err(|_| Error::Io)?;
            file.write(data).map_err(|_| Error::Io)
        })
    }

    fn append_to_file(&mut self, path: &str, data: &[u8]) -> Result<(), Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            let mut file = root
                .open_file_in_dir(path, Mode::ReadWriteCreateOrAppend)
                .map_err(|_| Error::Io)?;
            file.write(data).map_err(|_| Error::Io)
        })
    }

    fn read_file_string(&mut self, path: &str, start: usize, len: usize) -> Result<String, Error> {
        let bytes = self.read_file(path)?;
        let end = (start + len).min(bytes.len());
        let start = start.min(end);
        Ok(String::from_utf8_lossy(&bytes[start..end]).into_owned())
    }

    fn stream_file(&mut self, path: &str, chunk_cb: &mut dyn FnMut(&[u8])) -> Result<(), Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            let mut file = root.open_file_in_dir(path, Mode::ReadOnly).map_err(|_| Error::Io)?;
            let mut chunk = [0u8; 512];
            while !file.is_eof() {
                let n = file.read(&mut chunk).map_err(|_| Error::Io)?;
                chunk_cb(&chunk[..n]);
            }
            Ok(())
        })
    }

    fn get_file_size(&mut self, path: &str) -> Result<usize, Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            let entry = root.find_directory_entry(path).map_err(|_| Error::NotFound)?;
            Ok(entry.size as usize)
        })
    }

    fn list_directory(&mut self, path: &str) -> Result<Vec<FileInfo>, Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            let mut dir = if path.is_empty() || path == "/" {
                root
            } else {
                root.open_dir(path).map_err(|_| Error::Io)?
            };
            let mut out = Vec::new();
            dir.iterate_dir(|entry| {
                out.push(FileInfo {
                    name: entry.name.to_string(),
                    is_directory: entry.attributes.is_directory(),
                    is_read_only: entry.attributes.is_read_only(),
                    size: entry.size as usize,
                });
            })
            .map_err(|_| Error::Io)?;
            Ok(out)
        })
    }

    fn create_directory(&mut self, path: &str) -> Result<(), Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            root.make_dir_in_dir(path).map_err(|_| Error::Io)
        })
    }

    fn remove_directory(&mut self, path: &str) -> Result<(), Error> {
        auto_mount(self)?;
        self.with_root(|_mgr, volume| {
            let mut root = volume.open_root_dir().map_err(|_| Error::Io)?;
            root.delete_file_in_dir(path).map_err(|_| Error::Io)
        })
    }

    fn format_storage(&mut self) -> Result<(), Error> {
        // embedded-sdmmc doesn't implement a FAT formatter; reformatting
        // an SD card from the device side is out of this crate's scope the
        // same way board bring-up is (an operator reformats via a host).
        Err(Error::Unsupported)
    }

    fn open_reader(&mut self, path: &str) -> Result<LineReader, Error> {
        let bytes = self.read_file(path)?;
        Ok(LineReader::new(bytes))
    }
}

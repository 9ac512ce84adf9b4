// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The storage abstraction: one `Storage` trait, two back-ends.
//!
//! Grounded on `StorageManager.h`'s virtual base class -- `mount`,
//! `exists`/`remove`/`rename`, `readFile`/`writeFile`/`appendToFile`,
//! `streamFile`, directory listing, and a line-oriented reader -- dispatched
//! through the trait rather than a vtable, with [`flash::FlashStorage`] and
//! [`fat::FatStorage`] as its two implementations.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod fat;
pub mod flash;
pub mod line_reader;

use alloc::string::String;
use alloc::vec::Vec;

pub use line_reader::LineReader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    NotMounted,
    AlreadyMounted,
    NotFound,
    InvalidPath,
    Io,
    /// `formatStorage`/flash program/erase exceeded its ~1000 ms budget.
    Timeout,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub is_directory: bool,
    pub is_read_only: bool,
    pub size: usize,
}

/// The common surface both back-ends implement. Dispatch is through this
/// trait, not a back-end-specific inherent API, matching the original's
/// "virtual StorageManager base" -- `formatStorage` stays on the common
/// surface (rather than a flash-only extension trait) because both
/// back-ends support it, even though the FAT back-end's implementation is
/// just a full erase-and-remount.
pub trait Storage {
    fn mount(&mut self) -> Result<(), Error>;
    fn unmount(&mut self) -> Result<(), Error>;
    fn is_mounted(&self) -> bool;

    fn exists(&mut self, path: &str) -> Result<bool, Error>;
    fn remove(&mut self, path: &str) -> Result<(), Error>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Error>;

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Error>;
    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), Error>;
    fn append_to_file(&mut self, path: &str, data: &[u8]) -> Result<(), Error>;

    /// Reads `len` bytes starting at `start` as a `String`, for handlers
    /// that want a text slice of a file without loading the whole thing.
    fn read_file_string(&mut self, path: &str, start: usize, len: usize) -> Result<String, Error>;

    /// Streams the whole file through `chunk_cb`, one read-sized chunk at
    /// a time, instead of buffering it in memory.
    fn stream_file(&mut self, path: &str, chunk_cb: &mut dyn FnMut(&[u8])) -> Result<(), Error>;

    fn get_file_size(&mut self, path: &str) -> Result<usize, Error>;
    fn list_directory(&mut self, path: &str) -> Result<Vec<FileInfo>, Error>;
    fn create_directory(&mut self, path: &str) -> Result<(), Error>;
    fn remove_directory(&mut self, path: &str) -> Result<(), Error>;

    fn format_storage(&mut self) -> Result<(), Error>;

    fn open_reader(&mut self, path: &str) -> Result<LineReader, Error>;
}

/// `exists`/`read_file`/`write_file`/`list_directory` all funnel through
/// this so every back-end gets identical lazy-mount behavior without
/// repeating the check.
pub(crate) fn auto_mount(storage: &mut impl Storage) -> Result<(), Error> {
    if !storage.is_mounted() {
        storage.mount()?;
    }
    Ok(())
}

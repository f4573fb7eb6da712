// Copyright 2024 Cody Marlow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Directory & entry model: a directory is a stream whose payload is a
//! packed array of fixed-size [`RawDirEntry`] records.

use tinyfat_err::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::alloc::{alloc_block, free_chain};
use crate::region::{Region, MAX_NAME_SIZE};
use crate::stream::{append_stream, read_stream, remove_range, stream_size};

pub const ENTRY_SIZE: usize = core::mem::size_of::<RawDirEntry>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    fn to_raw(self) -> u8 {
        match self {
            EntryKind::Directory => 0,
            EntryKind::File => 1,
        }
    }

    fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(EntryKind::Directory),
            1 => Ok(EntryKind::File),
            _ => {
                log::error!("directory entry has unrecognised kind byte {raw}");
                Err(Error::Corrupt)
            }
        }
    }
}

/// The on-region layout of one directory entry: 64 bytes, 8-byte aligned so
/// the `i64` timestamp fields never straddle a padding gap. Field order is
/// chosen so no manual padding is needed between members — only a trailing
/// pad to round the struct up to a multiple of its own alignment.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawDirEntry {
    pub name: [u8; MAX_NAME_SIZE],
    pub head_block: u32,
    pub kind: u8,
    _reserved: [u8; 3],
    pub atime_secs: i64,
    pub mtime_secs: i64,
    pub atime_nanos: u32,
    pub mtime_nanos: u32,
}

/// An owned, decoded directory entry — what callers above the dirent layer
/// actually work with.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub head_block: u32,
    pub atime: (i64, u32),
    pub mtime: (i64, u32),
}

impl Entry {
    fn from_raw(raw: &RawDirEntry) -> Result<Self> {
        Ok(Entry {
            name: decode_name(&raw.name)?,
            kind: EntryKind::from_raw(raw.kind)?,
            head_block: raw.head_block,
            atime: (raw.atime_secs, raw.atime_nanos),
            mtime: (raw.mtime_secs, raw.mtime_nanos),
        })
    }

    fn to_raw(&self) -> Result<RawDirEntry> {
        Ok(RawDirEntry {
            name: encode_name(&self.name)?,
            head_block: self.head_block,
            kind: self.kind.to_raw(),
            _reserved: [0; 3],
            atime_secs: self.atime.0,
            atime_nanos: self.atime.1,
            mtime_secs: self.mtime.0,
            mtime_nanos: self.mtime.1,
        })
    }
}

/// Encodes `name` into a 32-byte NUL-terminated field. A name that exactly
/// fills the 32 bytes with no room for the terminator is illegal, per
/// spec — the effective limit is 31 bytes.
pub fn encode_name(name: &str) -> Result<[u8; MAX_NAME_SIZE]> {
    let bytes = name.as_bytes();
    if bytes.len() >= MAX_NAME_SIZE || bytes.contains(&0) {
        return Err(Error::NameTooLong);
    }
    let mut out = [0u8; MAX_NAME_SIZE];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn decode_name(raw: &[u8; MAX_NAME_SIZE]) -> Result<String> {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_SIZE);
    core::str::from_utf8(&raw[..len])
        .map(str::to_owned)
        .map_err(|_| {
            log::error!("directory entry name is not valid UTF-8");
            Error::Corrupt
        })
}

/// Reads the full array of entries out of directory `head`'s stream. The
/// stream's size must be a multiple of [`ENTRY_SIZE`]; anything else means
/// the region is corrupt.
pub fn list_entries(region: &Region, head: u32) -> Result<Vec<Entry>> {
    let size = stream_size(region, head)? as usize;
    if size % ENTRY_SIZE != 0 {
        log::error!("directory stream at block {head} has size {size}, not a multiple of {ENTRY_SIZE}");
        return Err(Error::Corrupt);
    }

    let mut raw_bytes = vec![0u8; size];
    read_stream(region, head, 0, &mut raw_bytes)?;

    let mut entries = Vec::with_capacity(size / ENTRY_SIZE);
    for chunk in raw_bytes.chunks_exact(ENTRY_SIZE) {
        let raw = RawDirEntry::ref_from_bytes(chunk)
            .expect("chunk is exactly sizeof(RawDirEntry) bytes");
        entries.push(Entry::from_raw(raw)?);
    }
    Ok(entries)
}

/// First exact-match entry by name, with its index in the directory.
pub fn find_entry(region: &Region, head: u32, name: &str) -> Result<Option<(usize, Entry)>> {
    let entries = list_entries(region, head)?;
    Ok(entries
        .into_iter()
        .enumerate()
        .find(|(_, entry)| entry.name == name))
}

/// Allocates a fresh head block for the new entity and appends its entry to
/// directory `dir`. `kind == Directory` entries get an empty directory
/// stream; `kind == File` entries get a zero-length stream.
pub fn create_entry(
    region: &mut Region,
    dir: u32,
    name: &str,
    kind: EntryKind,
    now: (i64, u32),
) -> Result<u32> {
    let head_block = alloc_block(region)?;
    let entry = Entry {
        name: name.to_owned(),
        kind,
        head_block,
        atime: now,
        mtime: now,
    };
    let raw = entry.to_raw()?;
    if let Err(err) = append_stream(region, dir, raw.as_bytes()) {
        // Roll back the allocation so a failed mknod/mkdir doesn't leak a
        // block that no directory entry will ever reference again.
        let _ = free_chain(region, head_block);
        return Err(err);
    }
    Ok(head_block)
}

/// Frees entry `index`'s own chain and removes its record from `dir`'s
/// stream.
pub fn delete_entry(region: &mut Region, dir: u32, index: usize) -> Result<()> {
    let entries = list_entries(region, dir)?;
    let entry = entries
        .get(index)
        .ok_or(Error::Corrupt)?;
    free_chain(region, entry.head_block)?;
    remove_range(region, dir, index * ENTRY_SIZE, ENTRY_SIZE)
}

/// Removes entry `index`'s record from `dir`'s stream *without* freeing its
/// chain — used by `rename`, which relocates the record into a different
/// directory rather than destroying the entity it names.
pub fn remove_entry_record(region: &mut Region, dir: u32, index: usize) -> Result<()> {
    remove_range(region, dir, index * ENTRY_SIZE, ENTRY_SIZE)
}

/// Overwrites entry `index` in place with `entry` (used by `rename` and
/// `utimens`, which both need to persist a changed record back into the
/// parent directory's stream rather than a throwaway copy).
pub fn write_entry_at(region: &mut Region, dir: u32, index: usize, entry: &Entry) -> Result<()> {
    let raw = entry.to_raw()?;
    let offset = index * ENTRY_SIZE;
    crate::stream::write_stream(region, dir, offset as u64, raw.as_bytes())?;
    Ok(())
}

/// Appends an already-constructed entry verbatim (used by `rename` to move
/// an entry into a new parent without reallocating its head block).
pub fn append_entry(region: &mut Region, dir: u32, entry: &Entry) -> Result<()> {
    let raw = entry.to_raw()?;
    append_stream(region, dir, raw.as_bytes())?;
    Ok(())
}

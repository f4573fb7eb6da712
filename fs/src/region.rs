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

//! The region: a single contiguous byte slice that *is* the filesystem.
//!
//! Nothing outside of [`Region`] ever stores a reference into the backing
//! bytes across a call boundary; every accessor recomputes the relevant
//! offset from `self.bytes` each time it's asked, which is what makes the
//! whole format safe to remap at a different virtual address (spec design
//! note: "region + typed accessor by offset").

use tinyfat_err::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// `0x00000005C1F16546` read as a native-endian `u64`, marking an
/// initialised region. Host-endian only: the format does not claim to be
/// portable across endian-differing hosts, same as a local mmap file never
/// needs to be.
pub const MAGIC: u64 = 0x0000_0005_c1f1_6546;

pub const HEADER_SIZE: usize = 8;
pub const BLOCK_SIZE: usize = 4096;
pub const FAT_ENTRY_SIZE: usize = 8;
pub const MAX_NAME_SIZE: usize = 32;
pub const MAX_PATH_LEN: usize = 255;

/// Block 0 is always allocated and is the root directory's head; it can
/// never be handed out by the allocator and never freed.
pub const ROOT_BLOCK: u32 = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FatEntry {
    pub used_size: u16,
    pub is_used: u16,
    pub next_block: u32,
}

impl FatEntry {
    pub const fn free() -> Self {
        FatEntry {
            used_size: 0,
            is_used: 0,
            next_block: 0,
        }
    }
}

/// A view over the region's bytes, with accessors for the FAT array and the
/// data blocks. Never holds a borrow longer than the call that needs it.
pub struct Region<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Region<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Region { bytes }
    }

    pub fn fssize(&self) -> usize {
        self.bytes.len()
    }

    /// `N = (fssize - 8) / (8 + 4096)`.
    pub fn fat_count(&self) -> usize {
        fat_count(self.fssize())
    }

    fn data_offset(&self) -> usize {
        HEADER_SIZE + self.fat_count() * FAT_ENTRY_SIZE
    }

    fn magic(&self) -> u64 {
        u64::from_ne_bytes(self.bytes[0..HEADER_SIZE].try_into().unwrap())
    }

    fn set_magic(&mut self, magic: u64) {
        self.bytes[0..HEADER_SIZE].copy_from_slice(&magic.to_ne_bytes());
    }

    /// Idempotent. If the magic is already present, does nothing; otherwise
    /// writes the magic, zeroes every FAT entry, and marks block 0 as
    /// allocated with `used_size = 0`.
    pub fn bootstrap(&mut self) {
        if self.magic() == MAGIC {
            return;
        }

        log::debug!("bootstrapping fresh region ({} bytes)", self.fssize());
        self.set_magic(MAGIC);
        let fat_count = self.fat_count();
        for i in 0..fat_count {
            *self.fat_entry_mut(i) = FatEntry::free();
        }
        self.fat_entry_mut(ROOT_BLOCK as usize).is_used = 1;
    }

    fn fat_entry_offset(&self, block: u32) -> usize {
        HEADER_SIZE + block as usize * FAT_ENTRY_SIZE
    }

    pub fn fat_entry(&self, block: u32) -> &FatEntry {
        let off = self.fat_entry_offset(block);
        FatEntry::ref_from_bytes(&self.bytes[off..off + FAT_ENTRY_SIZE])
            .expect("FatEntry is 8 bytes, naturally aligned within the FAT array")
    }

    pub fn fat_entry_mut(&mut self, block: u32) -> &mut FatEntry {
        let off = self.fat_entry_offset(block);
        FatEntry::mut_from_bytes(&mut self.bytes[off..off + FAT_ENTRY_SIZE])
            .expect("FatEntry is 8 bytes, naturally aligned within the FAT array")
    }

    fn block_offset(&self, block: u32) -> usize {
        self.data_offset() + block as usize * BLOCK_SIZE
    }

    pub fn block(&self, block: u32) -> &[u8] {
        let off = self.block_offset(block);
        &self.bytes[off..off + BLOCK_SIZE]
    }

    pub fn block_mut(&mut self, block: u32) -> &mut [u8] {
        let off = self.block_offset(block);
        &mut self.bytes[off..off + BLOCK_SIZE]
    }

    /// Checks that `block` is within range and allocated; used to validate
    /// every chain link we follow so a corrupt FAT produces
    /// [`Error::Corrupt`] rather than an out-of-bounds slice.
    pub fn check_allocated(&self, block: u32) -> Result<()> {
        if block as usize >= self.fat_count() {
            log::error!("block {block} is out of range (fat_count = {})", self.fat_count());
            return Err(Error::Corrupt);
        }
        if self.fat_entry(block).is_used == 0 {
            log::error!("block {block} referenced but not marked allocated");
            return Err(Error::Corrupt);
        }
        Ok(())
    }
}

pub const fn fat_count(fssize: usize) -> usize {
    (fssize - HEADER_SIZE) / (FAT_ENTRY_SIZE + BLOCK_SIZE)
}

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

//! FAT-style block allocator: first-fit allocation, iterative chain freeing.

use tinyfat_err::{Error, Result};

use crate::region::{FatEntry, Region};

/// First index with `is_used == 0`, marked allocated and zeroed. Block 0 is
/// the permanent root and is never handed out here because `bootstrap`
/// marks it used for the lifetime of the region.
pub fn alloc_block(region: &mut Region) -> Result<u32> {
    let fat_count = region.fat_count();
    for i in 0..fat_count {
        let block = i as u32;
        if region.fat_entry(block).is_used == 0 {
            *region.fat_entry_mut(block) = FatEntry {
                used_size: 0,
                is_used: 1,
                next_block: 0,
            };
            return Ok(block);
        }
    }
    log::warn!("allocator exhausted ({fat_count} blocks)");
    Err(Error::NoSpace)
}

/// Walks `next_block` links starting at `head`, clearing each visited entry.
/// Iterative so a pathologically long chain (up to `fat_count` blocks)
/// cannot blow the stack. Safe to call on an already-free chain: clearing a
/// free entry is a no-op.
///
/// `head` itself is freed too — callers that must keep the head block alive
/// (directory streams whose index is referenced elsewhere) use
/// [`free_chain_tail`] instead.
pub fn free_chain(region: &mut Region, head: u32) -> Result<()> {
    let mut block = head;
    let fat_count = region.fat_count();
    for _ in 0..=fat_count {
        region.check_allocated(block)?;
        let next = region.fat_entry(block).next_block;
        *region.fat_entry_mut(block) = FatEntry::free();
        if next == 0 {
            return Ok(());
        }
        block = next;
    }
    log::error!("block chain starting at {head} did not terminate within {fat_count} steps");
    Err(Error::Corrupt)
}

/// Frees every block in the chain *after* `head`, leaving `head` itself
/// allocated with `used_size = 0` and no successor. Used by
/// `remove_range`/`truncate_stream`, which must preserve the head block's
/// identity.
pub fn free_chain_tail(region: &mut Region, head: u32) -> Result<()> {
    region.check_allocated(head)?;
    let next = region.fat_entry(head).next_block;
    region.fat_entry_mut(head).next_block = 0;
    region.fat_entry_mut(head).used_size = 0;
    if next != 0 {
        free_chain(region, next)?;
    }
    Ok(())
}

/// Number of FAT entries with `is_used == 0`.
pub fn free_count(region: &Region) -> usize {
    (0..region.fat_count())
        .filter(|&i| region.fat_entry(i as u32).is_used == 0)
        .count()
}

/// Every block index in the chain starting at `head`, in link order.
/// Bounds the walk at `fat_count` steps so a cyclic chain surfaces as
/// [`Error::Corrupt`] instead of looping forever.
pub fn chain_blocks(region: &Region, head: u32) -> Result<Vec<u32>> {
    let mut blocks = Vec::new();
    let mut block = head;
    let fat_count = region.fat_count();
    for _ in 0..=fat_count {
        region.check_allocated(block)?;
        blocks.push(block);
        let next = region.fat_entry(block).next_block;
        if next == 0 {
            return Ok(blocks);
        }
        block = next;
    }
    log::error!("block chain starting at {head} did not terminate within {fat_count} steps");
    Err(Error::Corrupt)
}

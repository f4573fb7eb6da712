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

//! Byte-stream layer: read/write/append/truncate a logical byte stream
//! identified by its head block, crossing block boundaries, growing the
//! chain on demand, and zero-filling holes.

use tinyfat_err::{Error, Result};

use crate::alloc::{alloc_block, chain_blocks, free_chain, free_count};
use crate::region::{Region, BLOCK_SIZE};

/// Sum of `used_size` across the chain starting at `head`.
pub fn stream_size(region: &Region, head: u32) -> Result<u64> {
    let mut total = 0u64;
    let mut block = head;
    let fat_count = region.fat_count();
    for _ in 0..=fat_count {
        region.check_allocated(block)?;
        total += region.fat_entry(block).used_size as u64;
        let next = region.fat_entry(block).next_block;
        if next == 0 {
            return Ok(total);
        }
        block = next;
    }
    log::error!("block chain starting at {head} did not terminate within {fat_count} steps");
    Err(Error::Corrupt)
}

/// Copies up to `out.len()` bytes starting at `offset` into `out`, returning
/// the number of bytes actually copied. A short read (including zero) means
/// end of stream; it is never itself an error.
pub fn read_stream(region: &Region, head: u32, offset: u64, out: &mut [u8]) -> Result<usize> {
    if out.is_empty() {
        return Ok(0);
    }

    let mut copied = 0usize;
    let mut traversed = 0u64;
    let mut block = head;
    let fat_count = region.fat_count();
    for _ in 0..=fat_count {
        region.check_allocated(block)?;
        let used = region.fat_entry(block).used_size as u64;
        let block_start = traversed;
        let block_end = traversed + used;
        if offset < block_end && copied < out.len() {
            let start_in_block = (offset.max(block_start) - block_start) as usize;
            let avail = (used as usize) - start_in_block;
            let n = avail.min(out.len() - copied);
            let data = region.block(block);
            out[copied..copied + n].copy_from_slice(&data[start_in_block..start_in_block + n]);
            copied += n;
        }
        traversed = block_end;
        if copied >= out.len() {
            return Ok(copied);
        }
        let next = region.fat_entry(block).next_block;
        if next == 0 {
            return Ok(copied);
        }
        block = next;
    }
    log::error!("block chain starting at {head} did not terminate within {fat_count} steps");
    Err(Error::Corrupt)
}

/// Writes `buf` starting at `offset`, extending the chain and zero-filling
/// any hole up to `offset` as it goes. Returns the number of bytes written,
/// which is always `buf.len()`.
///
/// Checked up front against [`free_count`] so that a write that can't fit
/// fails with [`Error::NoSpace`] before touching a single byte of the
/// region, rather than partway through — spec.md §7 requires every op to
/// leave the region in a valid state after an error, and the source this
/// is modeled on has no such check (`append_data` keeps writing until
/// `alloc_block` itself fails, by which point part of the write has
/// already landed).
pub fn write_stream(region: &mut Region, head: u32, offset: u64, buf: &[u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }

    let len = buf.len() as u64;
    let required_end = offset + len;
    let existing_capacity = chain_blocks(region, head)?.len() as u64 * BLOCK_SIZE as u64;
    if required_end > existing_capacity {
        let additional_blocks = (required_end - existing_capacity).div_ceil(BLOCK_SIZE as u64);
        if additional_blocks > free_count(region) as u64 {
            log::warn!(
                "write of {len} bytes at offset {offset} needs {additional_blocks} more blocks, only {} free",
                free_count(region)
            );
            return Err(Error::NoSpace);
        }
    }

    let mut written = 0usize;
    let mut traversed = 0u64;
    let mut block = head;
    loop {
        region.check_allocated(block)?;

        let used = region.fat_entry(block).used_size as u64;
        let want_end = (offset + len)
            .saturating_sub(traversed)
            .min(BLOCK_SIZE as u64);
        if used < BLOCK_SIZE as u64 && want_end > used {
            let data = region.block_mut(block);
            for byte in &mut data[used as usize..want_end as usize] {
                *byte = 0;
            }
            region.fat_entry_mut(block).used_size = want_end as u16;
        }

        let used = region.fat_entry(block).used_size as u64;
        let block_start = traversed;
        let block_end = traversed + used;
        if offset < block_end && written < buf.len() {
            let start_in_block = (offset.max(block_start) - block_start) as usize;
            let avail = (used as usize) - start_in_block;
            let n = avail.min(buf.len() - written);
            let data = region.block_mut(block);
            data[start_in_block..start_in_block + n]
                .copy_from_slice(&buf[written..written + n]);
            written += n;
        }
        traversed = block_end;
        if written >= buf.len() {
            return Ok(written);
        }

        let next = region.fat_entry(block).next_block;
        block = if next == 0 {
            let new_block = alloc_block(region)?;
            region.fat_entry_mut(block).next_block = new_block;
            new_block
        } else {
            next
        };
    }
}

/// `write_stream(head, stream_size(head), buf)` — the hot path for
/// directory growth.
pub fn append_stream(region: &mut Region, head: u32, buf: &[u8]) -> Result<usize> {
    let offset = stream_size(region, head)?;
    write_stream(region, head, offset, buf)
}

/// Grows or shrinks the stream to `new_size`, zero-filling on growth and
/// freeing trailing blocks (but never the head) on shrink.
pub fn truncate_stream(region: &mut Region, head: u32, new_size: u64) -> Result<()> {
    let current = stream_size(region, head)?;
    if new_size > current {
        let zeros = vec![0u8; (new_size - current) as usize];
        write_stream(region, head, current, &zeros)?;
        return Ok(());
    }

    let mut traversed = 0u64;
    let mut block = head;
    loop {
        region.check_allocated(block)?;
        let used = region.fat_entry(block).used_size as u64;
        if traversed + used >= new_size {
            let keep = (new_size - traversed) as u16;
            let next = region.fat_entry(block).next_block;
            region.fat_entry_mut(block).used_size = keep;
            region.fat_entry_mut(block).next_block = 0;
            if next != 0 {
                free_chain(region, next)?;
            }
            return Ok(());
        }
        traversed += used;
        let next = region.fat_entry(block).next_block;
        if next == 0 {
            // current already accounted for every block; new_size <= current
            // guarantees we never fall off the end of the chain.
            log::error!("stream_size disagreed with chain length for head {head}");
            return Err(Error::Corrupt);
        }
        block = next;
    }
}

/// Splices `[offset, offset + count)` out of the stream. Materialises the
/// whole stream, frees every block after (and the contents of) the head,
/// then rewrites the spliced result starting at the head — which is why the
/// head's block index never changes even though every byte in it does.
pub fn remove_range(region: &mut Region, head: u32, offset: usize, count: usize) -> Result<()> {
    if count == 0 {
        return Ok(());
    }

    let size = stream_size(region, head)? as usize;
    let mut data = vec![0u8; size];
    read_stream(region, head, 0, &mut data)?;
    let end = (offset + count).min(data.len());
    data.drain(offset.min(data.len())..end);

    // Free everything after the head and reset the head's own used_size,
    // without releasing the head block itself.
    let next = region.fat_entry(head).next_block;
    region.fat_entry_mut(head).used_size = 0;
    region.fat_entry_mut(head).next_block = 0;
    if next != 0 {
        free_chain(region, next)?;
    }

    write_stream(region, head, 0, &data)?;
    Ok(())
}

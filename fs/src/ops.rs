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

//! Operation surface: the thirteen filesystem operations, expressed in
//! terms of the region/allocator/stream/dirent/path layers below. Every
//! op calls [`Region::bootstrap`] first, matching `implementation.c`'s
//! `try_build(fsptr, fssize, errnoptr)` at the top of every handler.

use tinyfat_err::{Error, Result};

use crate::alloc::{free_chain, free_count};
use crate::dirent::{
    append_entry, create_entry, delete_entry, find_entry, list_entries, remove_entry_record,
    write_entry_at, Entry, EntryKind,
};
use crate::path::{resolve, resolve_parent};
use crate::region::{Region, BLOCK_SIZE, MAX_NAME_SIZE};
use crate::stream::{read_stream, stream_size, truncate_stream, write_stream};

/// `S_IFDIR | 0755`, reported but never enforced (spec.md's non-goal:
/// "no access-control enforcement").
pub const DIR_MODE: u32 = 0o040_755;
/// `S_IFREG | 0755`.
pub const FILE_MODE: u32 = 0o100_755;

#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: (i64, u32),
    pub mtime: (i64, u32),
    /// The entity's head block — its stable identity within the region,
    /// suitable for a mount-host bridge to use as an inode number (see
    /// spec.md's glossary entry for "head block").
    pub head_block: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks: u64,
    pub free: u64,
    pub avail: u64,
    pub name_max: u32,
}

/// `getattr(path, uid, gid)` fills everything but `uid`/`gid` themselves —
/// those are passed straight through by the caller (the bridge already has
/// them from the FUSE request), matching spec.md §4.6's "uid/gid from
/// arguments".
pub fn getattr(region: &mut Region, path: &str) -> Result<Stat> {
    region.bootstrap();
    let entry = resolve(region, path)?;
    match entry.kind {
        EntryKind::Directory => {
            let entries = list_entries(region, entry.head_block)?;
            Ok(Stat {
                mode: DIR_MODE,
                nlink: entries.len() as u32 + 2,
                size: (entries.len() * crate::dirent::ENTRY_SIZE) as u64,
                atime: entry.atime,
                mtime: entry.mtime,
                head_block: entry.head_block,
            })
        }
        EntryKind::File => Ok(Stat {
            mode: FILE_MODE,
            nlink: 1,
            size: stream_size(region, entry.head_block)?,
            atime: entry.atime,
            mtime: entry.mtime,
            head_block: entry.head_block,
        }),
    }
}

/// Names of everything in `path`, excluding the never-stored `.`/`..`.
/// Caller owns the returned `Vec`.
pub fn readdir(region: &mut Region, path: &str) -> Result<Vec<String>> {
    region.bootstrap();
    let entry = resolve(region, path)?;
    if entry.kind != EntryKind::Directory {
        return Err(Error::NotADirectory);
    }
    Ok(list_entries(region, entry.head_block)?
        .into_iter()
        .map(|e| e.name)
        .collect())
}

fn mknod_or_mkdir(
    region: &mut Region,
    path: &str,
    kind: EntryKind,
    now: (i64, u32),
) -> Result<()> {
    region.bootstrap();
    let (parent, name) = resolve_parent(region, path)?;
    if name.len() >= MAX_NAME_SIZE {
        return Err(Error::NameTooLong);
    }
    create_entry(region, parent.head_block, name, kind, now)?;
    Ok(())
}

/// Creates a zero-length regular file at `path`.
pub fn mknod(region: &mut Region, path: &str, now: (i64, u32)) -> Result<()> {
    mknod_or_mkdir(region, path, EntryKind::File, now)
}

/// Creates an empty directory at `path`.
pub fn mkdir(region: &mut Region, path: &str, now: (i64, u32)) -> Result<()> {
    mknod_or_mkdir(region, path, EntryKind::Directory, now)
}

/// Resolves `path`'s parent and the entry filed under `name` there.
/// Returns `Error::NoSuchEntry` if it isn't a child of the resolved parent
/// (can only happen if `path` itself doesn't resolve, since `resolve` and
/// `resolve_parent` otherwise walk the identical tree).
fn parent_and_child(region: &Region, path: &str) -> Result<(Entry, usize, Entry)> {
    let (parent, name) = resolve_parent(region, path)?;
    let (index, child) = find_entry(region, parent.head_block, name)?.ok_or(Error::NoSuchEntry)?;
    Ok((parent, index, child))
}

/// Removes the regular file at `path`. `Error::IsADirectory` if it names a
/// directory instead (use `rmdir`).
pub fn unlink(region: &mut Region, path: &str) -> Result<()> {
    region.bootstrap();
    let (parent, index, child) = parent_and_child(region, path)?;
    if child.kind != EntryKind::File {
        return Err(Error::IsADirectory);
    }
    delete_entry(region, parent.head_block, index)
}

/// Removes the directory at `path`. Fails with `Error::NotEmpty` if it
/// contains anything — spec.md's required extension over the source, which
/// never checks (spec.md §4.6, §9).
pub fn rmdir(region: &mut Region, path: &str) -> Result<()> {
    region.bootstrap();
    let (parent, index, child) = parent_and_child(region, path)?;
    if child.kind != EntryKind::Directory {
        return Err(Error::NotADirectory);
    }
    if stream_size(region, child.head_block)? != 0 {
        return Err(Error::NotEmpty);
    }
    delete_entry(region, parent.head_block, index)
}

/// `true` if `target` is `root` itself or is reachable from `root` by
/// descending only through subdirectory entries. Used to reject a `rename`
/// that would move a directory into its own descendant (spec.md §4.6's
/// third required extension); `rename`'s only other structural invariant,
/// "directory entries form a tree", makes this walk provably finite.
fn directory_contains(region: &Region, root: u32, target: u32) -> Result<bool> {
    if root == target {
        return Ok(true);
    }
    for entry in list_entries(region, root)? {
        if entry.kind == EntryKind::Directory && directory_contains(region, entry.head_block, target)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Moves `from` to `to`, across directories if their parents differ.
///
/// Required extensions over the source (spec.md §4.6, §9): an existing
/// destination file is removed; an existing destination directory must be
/// empty or the call fails with `Error::NotEmpty`; moving a directory into
/// its own descendant is rejected.
///
/// The moved entry is appended under its new name *before* anything is
/// removed from either directory, and everything that can fail (name
/// length, the descendant check, the destination's emptiness, and the
/// append's own space requirement via `write_stream`'s pre-check) is
/// checked ahead of that append. So the only way this function mutates the
/// region at all is on a path that is already guaranteed to run to
/// completion — there is no step after the append that can fail and leave
/// `from` gone without `to` existing.
pub fn rename(region: &mut Region, from: &str, to: &str) -> Result<()> {
    region.bootstrap();
    if from == to {
        // Resolve anyway so a bad `from` still surfaces its error.
        resolve(region, from)?;
        return Ok(());
    }

    let (from_parent, from_name) = resolve_parent(region, from)?;
    let (_, source) = find_entry(region, from_parent.head_block, from_name)?
        .ok_or(Error::NoSuchEntry)?;

    let (to_parent, to_name) = resolve_parent(region, to)?;
    if to_name.len() >= MAX_NAME_SIZE {
        return Err(Error::NameTooLong);
    }

    if source.kind == EntryKind::Directory
        && directory_contains(region, source.head_block, to_parent.head_block)?
    {
        return Err(Error::InvalidPath);
    }

    let existing_dest = find_entry(region, to_parent.head_block, to_name)?;
    if let Some((_, dest)) = &existing_dest {
        if dest.kind == EntryKind::Directory && stream_size(region, dest.head_block)? != 0 {
            return Err(Error::NotEmpty);
        }
    }

    let mut moved = source.clone();
    moved.name = to_name.to_owned();
    append_entry(region, to_parent.head_block, &moved)?;

    if let Some((dest_index, dest)) = existing_dest {
        free_chain(region, dest.head_block)?;
        remove_entry_record(region, to_parent.head_block, dest_index)?;
    }

    // Re-find the source's index: the destination removal above, or the
    // append itself if `to_parent == from_parent`, may have shifted it.
    let (source_index, _) = find_entry(region, from_parent.head_block, from_name)?
        .ok_or(Error::Corrupt)?;
    remove_entry_record(region, from_parent.head_block, source_index)
}

/// Grows or shrinks the file at `path` to `new_size` bytes.
pub fn truncate(region: &mut Region, path: &str, new_size: u64) -> Result<()> {
    region.bootstrap();
    let entry = resolve(region, path)?;
    if entry.kind != EntryKind::File {
        return Err(Error::IsADirectory);
    }
    truncate_stream(region, entry.head_block, new_size)
}

/// Confirms `path` resolves to a regular file, without returning a handle
/// (the core holds no open-file state; see spec.md §5).
pub fn open(region: &mut Region, path: &str) -> Result<()> {
    region.bootstrap();
    let entry = resolve(region, path)?;
    if entry.kind != EntryKind::File {
        return Err(Error::IsADirectory);
    }
    Ok(())
}

/// Reads up to `out.len()` bytes of the file at `path` starting at
/// `offset`. A short read is end-of-file, not an error.
pub fn read(region: &mut Region, path: &str, offset: u64, out: &mut [u8]) -> Result<usize> {
    region.bootstrap();
    let entry = resolve(region, path)?;
    if entry.kind != EntryKind::File {
        return Err(Error::IsADirectory);
    }
    read_stream(region, entry.head_block, offset, out)
}

/// Writes `buf` into the file at `path` starting at `offset`, zero-filling
/// any hole up to `offset` and extending the file as needed.
pub fn write(region: &mut Region, path: &str, offset: u64, buf: &[u8]) -> Result<usize> {
    region.bootstrap();
    let entry = resolve(region, path)?;
    if entry.kind != EntryKind::File {
        return Err(Error::IsADirectory);
    }
    write_stream(region, entry.head_block, offset, buf)
}

/// Updates the access and modification times of `path`, writing the change
/// back into the parent directory's stored entry so it survives the call
/// returning — the source's `__myfs_utimens_implem` mutates a `DirEntry` it
/// got *by value* from `find_path` and so never persists anything; spec.md
/// §4.6 requires we not repeat that bug.
pub fn utimens(
    region: &mut Region,
    path: &str,
    atime: (i64, u32),
    mtime: (i64, u32),
) -> Result<()> {
    region.bootstrap();
    let (parent, index, mut entry) = parent_and_child(region, path)?;
    entry.atime = atime;
    entry.mtime = mtime;
    write_entry_at(region, parent.head_block, index, &entry)
}

/// `f_bsize = 4096`, `f_blocks = fat_count`, `f_bfree = f_bavail =
/// free_count`, `f_namemax = 32` (spec.md §4.6).
pub fn statfs(region: &mut Region) -> StatFs {
    region.bootstrap();
    let free = free_count(region) as u64;
    StatFs {
        block_size: BLOCK_SIZE as u32,
        blocks: region.fat_count() as u64,
        free,
        avail: free,
        name_max: MAX_NAME_SIZE as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_region(fssize: usize) -> Vec<u8> {
        vec![0u8; fssize]
    }

    const NOW: (i64, u32) = (1_700_000_000, 0);

    #[test]
    fn create_write_read_getattr() {
        let mut bytes = new_region(1 << 20);
        let mut region = Region::new(&mut bytes);
        mknod(&mut region, "/a", NOW).unwrap();
        assert_eq!(write(&mut region, "/a", 0, b"Hello world").unwrap(), 11);
        let mut out = [0u8; 11];
        assert_eq!(read(&mut region, "/a", 0, &mut out).unwrap(), 11);
        assert_eq!(&out, b"Hello world");
        assert_eq!(getattr(&mut region, "/a").unwrap().size, 11);
    }

    #[test]
    fn mkdir_readdir_rmdir_requires_empty() {
        let mut bytes = new_region(1 << 20);
        let mut region = Region::new(&mut bytes);
        mkdir(&mut region, "/d", NOW).unwrap();
        mknod(&mut region, "/d/f", NOW).unwrap();
        assert_eq!(readdir(&mut region, "/d").unwrap(), vec!["f".to_string()]);
        assert_eq!(rmdir(&mut region, "/d").unwrap_err(), Error::NotEmpty);
        unlink(&mut region, "/d/f").unwrap();
        rmdir(&mut region, "/d").unwrap();
        assert!(readdir(&mut region, "/").unwrap().is_empty());
    }

    #[test]
    fn rename_across_directories() {
        let mut bytes = new_region(1 << 20);
        let mut region = Region::new(&mut bytes);
        mkdir(&mut region, "/x", NOW).unwrap();
        mkdir(&mut region, "/y", NOW).unwrap();
        mknod(&mut region, "/x/f", NOW).unwrap();
        write(&mut region, "/x/f", 0, b"data").unwrap();
        rename(&mut region, "/x/f", "/y/g").unwrap();
        assert!(readdir(&mut region, "/x").unwrap().is_empty());
        let mut out = [0u8; 4];
        read(&mut region, "/y/g", 0, &mut out).unwrap();
        assert_eq!(&out, b"data");
    }

    #[test]
    fn rename_onto_existing_file_replaces_it() {
        let mut bytes = new_region(1 << 20);
        let mut region = Region::new(&mut bytes);
        mknod(&mut region, "/a", NOW).unwrap();
        write(&mut region, "/a", 0, b"aaaa").unwrap();
        mknod(&mut region, "/b", NOW).unwrap();
        write(&mut region, "/b", 0, b"bb").unwrap();
        rename(&mut region, "/a", "/b").unwrap();
        let mut out = [0u8; 4];
        assert_eq!(read(&mut region, "/b", 0, &mut out).unwrap(), 4);
        assert_eq!(&out, b"aaaa");
        assert_eq!(resolve(&region, "/a").unwrap_err(), Error::NoSuchEntry);
    }

    #[test]
    fn rename_onto_nonempty_directory_fails() {
        let mut bytes = new_region(1 << 20);
        let mut region = Region::new(&mut bytes);
        mkdir(&mut region, "/a", NOW).unwrap();
        mkdir(&mut region, "/b", NOW).unwrap();
        mknod(&mut region, "/b/f", NOW).unwrap();
        assert_eq!(rename(&mut region, "/a", "/b").unwrap_err(), Error::NotEmpty);
    }

    #[test]
    fn rename_directory_into_own_descendant_fails() {
        let mut bytes = new_region(1 << 20);
        let mut region = Region::new(&mut bytes);
        mkdir(&mut region, "/a", NOW).unwrap();
        mkdir(&mut region, "/a/b", NOW).unwrap();
        assert_eq!(
            rename(&mut region, "/a", "/a/b/c").unwrap_err(),
            Error::InvalidPath
        );
    }

    #[test]
    fn utimens_persists_across_lookups() {
        let mut bytes = new_region(1 << 20);
        let mut region = Region::new(&mut bytes);
        mknod(&mut region, "/a", NOW).unwrap();
        utimens(&mut region, "/a", (1, 2), (3, 4)).unwrap();
        let stat = getattr(&mut region, "/a").unwrap();
        assert_eq!(stat.atime, (1, 2));
        assert_eq!(stat.mtime, (3, 4));
    }

    #[test]
    fn statfs_reports_block_accounting() {
        let mut bytes = new_region((1 << 20) + 8);
        let mut region = Region::new(&mut bytes);
        let before = statfs(&mut region);
        mknod(&mut region, "/a", NOW).unwrap();
        write(&mut region, "/a", 0, &vec![1u8; BLOCK_SIZE + 1]).unwrap();
        let after = statfs(&mut region);
        assert_eq!(after.blocks, before.blocks);
        assert_eq!(after.free, before.free - 2); // the file's head block plus one overflow block
    }
}

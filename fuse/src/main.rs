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

//! `tinyfat-fuse`: the mount-host bridge. Maps a backing file into memory
//! (`memmap2`, `MAP_SHARED` so writes land on disk) and dispatches kernel
//! requests from `fuser`'s inode-based `Filesystem` trait onto `tinyfat`'s
//! path-based operation surface.
//!
//! `tinyfat`'s core has no notion of an inode table — a file or directory's
//! identity *is* its head block (spec.md's glossary: "its index is the
//! identity of a file or directory within the region"), and the core never
//! needs anything else, since every operation is addressed by path. FUSE's
//! low-level protocol, however, addresses everything by inode number, so
//! this bridge keeps a small `ino -> (parent ino, name)` table and
//! reconstructs full paths by walking it up to the root on every call. A
//! directory that moves doesn't require updating its children's entries —
//! only the moved entry's own `(parent, name)` pair changes — which is the
//! whole point of storing parent links instead of cached absolute paths.

mod errno;

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use memmap2::MmapMut;

use tinyfat::dirent::{list_entries, EntryKind};
use tinyfat::ops::{self, Stat};
use tinyfat::path::resolve;
use tinyfat::region::Region;

const ROOT_INO: u64 = 1;
const TTL: Duration = Duration::from_secs(1);
const DEFAULT_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "tinyfat-fuse", about = "Mount a tinyfat region over FUSE")]
struct Cli {
    /// Backing file holding the region's bytes. Created and zero-extended
    /// to `--size` if it doesn't already exist; left alone (and re-mounted
    /// as-is) if it does, which is what makes remounting idempotent.
    #[arg(long)]
    backing_file: PathBuf,

    /// Region size in bytes. Only consulted when `--backing-file` is
    /// created fresh.
    #[arg(long, default_value_t = DEFAULT_SIZE)]
    size: u64,

    /// Where to mount the filesystem.
    mountpoint: PathBuf,
}

fn now() -> (i64, u32) {
    to_secs_nanos(SystemTime::now())
}

fn to_secs_nanos(t: SystemTime) -> (i64, u32) {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => (-(e.duration().as_secs() as i64), 0),
    }
}

fn system_time((secs, nanos): (i64, u32)) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos)
    } else {
        UNIX_EPOCH - Duration::new((-secs) as u64, 0)
    }
}

fn resolve_time_or_now(t: TimeOrNow) -> (i64, u32) {
    match t {
        TimeOrNow::SpecificTime(st) => to_secs_nanos(st),
        TimeOrNow::Now => now(),
    }
}

fn to_file_attr(ino: u64, stat: &Stat, uid: u32, gid: u32) -> FileAttr {
    let mtime = system_time(stat.mtime);
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.size.div_ceil(512),
        atime: system_time(stat.atime),
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind: if stat.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32 {
            FileType::Directory
        } else {
            FileType::RegularFile
        },
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid,
        gid,
        rdev: 0,
        blksize: tinyfat::region::BLOCK_SIZE as u32,
        flags: 0,
    }
}

/// One entry's position in the directory tree, as seen by the bridge: the
/// inode of its parent directory and its name within that parent. Absent
/// for the root, whose parent is itself by convention.
struct Inode {
    parent: u64,
    name: OsString,
}

struct TinyFs {
    mmap: MmapMut,
    inodes: HashMap<u64, Inode>,
}

impl TinyFs {
    fn new(mmap: MmapMut) -> Self {
        TinyFs {
            mmap,
            inodes: HashMap::new(),
        }
    }

    /// Walks `ino`'s recorded parent links up to the root, rebuilding its
    /// absolute path. An `ino` this bridge has never recorded (e.g. a stale
    /// handle from before a bridge restart) falls back to the root rather
    /// than panicking — the subsequent lookup then fails with
    /// `Error::NoSuchEntry` the same way a genuinely deleted path would.
    fn path_for(&self, ino: u64) -> PathBuf {
        let mut components = Vec::new();
        let mut current = ino;
        while current != ROOT_INO {
            match self.inodes.get(&current) {
                Some(inode) => {
                    components.push(inode.name.clone());
                    current = inode.parent;
                }
                None => break,
            }
        }
        let mut path = PathBuf::from("/");
        for component in components.into_iter().rev() {
            path.push(component);
        }
        path
    }

    fn full_path(&self, parent: u64, name: &OsStr) -> PathBuf {
        let mut path = self.path_for(parent);
        path.push(name);
        path
    }

    /// Records (or updates) where `head_block`'s entity sits in the tree,
    /// and returns its stable inode number.
    fn remember(&mut self, parent: u64, name: &OsStr, head_block: u32) -> u64 {
        let ino = head_block as u64 + 1;
        if ino != ROOT_INO {
            self.inodes.insert(
                ino,
                Inode {
                    parent,
                    name: name.to_os_string(),
                },
            );
        }
        ino
    }

    fn forget_child(&mut self, parent: u64, name: &OsStr) {
        self.inodes
            .retain(|_, inode| !(inode.parent == parent && inode.name == name));
    }

    fn rename_child(&mut self, parent: u64, name: &OsStr, new_parent: u64, new_name: &OsStr) {
        let moved = self
            .inodes
            .iter()
            .find(|(_, inode)| inode.parent == parent && inode.name == name)
            .map(|(&ino, _)| ino);
        if let Some(ino) = moved {
            if let Some(inode) = self.inodes.get_mut(&ino) {
                inode.parent = new_parent;
                inode.name = new_name.to_os_string();
            }
        }
    }
}

macro_rules! path_str_or_einval {
    ($path:expr, $reply:expr) => {
        match $path.to_str() {
            Some(p) => p,
            None => return $reply.error(libc::EINVAL),
        }
    };
}

impl Filesystem for TinyFs {
    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = self.full_path(parent, name);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        match ops::getattr(&mut region, path) {
            Ok(stat) => {
                let ino = self.remember(parent, name, stat.head_block);
                reply.entry(&TTL, &to_file_attr(ino, &stat, req.uid(), req.gid()), 0)
            }
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = self.path_for(ino);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        match ops::getattr(&mut region, path) {
            Ok(stat) => reply.attr(&TTL, &to_file_attr(ino, &stat, req.uid(), req.gid())),
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = self.path_for(ino);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);

        if let Some(new_size) = size {
            if let Err(err) = ops::truncate(&mut region, path, new_size) {
                return reply.error(errno::to_errno(err));
            }
        }

        if atime.is_some() || mtime.is_some() {
            let stat = match ops::getattr(&mut region, path) {
                Ok(s) => s,
                Err(err) => return reply.error(errno::to_errno(err)),
            };
            let new_atime = atime.map(resolve_time_or_now).unwrap_or(stat.atime);
            let new_mtime = mtime.map(resolve_time_or_now).unwrap_or(stat.mtime);
            if let Err(err) = ops::utimens(&mut region, path, new_atime, new_mtime) {
                return reply.error(errno::to_errno(err));
            }
        }

        match ops::getattr(&mut region, path) {
            Ok(stat) => reply.attr(&TTL, &to_file_attr(ino, &stat, req.uid(), req.gid())),
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = self.full_path(parent, name);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        if let Err(err) = ops::mknod(&mut region, path, now()) {
            return reply.error(errno::to_errno(err));
        }
        match ops::getattr(&mut region, path) {
            Ok(stat) => {
                let ino = self.remember(parent, name, stat.head_block);
                reply.entry(&TTL, &to_file_attr(ino, &stat, req.uid(), req.gid()), 0)
            }
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = self.full_path(parent, name);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        if let Err(err) = ops::mkdir(&mut region, path, now()) {
            return reply.error(errno::to_errno(err));
        }
        match ops::getattr(&mut region, path) {
            Ok(stat) => {
                let ino = self.remember(parent, name, stat.head_block);
                reply.entry(&TTL, &to_file_attr(ino, &stat, req.uid(), req.gid()), 0)
            }
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = self.full_path(parent, name);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        match ops::unlink(&mut region, path) {
            Ok(()) => {
                self.forget_child(parent, name);
                reply.ok();
            }
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = self.full_path(parent, name);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        match ops::rmdir(&mut region, path) {
            Ok(()) => {
                self.forget_child(parent, name);
                reply.ok();
            }
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = self.full_path(parent, name);
        let from = path_str_or_einval!(from, reply);
        let to = self.full_path(newparent, newname);
        let to = path_str_or_einval!(to, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        match ops::rename(&mut region, from, to) {
            Ok(()) => {
                self.forget_child(newparent, newname);
                self.rename_child(parent, name, newparent, newname);
                reply.ok();
            }
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = self.path_for(ino);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        match ops::open(&mut region, path) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = self.path_for(ino);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        let mut buf = vec![0u8; size as usize];
        match ops::read(&mut region, path, offset.max(0) as u64, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = self.path_for(ino);
        let path = path_str_or_einval!(path, reply);
        let mut region = Region::new(&mut self.mmap[..]);
        match ops::write(&mut region, path, offset.max(0) as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(err) => reply.error(errno::to_errno(err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let dir_path = self.path_for(ino);
        let dir_path = path_str_or_einval!(dir_path, reply);

        let mut region = Region::new(&mut self.mmap[..]);
        region.bootstrap();
        let entry = match resolve(&region, dir_path) {
            Ok(e) => e,
            Err(err) => return reply.error(errno::to_errno(err)),
        };
        if entry.kind != EntryKind::Directory {
            return reply.error(libc::ENOTDIR);
        }
        let children = match list_entries(&region, entry.head_block) {
            Ok(v) => v,
            Err(err) => return reply.error(errno::to_errno(err)),
        };

        let parent_ino = if ino == ROOT_INO {
            ROOT_INO
        } else {
            self.inodes.get(&ino).map(|i| i.parent).unwrap_or(ROOT_INO)
        };

        let mut listing = vec![
            (ino, FileType::Directory, OsString::from(".")),
            (parent_ino, FileType::Directory, OsString::from("..")),
        ];
        for child in &children {
            let child_ino = child.head_block as u64 + 1;
            let kind = if child.kind == EntryKind::Directory {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            self.inodes.entry(child_ino).or_insert_with(|| Inode {
                parent: ino,
                name: OsString::from(&child.name),
            });
            listing.push((child_ino, kind, OsString::from(&child.name)));
        }

        for (i, (child_ino, kind, name)) in listing.into_iter().enumerate().skip(offset as usize) {
            if reply.add(child_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let mut region = Region::new(&mut self.mmap[..]);
        let stat = ops::statfs(&mut region);
        reply.statfs(
            stat.blocks,
            stat.free,
            stat.avail,
            stat.blocks,
            stat.free,
            stat.block_size,
            stat.name_max,
            stat.block_size,
        );
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }
}

fn open_backing_file(path: &PathBuf, size: u64) -> std::io::Result<std::fs::File> {
    let existed = path.exists();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    if !existed {
        file.set_len(size)?;
        log::info!("created fresh backing file {} ({size} bytes)", path.display());
    } else {
        log::info!("reusing existing backing file {}", path.display());
    }
    Ok(file)
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let file = open_backing_file(&cli.backing_file, cli.size)?;
    // SAFETY: the backing file is exclusively ours for the life of the
    // mount (spec.md §5: single dispatcher thread, no concurrent mutation),
    // so no other process races us on the mapping.
    let mmap = unsafe { MmapMut::map_mut(&file)? };

    let options = vec![
        MountOption::FSName("tinyfat".to_string()),
        MountOption::DefaultPermissions,
    ];
    fuser::mount2(TinyFs::new(mmap), &cli.mountpoint, &options)
}

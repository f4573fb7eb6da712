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

//! `tinyfat`: an in-memory, persistable filesystem addressed entirely by
//! byte offsets into a single host-supplied region.
//!
//! The region (a `&mut [u8]` of fixed size, typically a live memory
//! mapping of a backing file) *is* the filesystem: metadata, directory
//! contents and file data all live inside it, and every reference within
//! it is a block index rather than a pointer, so the region is safe to
//! remap at a different virtual address between mounts.
//!
//! [`ops`] is the entry point most callers want — it implements the
//! thirteen operations a mount-host bridge (FUSE or otherwise) needs,
//! each one bootstrapping the region and then working through
//! [`path`] resolution, the [`dirent`] model and the [`stream`] layer
//! down to the [`alloc`]/[`region`] primitives.

pub mod alloc;
pub mod dirent;
pub mod ops;
pub mod path;
pub mod region;
pub mod stream;

pub use tinyfat_err::{Error, Result};

pub use region::Region;

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

//! Path resolver: tokenises `/`-separated paths and walks directory streams
//! from the root (always block 0). Never holds a buffer across more than
//! one call — every intermediate directory is read into an owned `Vec`
//! that drops at the end of the function that needed it, success or
//! failure, which is the leak-freedom spec.md requires of this layer (the
//! source it's modeled on leaks `t_path`/`dir` on several early returns).

use tinyfat_err::{Error, Result};

use crate::dirent::{find_entry, Entry, EntryKind};
use crate::region::{Region, MAX_NAME_SIZE, MAX_PATH_LEN, ROOT_BLOCK};

pub fn root_entry() -> Entry {
    Entry {
        name: String::new(),
        kind: EntryKind::Directory,
        head_block: ROOT_BLOCK,
        atime: (0, 0),
        mtime: (0, 0),
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath);
    }
    if path.len() > MAX_PATH_LEN {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// Walks `path` (a sequence of `/`-separated components, all of which are
/// interior — i.e. every one of them must resolve to a directory) starting
/// from the root. An unmatched or non-directory component is always
/// [`Error::NotADirectory`] here, since by construction every token walked
/// by this function is an interior path component.
fn walk(region: &Region, path: &str) -> Result<Entry> {
    let mut current = root_entry();
    for token in path.split('/').filter(|s| !s.is_empty()) {
        if token.len() >= MAX_NAME_SIZE {
            return Err(Error::NameTooLong);
        }
        if current.kind != EntryKind::Directory {
            return Err(Error::NotADirectory);
        }
        match find_entry(region, current.head_block, token)? {
            Some((_, entry)) => current = entry,
            None => return Err(Error::NotADirectory),
        }
    }
    Ok(current)
}

/// Resolves an absolute path to its [`Entry`].
pub fn resolve(region: &Region, path: &str) -> Result<Entry> {
    if path.is_empty() || path == "/" {
        return Ok(root_entry());
    }
    validate_path(path)?;

    let (parent, name) = split_parent_and_name(path)?;
    let parent_entry = walk(region, parent)?;
    if parent_entry.kind != EntryKind::Directory {
        return Err(Error::NotADirectory);
    }
    if name.len() >= MAX_NAME_SIZE {
        return Err(Error::NameTooLong);
    }
    match find_entry(region, parent_entry.head_block, name)? {
        Some((_, entry)) => Ok(entry),
        None => Err(Error::NoSuchEntry),
    }
}

/// Splits `path` at its last `/` into `(parent_path, child_name)`.
fn split_parent_and_name(path: &str) -> Result<(&str, &str)> {
    let last_slash = path.rfind('/').ok_or(Error::InvalidPath)?;
    let name = &path[last_slash + 1..];
    if name.is_empty() {
        return Err(Error::InvalidPath);
    }
    Ok((&path[..last_slash], name))
}

/// Resolves `path`'s parent directory and returns it along with `path`'s
/// basename — the shape every mutating operation (`mknod`, `mkdir`,
/// `unlink`, `rmdir`, `rename`, `utimens`) needs.
pub fn resolve_parent<'p>(region: &Region, path: &'p str) -> Result<(Entry, &'p str)> {
    validate_path(path)?;
    let (parent_path, name) = split_parent_and_name(path)?;
    if name.len() >= MAX_NAME_SIZE {
        return Err(Error::NameTooLong);
    }

    let parent = if parent_path.is_empty() {
        root_entry()
    } else {
        walk(region, parent_path)?
    };
    if parent.kind != EntryKind::Directory {
        return Err(Error::NotADirectory);
    }
    Ok((parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirent::create_entry;
    use crate::region::Region;

    fn new_bootstrapped(fssize: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; fssize];
        Region::new(&mut bytes).bootstrap();
        bytes
    }

    #[test]
    fn root_resolves_without_touching_the_region() {
        let mut bytes = new_bootstrapped(1 << 16);
        let region = Region::new(&mut bytes);
        let entry = resolve(&region, "/").unwrap();
        assert_eq!(entry.head_block, ROOT_BLOCK);
        assert_eq!(entry.kind, EntryKind::Directory);
    }

    #[test]
    fn missing_interior_component_is_not_a_directory() {
        let mut bytes = new_bootstrapped(1 << 16);
        let region = Region::new(&mut bytes);
        let err = resolve(&region, "/missing/child").unwrap_err();
        assert_eq!(err, Error::NotADirectory);
    }

    #[test]
    fn missing_final_component_is_no_such_entry() {
        let mut bytes = new_bootstrapped(1 << 16);
        let region = Region::new(&mut bytes);
        let err = resolve(&region, "/missing").unwrap_err();
        assert_eq!(err, Error::NoSuchEntry);
    }

    #[test]
    fn file_as_interior_component_is_not_a_directory() {
        let mut bytes = new_bootstrapped(1 << 16);
        let mut region = Region::new(&mut bytes);
        create_entry(&mut region, ROOT_BLOCK, "f", EntryKind::File, (0, 0)).unwrap();
        let err = resolve(&region, "/f/g").unwrap_err();
        assert_eq!(err, Error::NotADirectory);
    }

    #[test]
    fn relative_path_is_invalid() {
        let mut bytes = new_bootstrapped(1 << 16);
        let region = Region::new(&mut bytes);
        let err = resolve(&region, "a/b").unwrap_err();
        assert_eq!(err, Error::InvalidPath);
    }
}

//! Path resolution over the two cache topologies, and the symlink follower
//! both dispatch through.
//!
//! Archives know their whole tree up front, so the tree resolver walks
//! parent-to-child lists segment by segment. Sessions only ever know the
//! directories they have listed, so the linear resolver keeps a completely
//! fake flat root whose entries are keyed by full directory path ("usr",
//! "usr/src", ...) and reloads a snapshot whenever it has gone stale.

use dircache_api::error::{VfsError, VfsResult};
use dircache_api::fs::ArchiveSupport;
use dircache_api::types::{
    ClassFlags, EntryId, FileKind, InodeId, LookupFlags, Stat, SuperId,
    LINK_FOLLOW, LINK_NO_FOLLOW,
};

use crate::class::{CacheFS, Resolver};

/// Canonical resolver form of a path: duplicate separators collapsed, `.`
/// segments (leading `./` included) and trailing separators dropped, `..`
/// kept literally, since the resolvers look `..` up like any other name.
pub(crate) fn canonicalize(path: &str) -> String {
    let segs: Vec<&str> = path
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect();
    segs.join("/")
}

impl<S: ArchiveSupport> CacheFS<S> {
    /// Resolve `a_path` below `root` through the resolver variant installed
    /// at construction.
    ///
    /// `Ok(Some(_))` is the resolved entry; `Ok(None)` means the path was
    /// empty, i.e. it named a root, which no entry represents. `follow` is
    /// the symlink hop budget (`LINK_NO_FOLLOW` to leave a trailing symlink
    /// unresolved).
    pub(crate) fn find_entry(
        &mut self,
        root: InodeId,
        a_path: &str,
        follow: i32,
        flags: LookupFlags,
    ) -> VfsResult<Option<EntryId>> {
        match self.resolver {
            Resolver::Tree => self.find_entry_tree(root, a_path, follow, flags),
            Resolver::Linear => self.find_entry_linear(root, a_path, follow, flags),
        }
    }

    /// Walk the hierarchical tree below `root`.
    ///
    /// Keeps the last resolved entry in an accumulator and returns it when
    /// the path runs out, so the empty path yields `None` rather than an
    /// error. Intermediate components are always followed as symlinks; only
    /// the final one honors the caller's `follow`.
    fn find_entry_tree(
        &mut self,
        root: InodeId,
        a_path: &str,
        follow: i32,
        flags: LookupFlags,
    ) -> VfsResult<Option<EntryId>> {
        let canon = canonicalize(a_path);
        let mut path = canon.as_str();
        let mut root = root;
        let mut ent: Option<EntryId> = None;

        loop {
            path = path.trim_start_matches('/');
            if path.is_empty() {
                return Ok(ent);
            }

            let pseg = path.find('/').unwrap_or_else(|| path.len());
            let (seg, rest) = path.split_at(pseg);

            let mut found = None;
            for i in 0..self.store.inode(root).subdir.len() {
                let eid = self.store.inode(root).subdir[i];
                if self.store.entry(eid).name == seg {
                    found = Some(eid);
                    break;
                }
            }

            if found.is_none()
                && flags.intersects(LookupFlags::MKFILE | LookupFlags::MKDIR)
            {
                found = Some(self.automake(root, seg, flags));
            }
            let cur = match found {
                Some(e) => e,
                None => return Err(VfsError::NotFound),
            };

            path = rest;
            // Leading directories must always be followed; only the actual
            // file is optional.
            let eff = if path.contains('/') { LINK_FOLLOW } else { follow };
            let cur = self.resolve_symlink(cur, eff)?;
            ent = Some(cur);
            root = self.store.entry(cur).ino;
        }
    }

    /// Fabricate a missing component under `root`.
    fn automake(&mut self, root: InodeId, seg: &str, flags: LookupFlags) -> EntryId {
        let kind = if flags.contains(LookupFlags::MKDIR) {
            FileKind::Directory
        } else {
            FileKind::Regular
        };
        let ent = self.generate(seg, root, kind, 0o777);
        self.store.insert_entry(root, ent);
        ent
    }

    /// Look `a_path` up in the flat snapshot cache below the *real*
    /// superblock root.
    ///
    /// A non-directory lookup splits off the basename, resolves the
    /// directory part here, and delegates the basename to the tree walker
    /// against the snapshot. A directory lookup matches the full canonical
    /// path against the fake root's entries, reloading the snapshot through
    /// `dir_load` when it is missing or no longer fresh.
    fn find_entry_linear(
        &mut self,
        root: InodeId,
        a_path: &str,
        follow: i32,
        flags: LookupFlags,
    ) -> VfsResult<Option<EntryId>> {
        let sup = self.store.inode(root).sup;
        if self.store.super_ref(sup).root != Some(root) {
            panic!("linear lookup must start at the real superblock root");
        }

        let canon = canonicalize(a_path);

        if !flags.contains(LookupFlags::DIR) {
            let (dirname, name) = match canon.rsplit_once('/') {
                Some((d, n)) => (d, n),
                None => ("", canon.as_str()),
            };
            let dir = self
                .find_inode(sup, dirname, follow, flags | LookupFlags::DIR)?
                .ok_or(VfsError::NotFound)?;
            return self.find_entry_tree(dir, name, follow, flags);
        }

        let mut found = self.scan_flat(root, &canon);
        if let Some(eid) = found {
            let dir = self.store.entry(eid).ino;
            if !self.dir_uptodate(dir) {
                log::info!("Directory cache expired for {}", canon);
                self.free_entry(eid);
                found = None;
            }
        }

        if found.is_none() {
            let ino = self.make_inode(sup, Stat::default_for(FileKind::Directory, 0o755));
            let eid = self.make_entry(&canon, ino);
            let loaded = match self.sub.dir_loader() {
                Some(loader) => loader.dir_load(&mut self.store, ino, &canon),
                None => panic!("remote filesystems must provide dir_load"),
            };
            if let Err(e) = loaded {
                self.free_entry(eid);
                return Err(e);
            }
            self.store.insert_entry(root, eid);

            found = self.scan_flat(root, &canon);
            if found.is_none() {
                panic!("directory vanished right after dir_load");
            }
        }

        Ok(found)
    }

    /// Exact-name scan of the fake flat root.
    fn scan_flat(&self, root: InodeId, path: &str) -> Option<EntryId> {
        self.store
            .inode(root)
            .subdir
            .iter()
            .copied()
            .find(|&e| self.store.entry(e).name == path)
    }

    /// If `ent` is a symlink, find the entry for its target.
    ///
    /// `follow` is the remaining hop budget: `LINK_NO_FOLLOW` returns the
    /// entry untouched, zero means the budget is spent and the chain loops.
    /// Relative targets are rebased onto the full path of the holding
    /// directory; resolution restarts from the superblock root through the
    /// installed resolver variant, so it works over both topologies.
    pub(crate) fn resolve_symlink(&mut self, ent: EntryId, follow: i32) -> VfsResult<EntryId> {
        if follow == LINK_NO_FOLLOW {
            return Ok(ent);
        }
        if follow == 0 {
            return Err(VfsError::LinkLoop);
        }
        let ino = self.store.entry(ent).ino;
        if self.store.inode(ino).st.kind != FileKind::Symlink {
            return Ok(ent);
        }
        let link = match self.store.inode(ino).linkname.clone() {
            Some(l) => l,
            None => return Err(VfsError::DanglingLink),
        };

        let target = if link.starts_with('/') {
            link
        } else {
            // Make the relative target absolute within the archive.
            match self.store.entry(ent).dir {
                Some(dir) => match self.fullpath(dir) {
                    Ok(prefix) => format!("{}/{}", prefix, link),
                    Err(_) => link,
                },
                None => link,
            }
        };

        let sup = self.store.inode(ino).sup;
        let root = self
            .store
            .super_ref(sup)
            .root
            .expect("superblock has no root");
        self.find_entry(root, &target, follow - 1, LookupFlags::empty())?
            .ok_or(VfsError::NotFound)
    }

    /// Resolve `path` below the root of `sup` to an inode.
    ///
    /// For tree classes the empty path is the root itself; everything else
    /// goes through the installed resolver. `Ok(None)` mirrors the
    /// resolver's empty-path case.
    pub(crate) fn find_inode(
        &mut self,
        sup: SuperId,
        path: &str,
        follow: i32,
        flags: LookupFlags,
    ) -> VfsResult<Option<InodeId>> {
        if !self.sub.flags().contains(ClassFlags::REMOTE) && path.is_empty() {
            return Ok(self.store.super_ref(sup).root);
        }
        let root = self
            .store
            .super_ref(sup)
            .root
            .expect("superblock has no root");
        match self.find_entry(root, path, follow, flags)? {
            Some(e) => Ok(Some(self.store.entry(e).ino)),
            None => Ok(None),
        }
    }

    /// Resolve a full boundary path to an inode: dissect, locate the
    /// superblock, resolve the remainder.
    ///
    /// An empty remainder that resolves to nothing is retried as a
    /// directory: the root of a session always exists even though nothing
    /// was listed yet.
    pub(crate) fn inode_from_path(
        &mut self,
        name: &str,
        flags: LookupFlags,
    ) -> VfsResult<InodeId> {
        let (sup, q) = self.get_path(name, LookupFlags::empty())?;
        let follow = if flags.contains(LookupFlags::FOLLOW) {
            LINK_FOLLOW
        } else {
            LINK_NO_FOLLOW
        };
        let base = flags & !LookupFlags::FOLLOW;

        let first = self.find_inode(sup, &q, follow, base);
        if let Ok(Some(ino)) = &first {
            return Ok(*ino);
        }
        if q.is_empty() {
            return self
                .find_inode(sup, &q, follow, base | LookupFlags::DIR)?
                .ok_or(VfsError::NotFound);
        }
        match first {
            Err(e) => Err(e),
            Ok(_) => Err(VfsError::NotFound),
        }
    }

    /// Full path of `ino` within its archive, rebuilt from the entry chain.
    ///
    /// Fails with `Detached` when the inode is no longer named by an entry.
    /// In the linear topology a snapshot's name already is its full path,
    /// so at most one parent hop is needed.
    pub(crate) fn fullpath(&self, ino: InodeId) -> VfsResult<String> {
        let ent = self.store.inode(ino).ent.ok_or(VfsError::Detached)?;

        if !self.sub.flags().contains(ClassFlags::REMOTE) {
            let root = self.store.super_ref(self.store.inode(ino).sup).root;
            let mut path = self.store.entry(ent).name.clone();
            let mut cur = ent;
            loop {
                let dir = match self.store.entry(cur).dir {
                    Some(d) => d,
                    None => break,
                };
                if root == Some(dir) {
                    break;
                }
                let pent = match self.store.inode(dir).ent {
                    Some(p) => p,
                    None => break,
                };
                path = format!("{}/{}", self.store.entry(pent).name, path);
                cur = pent;
            }
            return Ok(path);
        }

        match self.store.entry(ent).dir {
            Some(dir) => match self.store.inode(dir).ent {
                Some(pent) => Ok(format!(
                    "{}/{}",
                    self.store.entry(pent).name,
                    self.store.entry(ent).name
                )),
                None => Ok(self.store.entry(ent).name.clone()),
            },
            None => Ok(self.store.entry(ent).name.clone()),
        }
    }
}

#[cfg(test)]
mod canon_tests {
    use super::canonicalize;

    #[test]
    fn cleanup_rules() {
        assert_eq!(canonicalize("a/b/c"), "a/b/c");
        assert_eq!(canonicalize("./a//b/"), "a/b");
        assert_eq!(canonicalize("a/./b"), "a/b");
        assert_eq!(canonicalize("/a/b"), "a/b");
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("."), "");
        assert_eq!(canonicalize("////"), "");
    }

    #[test]
    fn dotdot_survives() {
        //The resolvers look ".." up literally; canonicalization must not
        //collapse it
        assert_eq!(canonicalize("a/../b"), "a/../b");
        assert_eq!(canonicalize(".."), "..");
        assert_eq!(canonicalize("../x/"), "../x");
    }
}

//! The arena owning every inode, entry and superblock of one filesystem
//! class.
//!
//! Each class keeps exactly one `Store`; subclass hooks receive it mutably
//! and build their object graphs through it. The store hands out integer
//! ids, keeps the global live-object counters, assigns inode numbers from a
//! per-class monotonic counter, and enforces the bookkeeping half of the
//! lifetime model: attaching an entry takes one `nlink` on its inode, and
//! the raw removal primitives keep the usage counters honest. The policy
//! half (recursive freeing, subclass destructor hooks, unlinking cached
//! local copies) lives in the cache core, which owns the subclass.
//!
//! Accessors panic on a stale id. Ids are only ever produced by this store
//! and invalidated by the free operations, so a stale id is a bug in the
//! caller, not a runtime condition to recover from.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;

use crate::types::{Entry, EntryId, FileKind, Inode, InodeId, Stat, Super, SuperId};

/// Arena of inodes, entries and superblocks for one filesystem class.
pub struct Store {
    inodes: HashMap<u64, Inode>,
    entries: HashMap<u64, Entry>,
    supers: HashMap<u64, Super>,
    /// Next inode id; doubles as the `st.ino` counter. Starts at 1 so 0
    /// stays free to mean "not filled in yet".
    next_inode: u64,
    next_entry: u64,
    next_super: u64,
    /// Device number stamped into every inode of this class.
    rdev: u64,
    total_inodes: usize,
    total_entries: usize,
    logfile: Option<File>,
}

impl Store {
    /// Fresh, empty arena for a class with device number `rdev`.
    pub fn new(rdev: u64) -> Store {
        Store {
            inodes: HashMap::new(),
            entries: HashMap::new(),
            supers: HashMap::new(),
            next_inode: 1,
            next_entry: 1,
            next_super: 1,
            rdev,
            total_inodes: 0,
            total_entries: 0,
            logfile: None,
        }
    }

    /// Borrow an inode. Panics on a stale id.
    pub fn inode(&self, id: InodeId) -> &Inode {
        self.inodes.get(&id.0).expect("stale inode id")
    }

    /// Mutably borrow an inode. Panics on a stale id.
    pub fn inode_mut(&mut self, id: InodeId) -> &mut Inode {
        self.inodes.get_mut(&id.0).expect("stale inode id")
    }

    /// Borrow an entry. Panics on a stale id.
    pub fn entry(&self, id: EntryId) -> &Entry {
        self.entries.get(&id.0).expect("stale entry id")
    }

    /// Mutably borrow an entry. Panics on a stale id.
    pub fn entry_mut(&mut self, id: EntryId) -> &mut Entry {
        self.entries.get_mut(&id.0).expect("stale entry id")
    }

    /// Borrow a superblock. Panics on a stale id.
    pub fn super_ref(&self, id: SuperId) -> &Super {
        self.supers.get(&id.0).expect("stale superblock id")
    }

    /// Mutably borrow a superblock. Panics on a stale id.
    pub fn super_mut(&mut self, id: SuperId) -> &mut Super {
        self.supers.get_mut(&id.0).expect("stale superblock id")
    }

    /// Allocate an inode owned by `sup`.
    ///
    /// Copies `init` if given, then overrides the identity fields: `nlink`
    /// starts at 0 (the inode becomes visible once an entry links to it),
    /// `st.ino` comes from the class counter and `st.dev` from the class
    /// device number. Bumps the superblock's `ino_usage` and the global
    /// inode count.
    pub fn new_inode(&mut self, sup: SuperId, init: Option<Stat>) -> InodeId {
        let id = InodeId(self.next_inode);
        self.next_inode += 1;

        let mut st = init.unwrap_or_default();
        st.nlink = 0;
        st.ino = id.0;
        st.dev = self.rdev;

        self.super_mut(sup).ino_usage += 1;
        self.total_inodes += 1;

        self.inodes.insert(
            id.0,
            Inode {
                st,
                sup,
                ent: None,
                subdir: Vec::new(),
                linkname: None,
                localname: None,
                timestamp: None,
                data: None,
            },
        );
        id
    }

    /// Allocate an entry named `name` for `ino`, and point the inode's
    /// named-by slot back at it. The entry is detached until
    /// [`insert_entry`](Store::insert_entry) places it in a directory.
    pub fn new_entry(&mut self, name: &str, ino: InodeId) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        self.total_entries += 1;

        self.entries.insert(
            id.0,
            Entry {
                name: name.to_string(),
                ino,
                dir: None,
            },
        );
        self.inode_mut(ino).ent = Some(id);
        id
    }

    /// Attach `ent` to the directory `dir`: set the parent pointer, append
    /// to the child list, and take one `nlink` on the entry's inode.
    pub fn insert_entry(&mut self, dir: InodeId, ent: EntryId) {
        self.entry_mut(ent).dir = Some(dir);
        let ino = self.entry(ent).ino;
        self.inode_mut(ino).st.nlink += 1;
        self.inode_mut(dir).subdir.push(ent);
    }

    /// Convenience: a fresh entry naming a fresh inode with default
    /// metadata, owned by `parent`'s superblock. Not yet inserted.
    pub fn generate_entry(
        &mut self,
        name: &str,
        parent: InodeId,
        init: Stat,
    ) -> EntryId {
        let sup = self.inode(parent).sup;
        let ino = self.new_inode(sup, Some(init));
        self.new_entry(name, ino)
    }

    /// Allocate an empty superblock. The subclass `open_archive` hook is
    /// responsible for filling `name` and `root`.
    pub fn new_super(&mut self) -> SuperId {
        let id = SuperId(self.next_super);
        self.next_super += 1;
        self.supers.insert(
            id.0,
            Super {
                name: String::new(),
                root: None,
                ino_usage: 0,
                fd_usage: 0,
                want_stale: false,
                data: None,
            },
        );
        id
    }

    /// Walk `path` below `root`, fabricating missing components as
    /// directories, and return the final directory inode. This is how
    /// archive openers build their tree while reading headers; entries are
    /// matched by exact name, so the path must already be in canonical form.
    pub fn ensure_dirs(&mut self, root: InodeId, path: &str) -> InodeId {
        let mut dir = root;
        for seg in path.split('/') {
            if seg.is_empty() || seg == "." {
                continue;
            }
            let found = self
                .inode(dir)
                .subdir
                .iter()
                .copied()
                .find(|&e| self.entry(e).name == seg);
            dir = match found {
                Some(e) => self.entry(e).ino,
                None => {
                    let ent = self.generate_entry(
                        seg,
                        dir,
                        Stat::default_for(FileKind::Directory, 0o755),
                    );
                    self.insert_entry(dir, ent);
                    self.entry(ent).ino
                }
            };
        }
        dir
    }

    /// Raw removal of an entry: detach it from its parent's child list,
    /// clear the inode's named-by pointer if it points here, and drop the
    /// entry. Does *not* release the inode reference; the class-level free
    /// does that, in order to run the subclass hooks.
    pub fn remove_entry(&mut self, id: EntryId) -> Entry {
        let ent = self.entries.remove(&id.0).expect("stale entry id");
        if let Some(dir) = ent.dir {
            if let Some(d) = self.inodes.get_mut(&dir.0) {
                d.subdir.retain(|&e| e != id);
            }
        }
        if let Some(ino) = self.inodes.get_mut(&ent.ino.0) {
            if ino.ent == Some(id) {
                ino.ent = None;
            }
        }
        self.total_entries -= 1;
        ent
    }

    /// Raw removal of an inode: release the arena slot and decrement the
    /// usage counters. The caller has already freed the children and is
    /// about to run the subclass destructor on the returned value.
    pub fn remove_inode(&mut self, id: InodeId) -> Inode {
        let ino = self.inodes.remove(&id.0).expect("stale inode id");
        if let Some(sup) = self.supers.get_mut(&ino.sup.0) {
            sup.ino_usage -= 1;
        }
        self.total_inodes -= 1;
        ino
    }

    /// Raw removal of a superblock slot.
    pub fn remove_super(&mut self, id: SuperId) -> Super {
        self.supers.remove(&id.0).expect("stale superblock id")
    }

    /// Live inode count across every superblock of the class.
    pub fn total_inodes(&self) -> usize {
        self.total_inodes
    }

    /// Live entry count across every superblock of the class.
    pub fn total_entries(&self) -> usize {
        self.total_entries
    }

    /// Install (or drop) the wire-traffic log sink.
    pub fn set_logfile(&mut self, f: Option<File>) {
        self.logfile = f;
    }

    /// Append raw protocol bytes to the wire log, if one is armed. Write
    /// failures are swallowed; tracing must never break the transfer.
    pub fn log_wire(&mut self, bytes: &[u8]) {
        if let Some(f) = self.logfile.as_mut() {
            let _ = f.write_all(bytes);
            let _ = f.flush();
        }
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;
    use crate::types::FileKind;

    fn fixture() -> (Store, SuperId, InodeId) {
        let mut store = Store::new(42);
        let sup = store.new_super();
        let root = store.new_inode(sup, Some(Stat::default_for(FileKind::Directory, 0o755)));
        store.super_mut(sup).root = Some(root);
        (store, sup, root)
    }

    #[test]
    fn inode_identity() {
        let (mut store, sup, root) = fixture();
        let a = store.new_inode(sup, None);
        let b = store.new_inode(sup, None);

        //Monotonic, unique inode numbers; class device number stamped in
        assert_ne!(store.inode(a).st.ino, store.inode(b).st.ino);
        assert!(store.inode(a).st.ino < store.inode(b).st.ino);
        assert_eq!(store.inode(a).st.dev, 42);
        assert_eq!(store.inode(a).st.nlink, 0);

        //root + 2 fresh inodes
        assert_eq!(store.super_ref(sup).ino_usage, 3);
        assert_eq!(store.total_inodes(), 3);
        let _ = root;
    }

    #[test]
    fn link_bookkeeping() {
        let (mut store, _sup, root) = fixture();
        let ent = store.generate_entry("a", root, Stat::default_for(FileKind::Regular, 0o644));
        let ino = store.entry(ent).ino;

        //Visible only once inserted
        assert_eq!(store.inode(ino).st.nlink, 0);
        assert_eq!(store.inode(ino).ent, Some(ent));
        store.insert_entry(root, ent);
        assert_eq!(store.inode(ino).st.nlink, 1);
        assert_eq!(store.entry(ent).dir, Some(root));
        assert_eq!(store.inode(root).subdir, vec![ent]);

        //Raw removal detaches both directions but leaves the nlink alone
        let gone = store.remove_entry(ent);
        assert_eq!(gone.ino, ino);
        assert!(store.inode(root).subdir.is_empty());
        assert_eq!(store.inode(ino).ent, None);
        assert_eq!(store.inode(ino).st.nlink, 1);
        assert_eq!(store.total_entries(), 0);
    }

    #[test]
    fn ensure_dirs_walks_and_creates() {
        let (mut store, _sup, root) = fixture();
        let deep = store.ensure_dirs(root, "usr/src/linux");
        assert_eq!(store.inode(deep).st.kind, FileKind::Directory);

        //Re-walking reuses the existing chain
        let again = store.ensure_dirs(root, "usr/src");
        let usr = store.inode(root).subdir[0];
        assert_eq!(store.entry(usr).name, "usr");
        let src = store.inode(store.entry(usr).ino).subdir[0];
        assert_eq!(store.entry(src).ino, again);
        assert_eq!(store.total_entries(), 3);
    }
}

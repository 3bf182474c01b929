#![allow(dead_code)]

//Some more general testing utilities
use dircache_api::fs::ArchiveSupport;
use dircache_api::types::FileHandle;

use crate::class::CacheFS;

//Enumerate a directory through the handle interface and return the sorted
//names
pub fn dir_names<S: ArchiveSupport>(vfs: &mut CacheFS<S>, path: &str) -> Vec<String> {
    let mut handle = vfs.opendir(path).unwrap();
    let mut names = Vec::new();
    while let Some(name) = vfs.readdir(&mut handle) {
        names.push(name);
    }
    vfs.closedir(handle);
    names.sort();
    names
}

//Drain an open file handle to the end
pub fn read_all<S: ArchiveSupport>(vfs: &mut CacheFS<S>, fh: &mut FileHandle) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = vfs.read(fh, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

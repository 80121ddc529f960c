//! Byte-for-byte reproducible `.tar.gz` archives of a directory tree.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use tar::{EntryType, Header};
use walkdir::WalkDir;

/// `go+u,go-w`: group and other get the owner's bits, minus write.
fn normalize_mode(mode: u32) -> u32 {
    let owner = mode & 0o700;
    (mode | (owner >> 3) | (owner >> 6)) & !0o022 & 0o7777
}

fn base_header(entry_type: EntryType, mode: u32) -> Header {
    let mut header = Header::new_ustar();
    header.set_entry_type(entry_type);
    header.set_mode(normalize_mode(mode));
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    let _ = header.set_username("");
    let _ = header.set_groupname("");
    header.set_size(0);
    header
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

/// Archive `dir` so that it extracts to `<root_name>/...`.
///
/// Entries are sorted by name, timestamps are zeroed, ownership is numeric
/// root, and the gzip header carries neither a file name nor a timestamp.
pub fn pack(dir: &Path, root_name: &str, out: &Path) -> io::Result<()> {
    let file = BufWriter::new(File::create(out)?);
    let gz = GzBuilder::new().mtime(0).write(file, Compression::best());
    let mut builder = tar::Builder::new(gz);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(io::Error::other)?;
        let name: PathBuf = Path::new(root_name).join(rel);
        let meta = entry.path().symlink_metadata()?;
        let mode = file_mode(&meta);

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            let mut header = base_header(EntryType::Symlink, 0o777);
            builder.append_link(&mut header, &name, &target)?;
        } else if meta.is_dir() {
            let mut header = base_header(EntryType::Directory, mode);
            builder.append_data(&mut header, &name, io::empty())?;
        } else if meta.is_file() {
            let mut header = base_header(EntryType::Regular, mode);
            header.set_size(meta.len());
            builder.append_data(&mut header, &name, File::open(entry.path())?)?;
        }
    }

    let gz = builder.into_inner()?;
    let mut file = gz.finish()?;
    io::Write::flush(&mut file)?;
    Ok(())
}

/// [`pack`] on the blocking pool.
pub async fn pack_tree(dir: PathBuf, root_name: String, out: PathBuf) -> io::Result<PathBuf> {
    tokio::task::spawn_blocking(move || pack(&dir, &root_name, &out).map(|_| out))
        .await
        .map_err(io::Error::other)?
}

/// Recursively copy `src` to `dest`, preserving symlinks.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(std::fs::read_link(entry.path())?, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn populate(dir: &Path) {
        std::fs::create_dir_all(dir.join("src/nested")).unwrap();
        std::fs::write(dir.join("src/b.c"), "int b;\n").unwrap();
        std::fs::write(dir.join("src/a.c"), "int a;\n").unwrap();
        std::fs::write(dir.join("src/nested/z.h"), "#pragma once\n").unwrap();
        std::fs::write(dir.join("README"), "hi\n").unwrap();
    }

    #[test]
    fn modes_are_normalised() {
        assert_eq!(normalize_mode(0o700), 0o755);
        assert_eq!(normalize_mode(0o600), 0o644);
        assert_eq!(normalize_mode(0o666), 0o644);
        assert_eq!(normalize_mode(0o4755), 0o4755);
    }

    #[test]
    fn archives_are_reproducible_across_copies() {
        let tmp = tempfile::tempdir().unwrap();
        let one = tmp.path().join("one");
        populate(&one);
        let two = tmp.path().join("two");
        copy_tree(&one, &two).unwrap();
        // Different mtimes on the copy must not matter.
        std::fs::write(two.join("README"), "hi\n").unwrap();

        let a = tmp.path().join("a.tar.gz");
        let b = tmp.path().join("b.tar.gz");
        pack(&one, "libpng", &a).unwrap();
        pack(&two, "libpng", &b).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    #[test]
    fn entries_are_rooted_sorted_and_owned_by_root() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("checkout");
        populate(&src);
        let out = tmp.path().join("out.tar.gz");
        pack(&src, "fuzz-tooling", &out).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&out).unwrap()));
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.mtime().unwrap(), 0);
            assert_eq!(header.uid().unwrap(), 0);
            let name = entry.path().unwrap().display().to_string();
            if name.ends_with("a.c") {
                let mut body = String::new();
                entry.read_to_string(&mut body).unwrap();
                assert_eq!(body, "int a;\n");
            }
            names.push(name);
        }
        assert!(names.iter().all(|n| n.starts_with("fuzz-tooling")));
        let a = names.iter().position(|n| n.ends_with("src/a.c")).unwrap();
        let b = names.iter().position(|n| n.ends_with("src/b.c")).unwrap();
        assert!(a < b);
    }
}

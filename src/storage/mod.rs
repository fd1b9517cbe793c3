use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sector::header::{Geometry, Header};

pub mod alloc;

/// Raw byte-addressable file with advisory whole-file locking.
///
/// Locks nest by reference count per instance; only the outermost
/// acquisition and release touch the OS. A shared hold is upgraded in
/// place when an exclusive acquisition nests inside it.
pub(crate) struct StorageFile {
    path: PathBuf,
    file: File,
    pub read_only: bool,
    locking: bool,
    autoflush: bool,
    depth: u32,
    exclusive: bool,
    dirty: bool,
    #[cfg(unix)]
    ino: u64,
}

#[cfg(unix)]
fn inode_of(file: &File) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(file.metadata()?.ino())
}

impl StorageFile {
    pub fn open(path: &Path, read_only: bool, locking: bool, autoflush: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            #[cfg(unix)]
            ino: inode_of(&file)?,
            file,
            read_only,
            locking,
            autoflush,
            depth: 0,
            exclusive: false,
            dirty: false,
        })
    }

    /// Detects the file being renamed or replaced underneath us and
    /// transparently reopens the path.
    fn check_reopen(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;

            let current = match std::fs::metadata(&self.path) {
                Ok(meta) => meta.ino(),
                Err(_) => return Ok(()),
            };
            if current != self.ino {
                warn!(path = %self.path.display(), "inode changed, reopening");
                let file = OpenOptions::new()
                    .read(true)
                    .write(!self.read_only)
                    .open(&self.path)?;
                self.ino = inode_of(&file)?;
                self.file = file;
            }
        }
        Ok(())
    }

    /// Acquires the advisory lock, nesting by refcount. Returns whether
    /// the caller must re-read shared on-disk state: true on the
    /// outermost acquisition and on a shared-to-exclusive upgrade.
    pub fn enter(&mut self, exclusive: bool) -> Result<bool> {
        if self.depth == 0 {
            self.check_reopen()?;
            if self.locking {
                if exclusive {
                    self.file.lock_exclusive()?;
                } else {
                    self.file.lock_shared()?;
                }
            }
            self.exclusive = exclusive;
            self.depth = 1;
            return Ok(true);
        }

        if exclusive && !self.exclusive {
            if self.locking {
                self.file.lock_exclusive()?;
            }
            self.exclusive = true;
            self.depth += 1;
            return Ok(true);
        }
        self.depth += 1;
        Ok(false)
    }

    pub fn exit(&mut self) -> Result<()> {
        debug_assert!(self.depth > 0, "unbalanced lock release");
        self.depth -= 1;
        if self.depth == 0 {
            if self.dirty && self.autoflush {
                self.file.sync_data()?;
            }
            if self.locking {
                self.file.unlock()?;
            }
            self.exclusive = false;
            self.dirty = false;
        }
        Ok(())
    }

    pub fn read_at(&mut self, off: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::corrupt(format!("short read of {len} bytes at {off:#x}"))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf)
    }

    pub fn write_at(&mut self, off: u64, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::Readonly);
        }
        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(bytes)?;
        self.dirty = true;
        Ok(())
    }

    pub fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// The file plus its decoded header. Everything that touches sectors
/// hangs off this: allocation, sector codecs, the index cascade, slot
/// operations and the transaction walks.
pub(crate) struct FileStore {
    pub file: StorageFile,
    pub header: Header,
}

impl FileStore {
    pub fn geo(&self) -> Geometry {
        self.header.geo
    }

    /// Re-reads the mutable header tail. Called after every outermost
    /// lock acquisition so other processes' allocations and transaction
    /// state become visible.
    pub fn reload_state(&mut self) -> Result<()> {
        let off = self.header.state_off();
        let len = self.header.state_len();
        let buf = self.file.read_at(off, len)?;
        self.header.apply_state(&buf);
        Ok(())
    }

    pub fn persist_state(&mut self) -> Result<()> {
        let off = self.header.state_off();
        let buf = self.header.encode_state()?;
        self.file.write_at(off, &buf)
    }

    pub fn bump_gen(&mut self) -> Result<u32> {
        self.header.gen_counter = self.header.gen_counter.wrapping_add(1);
        self.persist_state()?;
        debug!(gen = self.header.gen_counter, "generation bumped");
        Ok(self.header.gen_counter)
    }

    pub fn read_long_at(&mut self, off: u64) -> Result<u64> {
        let geo = self.geo();
        let buf = self.file.read_at(off, geo.long_len)?;
        Ok(geo.get_long(&buf, 0))
    }

    pub fn write_long_at(&mut self, off: u64, value: u64) -> Result<()> {
        let bytes = self.geo().long_bytes(value)?;
        self.file.write_at(off, &bytes)
    }

    pub fn end_off(&mut self) -> Result<u64> {
        let len = self.file.len()?;
        Ok(len.max(self.header.root_locator_off()))
    }
}

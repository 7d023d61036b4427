use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::debug;

use super::{error::StoreError, layout::PAGE_SIZE, page::Page, Result};

/// Clean pages beyond this count are evicted before new ones are read
const CACHE_PAGE_LIMIT: usize = 256;

/// Byte-addressed access to a file through a cache of fixed-size pages.
///
/// Writes only touch cached pages; nothing reaches the file until
/// [flush](Pager::flush). The logical length may differ from the on-disk
/// length in between.
pub struct Pager {
    path: PathBuf,
    out: File,
    len: u64,
    disk_len: u64,
    sync: bool,
    cache: RefCell<HashMap<u64, Page>>,
    dirty: HashSet<u64>,
}

impl Pager {
    pub fn open(path: &Path, sync: bool) -> Result<Self> {
        let out = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = out.metadata()?.len();
        debug!("opened pager on {:?}; {} bytes", path, len);

        Ok(Self {
            path: path.to_path_buf(),
            out,
            len,
            disk_len: len,
            sync,
            cache: RefCell::new(HashMap::new()),
            dirty: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical length including unflushed writes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.len != self.disk_len
    }

    /// Reads exactly `len` bytes at `offset`.
    ///
    /// Reading past the logical end of the file is a structural error.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset.checked_add(len as u64).unwrap_or(u64::MAX);
        if end > self.len {
            return Err(StoreError::bad_indexes(format!(
                "read of {len} bytes at {offset} passes the end of {:?} ({} bytes)",
                self.path.file_name().unwrap_or_default(),
                self.len
            )));
        }
        self.read_range(offset, len)
    }

    /// Reads up to `len` bytes at `offset`, stopping at the end of the file
    pub fn read_available(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset >= self.len {
            return Ok(Vec::new());
        }
        let len = len.min((self.len - offset) as usize);
        self.read_range(offset, len)
    }

    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        let end = offset + len as u64;

        while pos < end {
            let num = pos / PAGE_SIZE as u64;
            let start = (pos % PAGE_SIZE as u64) as usize;
            let take = (PAGE_SIZE - start).min((end - pos) as usize);

            self.load_page(num)?;
            let cache = self.cache.borrow();
            if let Some(page) = cache.get(&num) {
                out.extend_from_slice(&page[start..start + take]);
            }
            pos += take as u64;
        }

        Ok(out)
    }

    /// Writes `bytes` at `offset`, extending the logical length if needed
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut pos = offset;
        let mut written = 0;

        while written < bytes.len() {
            let num = pos / PAGE_SIZE as u64;
            let start = (pos % PAGE_SIZE as u64) as usize;
            let take = (PAGE_SIZE - start).min(bytes.len() - written);

            self.load_page(num)?;
            if let Some(page) = self.cache.get_mut().get_mut(&num) {
                page[start..start + take].clone_from_slice(&bytes[written..written + take]);
            }
            self.dirty.insert(num);

            pos += take as u64;
            written += take;
        }

        self.len = self.len.max(offset + bytes.len() as u64);
        Ok(())
    }

    /// Shrinks the logical length; bytes past `len` read back as zero if regrown
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        if len >= self.len {
            return Ok(());
        }

        let boundary = len / PAGE_SIZE as u64;
        let start = (len % PAGE_SIZE as u64) as usize;
        if start > 0 {
            self.load_page(boundary)?;
        }

        let first_dropped = len.div_ceil(PAGE_SIZE as u64);
        let cache = self.cache.get_mut();
        cache.retain(|num, _| *num < first_dropped);
        self.dirty.retain(|num| *num < first_dropped);

        if let Some(page) = cache.get_mut(&boundary).filter(|_| start > 0) {
            page[start..].fill(0);
            self.dirty.insert(boundary);
        }

        self.len = len;
        self.disk_len = self.disk_len.min(len);
        Ok(())
    }

    /// Writes every dirty page and resizes the file to the logical length
    pub fn flush(&mut self) -> Result<()> {
        let mut pages: Vec<u64> = self.dirty.drain().collect();
        pages.sort_unstable();

        let cache = self.cache.get_mut();
        for num in pages {
            let offset = num * PAGE_SIZE as u64;
            if offset >= self.len {
                continue;
            }
            let Some(page) = cache.get(&num) else {
                continue;
            };

            let len = (PAGE_SIZE as u64).min(self.len - offset) as usize;
            self.out.seek(SeekFrom::Start(offset))?;
            self.out.write_all(&page[..len])?;
        }

        if self.out.metadata()?.len() != self.len {
            self.out.set_len(self.len)?;
        }
        self.disk_len = self.len;

        self.out.flush()?;
        if self.sync {
            self.out.sync_data()?;
        }
        debug!("flushed {:?}; {} bytes", self.path, self.len);

        Ok(())
    }

    fn load_page(&self, num: u64) -> Result<()> {
        if self.cache.borrow().contains_key(&num) {
            return Ok(());
        }

        let offset = num * PAGE_SIZE as u64;
        let page = if offset < self.disk_len {
            let len = (PAGE_SIZE as u64).min(self.disk_len - offset) as usize;
            let mut buf = vec![0u8; len];
            let mut reader = &self.out;
            reader.seek(SeekFrom::Start(offset))?;
            reader.read_exact(&mut buf)?;
            Page::from_prefix(&buf)
        } else {
            Page::zeroed()
        };

        let mut cache = self.cache.borrow_mut();
        if cache.len() >= CACHE_PAGE_LIMIT {
            cache.retain(|n, _| self.dirty.contains(n));
        }
        cache.insert(num, page);

        Ok(())
    }
}

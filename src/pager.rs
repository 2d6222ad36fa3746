/*
Disk layout, page 0 (database header):

Offset  Size  Description
0       8     Magic string "chidb\0\0\0"
8       4     Page size in bytes (power of two, >= 512)
12      4     File format version (currently 1)
16      4     Number of pages in the file
20      4     Page number of the free list head (0 = no free pages)

The remainder of page 0 is unused. All fixed width header integers are
big-endian. Every page after page 0 is a b-tree node.
*/

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::errors::{DbError, Result};
use crate::util::{pack_uint32, unpack_uint32};

pub const MAGIC_NUMBER: &[u8; 8] = b"chidb\x00\x00\x00";
pub const DB_VERSION: u32 = 1;
pub const DB_HEADER_SIZE: usize = 24;
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

const PAGE_SIZE_OFFSET: usize = 8;
const VERSION_OFFSET: usize = 12;
const NUM_PAGES_OFFSET: usize = 16;
const FREE_LIST_OFFSET: usize = 20;

/// The pager mediates every read and write through a write-back page cache.
/// Pages are numbered from 0; page 0 holds the database header.
#[derive(Debug)]
pub struct Pager {
    path: PathBuf,
    page_size: u32,
    file: Option<File>,
    cache: HashMap<u32, Vec<u8>>,
    dirty: BTreeSet<u32>,
    num_pages: u32,
}

impl Pager {
    /// Open an existing database file or create a new one. When the file
    /// already exists its stored page size wins over the requested one.
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Pager> {
        if page_size < 512 || !page_size.is_power_of_two() {
            return Err(DbError::corrupt(format!(
                "page size must be a power of two and at least 512 bytes, got {page_size}"
            )));
        }

        let path = path.as_ref().to_path_buf();
        let mut pager = Pager {
            path,
            page_size,
            file: None,
            cache: HashMap::new(),
            dirty: BTreeSet::new(),
            num_pages: 0,
        };

        let exists = pager
            .path
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if exists {
            pager.open_existing()?;
        } else {
            pager.create_new()?;
        }

        Ok(pager)
    }

    fn open_existing(&mut self) -> Result<()> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;

        let mut header = [0u8; DB_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        let read = file.read(&mut header)?;
        if read < DB_HEADER_SIZE {
            return Err(DbError::corrupt("database header too short"));
        }

        if &header[0..8] != MAGIC_NUMBER {
            return Err(DbError::corrupt("bad magic number"));
        }

        let stored_page_size = unpack_uint32(&header, PAGE_SIZE_OFFSET)?;
        if stored_page_size < 512 || !stored_page_size.is_power_of_two() {
            return Err(DbError::corrupt(format!(
                "impossible stored page size {stored_page_size}"
            )));
        }
        if stored_page_size != self.page_size {
            warn!(
                "database page size ({}) differs from requested ({}), using database page size",
                stored_page_size, self.page_size
            );
            self.page_size = stored_page_size;
        }

        let version = unpack_uint32(&header, VERSION_OFFSET)?;
        if version != DB_VERSION {
            return Err(DbError::corrupt(format!(
                "unsupported format version {version}"
            )));
        }

        let file_size = file.seek(SeekFrom::End(0))?;
        self.num_pages = (file_size / self.page_size as u64) as u32;
        self.file = Some(file);

        info!(
            "opened database '{}' with {} pages",
            self.path.display(),
            self.num_pages
        );
        Ok(())
    }

    fn create_new(&mut self) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        let header = self.build_header();
        file.write_all(&header)?;
        file.flush()?;

        self.num_pages = 1;
        self.file = Some(file);

        info!("created new database '{}'", self.path.display());
        Ok(())
    }

    fn build_header(&self) -> Vec<u8> {
        let mut header = vec![0u8; self.page_size as usize];
        header[0..8].copy_from_slice(MAGIC_NUMBER);
        header[PAGE_SIZE_OFFSET..PAGE_SIZE_OFFSET + 4].copy_from_slice(&pack_uint32(self.page_size));
        header[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&pack_uint32(DB_VERSION));
        header[NUM_PAGES_OFFSET..NUM_PAGES_OFFSET + 4].copy_from_slice(&pack_uint32(1));
        header[FREE_LIST_OFFSET..FREE_LIST_OFFSET + 4].copy_from_slice(&pack_uint32(0));
        header
    }

    /// Read a page from cache or disk. The returned buffer is a copy; edits
    /// do not take effect until the caller hands it back via `write_page`.
    pub fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>> {
        if page_id >= self.num_pages {
            return Err(DbError::out_of_range(format!(
                "page id {page_id} exceeds page count {}",
                self.num_pages
            )));
        }

        if let Some(data) = self.cache.get(&page_id) {
            debug!("page read (cached): {page_id}");
            return Ok(data.clone());
        }

        let page_size = self.page_size;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(page_id as u64 * page_size as u64))?;
        let mut data = vec![0u8; page_size as usize];
        file.read_exact(&mut data)
            .map_err(|_| DbError::corrupt(format!("failed to read complete page {page_id}")))?;

        self.cache.insert(page_id, data.clone());
        debug!("page read (disk): {page_id}");
        Ok(data)
    }

    /// Overwrite a page in the cache and mark it dirty. Nothing is persisted
    /// until the next flush.
    pub fn write_page(&mut self, page_id: u32, data: &[u8]) -> Result<()> {
        if page_id >= self.num_pages {
            return Err(DbError::out_of_range(format!(
                "page id {page_id} exceeds page count {}",
                self.num_pages
            )));
        }
        if data.len() != self.page_size as usize {
            return Err(DbError::corrupt(format!(
                "page data must be exactly {} bytes, got {}",
                self.page_size,
                data.len()
            )));
        }

        self.cache.insert(page_id, data.to_vec());
        self.dirty.insert(page_id);
        debug!("page write: {page_id}");
        Ok(())
    }

    /// Append a zeroed page and return its id. The header page count is
    /// updated in the cache, which marks page 0 dirty.
    pub fn allocate_page(&mut self) -> Result<u32> {
        let new_page_id = self.num_pages;
        self.num_pages += 1;

        self.cache
            .insert(new_page_id, vec![0u8; self.page_size as usize]);
        self.dirty.insert(new_page_id);

        let mut header = self.read_page(0)?;
        header[NUM_PAGES_OFFSET..NUM_PAGES_OFFSET + 4]
            .copy_from_slice(&pack_uint32(self.num_pages));
        self.cache.insert(0, header);
        self.dirty.insert(0);

        debug!("page allocate: {new_page_id}");
        Ok(new_page_id)
    }

    /// Write every dirty page to its slot in the file, then sync.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }

        let page_size = self.page_size as u64;
        let dirty: Vec<u32> = self.dirty.iter().copied().collect();
        for page_id in dirty {
            let data = match self.cache.get(&page_id) {
                Some(data) => data.clone(),
                None => continue,
            };
            let file = self.file_mut()?;
            file.seek(SeekFrom::Start(page_id as u64 * page_size))?;
            file.write_all(&data)?;
        }

        self.file_mut()?.sync_data()?;
        self.dirty.clear();

        debug!("flushed all dirty pages to disk");
        Ok(())
    }

    /// Flush and release the file handle.
    pub fn close(&mut self) -> Result<()> {
        if self.file.is_some() {
            self.flush()?;
            self.file = None;
            self.cache.clear();
            info!("closed database '{}'", self.path.display());
        }
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| DbError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "database file is closed",
            )))
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(err) = self.flush() {
                warn!("flush on drop failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> (NamedTempFile, PathBuf) {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        (file, path)
    }

    #[test]
    fn test_create_new_database() {
        let (_guard, path) = temp_path();
        let pager = Pager::open(&path, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(pager.num_pages(), 1);
        assert_eq!(pager.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_invalid_page_size_rejected() {
        let (_guard, path) = temp_path();
        assert!(Pager::open(&path, 100).is_err());
        assert!(Pager::open(&path, 1000).is_err());
        assert!(Pager::open(&path, 0).is_err());
    }

    #[test]
    fn test_valid_page_sizes_round_trip() {
        for size in [512u32, 1024, 2048, 4096, 8192] {
            let (_guard, path) = temp_path();
            {
                let mut pager = Pager::open(&path, size).unwrap();
                pager.close().unwrap();
            }
            let pager = Pager::open(&path, DEFAULT_PAGE_SIZE).unwrap();
            assert_eq!(pager.page_size(), size);
            assert_eq!(pager.num_pages(), 1);
        }
    }

    #[test]
    fn test_header_contents() {
        let (_guard, path) = temp_path();
        let mut pager = Pager::open(&path, 4096).unwrap();
        let header = pager.read_page(0).unwrap();
        assert_eq!(&header[0..8], MAGIC_NUMBER);
        assert_eq!(unpack_uint32(&header, PAGE_SIZE_OFFSET).unwrap(), 4096);
        assert_eq!(unpack_uint32(&header, VERSION_OFFSET).unwrap(), DB_VERSION);
        assert_eq!(unpack_uint32(&header, NUM_PAGES_OFFSET).unwrap(), 1);
        assert_eq!(unpack_uint32(&header, FREE_LIST_OFFSET).unwrap(), 0);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let (_guard, path) = temp_path();
        std::fs::write(&path, vec![0xAAu8; 4096]).unwrap();
        match Pager::open(&path, 4096) {
            Err(DbError::CorruptFormat(msg)) => assert!(msg.contains("magic")),
            other => panic!("expected CorruptFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_short_header_rejected() {
        let (_guard, path) = temp_path();
        std::fs::write(&path, b"chi").unwrap();
        assert!(matches!(
            Pager::open(&path, 4096),
            Err(DbError::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_read_page_out_of_range() {
        let (_guard, path) = temp_path();
        let mut pager = Pager::open(&path, 4096).unwrap();
        assert!(matches!(
            pager.read_page(1),
            Err(DbError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_write_page_wrong_size() {
        let (_guard, path) = temp_path();
        let mut pager = Pager::open(&path, 4096).unwrap();
        assert!(pager.write_page(0, &[0u8; 100]).is_err());
    }

    #[test]
    fn test_write_then_read_uses_cache() {
        let (_guard, path) = temp_path();
        let mut pager = Pager::open(&path, 4096).unwrap();
        let page_id = pager.allocate_page().unwrap();

        let mut data = vec![0u8; 4096];
        data[0] = 0x42;
        pager.write_page(page_id, &data).unwrap();

        let read_back = pager.read_page(page_id).unwrap();
        assert_eq!(read_back[0], 0x42);
    }

    #[test]
    fn test_read_page_returns_copy() {
        let (_guard, path) = temp_path();
        let mut pager = Pager::open(&path, 4096).unwrap();
        let page_id = pager.allocate_page().unwrap();

        let mut data = pager.read_page(page_id).unwrap();
        data[0] = 0x99;
        // mutation without write_page must not be visible
        let fresh = pager.read_page(page_id).unwrap();
        assert_eq!(fresh[0], 0);
    }

    #[test]
    fn test_allocate_pages() {
        let (_guard, path) = temp_path();
        let mut pager = Pager::open(&path, 4096).unwrap();
        assert_eq!(pager.allocate_page().unwrap(), 1);
        assert_eq!(pager.allocate_page().unwrap(), 2);
        assert_eq!(pager.num_pages(), 3);

        let allocated = pager.read_page(2).unwrap();
        assert!(allocated.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_flush_persists_pages() {
        let (_guard, path) = temp_path();
        {
            let mut pager = Pager::open(&path, 4096).unwrap();
            let page_id = pager.allocate_page().unwrap();
            let mut data = vec![0u8; 4096];
            data[17] = 0x7E;
            pager.write_page(page_id, &data).unwrap();
            pager.close().unwrap();
        }

        let mut pager = Pager::open(&path, 4096).unwrap();
        assert_eq!(pager.num_pages(), 2);
        let data = pager.read_page(1).unwrap();
        assert_eq!(data[17], 0x7E);
    }

    #[test]
    fn test_flush_without_close_persists() {
        let (_guard, path) = temp_path();
        {
            let mut pager = Pager::open(&path, 4096).unwrap();
            pager.allocate_page().unwrap();

            let mut data = vec![0u8; 4096];
            data[0] = 0xFF;
            pager.write_page(1, &data).unwrap();
            pager.flush().unwrap();
        }
        let mut pager = Pager::open(&path, 4096).unwrap();
        assert_eq!(pager.read_page(1).unwrap()[0], 0xFF);
    }
}

use byteorder::{ByteOrder, NativeEndian};
use thiserror::Error;

use crate::common::types::{PageId, PAGE_SIZE};

/// The header page lives at page id 0 and maps index names to their root
/// page ids. Layout: a u32 record count followed by fixed-size records of a
/// zero-padded 32-byte name and a 4-byte root page id.
pub const HEADER_PAGE_ID: PageId = 0;

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_LEN: usize = 32;
const RECORD_SIZE: usize = NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

#[derive(Error, Debug)]
pub enum HeaderPageError {
    #[error("index name longer than {NAME_LEN} bytes: {0}")]
    NameTooLong(String),
    #[error("header page is full ({MAX_RECORDS} records)")]
    PageFull,
}

/// Accessors for the header page's record array, operating on the raw page
/// bytes so callers go through whatever guard discipline they already hold.
pub struct HeaderPage;

impl HeaderPage {
    pub fn record_count(data: &[u8]) -> u32 {
        NativeEndian::read_u32(&data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4])
    }

    /// Append a `(name, root_id)` record. Fails on duplicate-insensitive
    /// grounds only if the page is out of space or the name does not fit.
    pub fn insert_record(data: &mut [u8], name: &str, root_id: PageId) -> Result<(), HeaderPageError> {
        if name.len() > NAME_LEN {
            return Err(HeaderPageError::NameTooLong(name.to_string()));
        }
        let count = Self::record_count(data) as usize;
        if count == MAX_RECORDS {
            return Err(HeaderPageError::PageFull);
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        data[offset..offset + NAME_LEN].fill(0);
        data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        NativeEndian::write_i32(&mut data[offset + NAME_LEN..offset + RECORD_SIZE], root_id);
        NativeEndian::write_u32(
            &mut data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4],
            count as u32 + 1,
        );
        Ok(())
    }

    /// Root page id recorded under `name`, if any
    pub fn get_root_id(data: &[u8], name: &str) -> Option<PageId> {
        let slot = Self::find_record(data, name)?;
        let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
        Some(NativeEndian::read_i32(&data[offset + NAME_LEN..offset + RECORD_SIZE]))
    }

    /// Overwrite the root id of an existing record. Returns false if the
    /// name is not present.
    pub fn update_root_id(data: &mut [u8], name: &str, root_id: PageId) -> bool {
        let Some(slot) = Self::find_record(data, name) else {
            return false;
        };
        let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
        NativeEndian::write_i32(&mut data[offset + NAME_LEN..offset + RECORD_SIZE], root_id);
        true
    }

    fn find_record(data: &[u8], name: &str) -> Option<usize> {
        if name.len() > NAME_LEN {
            return None;
        }
        let count = Self::record_count(data) as usize;
        let mut padded = [0u8; NAME_LEN];
        padded[..name.len()].copy_from_slice(name.as_bytes());

        (0..count).find(|slot| {
            let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
            data[offset..offset + NAME_LEN] == padded
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_update() {
        let mut data = vec![0u8; PAGE_SIZE];
        assert_eq!(HeaderPage::record_count(&data), 0);

        HeaderPage::insert_record(&mut data, "orders_pk", 7).unwrap();
        HeaderPage::insert_record(&mut data, "orders_date_idx", 12).unwrap();
        assert_eq!(HeaderPage::record_count(&data), 2);

        assert_eq!(HeaderPage::get_root_id(&data, "orders_pk"), Some(7));
        assert_eq!(HeaderPage::get_root_id(&data, "orders_date_idx"), Some(12));
        assert_eq!(HeaderPage::get_root_id(&data, "missing"), None);

        assert!(HeaderPage::update_root_id(&mut data, "orders_pk", 42));
        assert_eq!(HeaderPage::get_root_id(&data, "orders_pk"), Some(42));
        assert!(!HeaderPage::update_root_id(&mut data, "missing", 1));
    }

    #[test]
    fn test_name_too_long() {
        let mut data = vec![0u8; PAGE_SIZE];
        let long = "x".repeat(33);
        assert!(HeaderPage::insert_record(&mut data, &long, 1).is_err());
    }
}

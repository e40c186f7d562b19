pub mod types;

pub use types::{FrameId, Page, PagePtr, PageId, Rid, TableId, TxnId};
pub use types::{INVALID_PAGE_ID, PAGE_SIZE};

use byteorder::{ByteOrder, NativeEndian};

/// An index key: totally ordered with a fixed-width on-page encoding.
/// The key width is fixed per index instantiation; encoding follows the
/// host's endianness (persisted files are not portable across
/// architectures).
pub trait IndexKey: Copy + Ord + std::fmt::Debug + Send + Sync + 'static {
    const ENCODED_LEN: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        NativeEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        NativeEndian::read_i64(buf)
    }
}

impl IndexKey for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        NativeEndian::read_u32(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        NativeEndian::read_u64(buf)
    }
}

//! Persisted and runtime configuration for an opened tree.

/// Options used when creating or opening a tree file.
///
/// `page_size`, `order`, `key_size` and `value_size` are persisted in the
/// metadata page on creation; reopening a file with mismatched values fails
/// with [`crate::errors::EngineError::InvalidArgument`]. `cache_size` and
/// `checkpoint_threshold` are runtime-only knobs and may differ across opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Size in bytes of every page in the main file.
    pub page_size: u32,
    /// Branching factor: maximum children of an internal node.
    pub order: u16,
    /// Fixed width, in bytes, of every key.
    pub key_size: u16,
    /// Maximum inline value size, in bytes, before overflow chaining kicks in.
    pub value_size: u16,
    /// Maximum number of decoded nodes kept resident in the page cache.
    pub cache_size: usize,
    /// Number of committed-but-unchecked pages after which an automatic
    /// checkpoint is triggered. `0` disables automatic checkpointing.
    pub checkpoint_threshold: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: 4096,
            order: 100,
            key_size: 8,
            value_size: 256,
            cache_size: 512,
            checkpoint_threshold: 4096,
        }
    }
}

impl Options {
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: u16) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_key_size(mut self, key_size: u16) -> Self {
        self.key_size = key_size;
        self
    }

    #[must_use]
    pub fn with_value_size(mut self, value_size: u16) -> Self {
        self.value_size = value_size;
        self
    }

    #[must_use]
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }
}

/// Converts a typed key into the fixed-width, lexicographically-ordered byte
/// encoding the tree compares on.
///
/// Implementations must guarantee `serialize(a) < serialize(b)` (as byte
/// slices) whenever `a < b`. The built-in unsigned integer serializers do
/// this by encoding in big-endian order, which matches numeric order
/// byte-for-byte; the signed `i64` serializer additionally flips the sign
/// bit, since plain big-endian bytes do not preserve order for two's
/// complement values.
pub trait Serializer<K> {
    /// Width in bytes of the produced key. Must be constant for a given
    /// serializer instance and equal to the tree's configured `key_size`.
    fn key_size(&self) -> u16;
    fn serialize(&self, key: &K) -> Vec<u8>;
    fn deserialize(&self, bytes: &[u8]) -> K;
}

macro_rules! impl_uint_serializer {
    ($name:ident, $ty:ty) => {
        /// Fixed-width big-endian serializer preserving numeric order: for
        /// an unsigned type, big-endian byte order already matches numeric
        /// order byte-for-byte.
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Serializer<$ty> for $name {
            fn key_size(&self) -> u16 {
                std::mem::size_of::<$ty>() as u16
            }

            fn serialize(&self, key: &$ty) -> Vec<u8> {
                key.to_be_bytes().to_vec()
            }

            fn deserialize(&self, bytes: &[u8]) -> $ty {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                <$ty>::from_be_bytes(buf)
            }
        }
    };
}

impl_uint_serializer!(U32Serializer, u32);
impl_uint_serializer!(U64Serializer, u64);

/// Fixed-width big-endian serializer for `i64` preserving numeric order.
///
/// Plain big-endian bytes do *not* preserve order for a signed type: two's
/// complement puts negative values' bit patterns above non-negative ones, so
/// e.g. `(-5i64).to_be_bytes() > 0i64.to_be_bytes()` as byte strings even
/// though `-5 < 0`. Flipping the sign bit before encoding (and again after
/// decoding) remaps the signed range onto an unsigned one with the same
/// order, so big-endian byte order matches numeric order again.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Serializer;

impl Serializer<i64> for I64Serializer {
    fn key_size(&self) -> u16 {
        std::mem::size_of::<i64>() as u16
    }

    fn serialize(&self, key: &i64) -> Vec<u8> {
        (key ^ i64::MIN).to_be_bytes().to_vec()
    }

    fn deserialize(&self, bytes: &[u8]) -> i64 {
        let mut buf = [0u8; std::mem::size_of::<i64>()];
        buf.copy_from_slice(&bytes[..std::mem::size_of::<i64>()]);
        i64::from_be_bytes(buf) ^ i64::MIN
    }
}

/// Fixed-width byte-string serializer: keys shorter than `width` are
/// zero-padded on the right, which preserves lexicographic order only when
/// no valid key is itself a proper prefix of another.
#[derive(Debug, Clone, Copy)]
pub struct FixedBytesSerializer {
    pub width: u16,
}

impl Serializer<Vec<u8>> for FixedBytesSerializer {
    fn key_size(&self) -> u16 {
        self.width
    }

    fn serialize(&self, key: &Vec<u8>) -> Vec<u8> {
        let mut buf = vec![0u8; self.width as usize];
        let n = key.len().min(self.width as usize);
        buf[..n].copy_from_slice(&key[..n]);
        buf
    }

    fn deserialize(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

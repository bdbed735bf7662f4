use core::fmt;

/// An index key: totally ordered with a fixed-width on-page encoding.
pub trait TreeKey: Copy + Ord + fmt::Debug + Send + Sync + 'static {
    const ENCODED_SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! int_tree_key {
    ($($t:ty),*) => {
        $(impl TreeKey for $t {
            const ENCODED_SIZE: usize = std::mem::size_of::<$t>();

            fn encode(&self, buf: &mut [u8]) {
                buf[..Self::ENCODED_SIZE].copy_from_slice(&self.to_be_bytes());
            }

            fn decode(buf: &[u8]) -> Self {
                let mut raw = [0u8; Self::ENCODED_SIZE];
                raw.copy_from_slice(&buf[..Self::ENCODED_SIZE]);
                <$t>::from_be_bytes(raw)
            }
        })*
    };
}

int_tree_key!(i32, i64, u32, u64);

//! Fallible little-endian reads on top of `bytes::Buf`, which only panics on underflow.

macro_rules! get_try_impl {
    ($try_getter: ident, $ty:ty, $getter: ident) => {
        fn $try_getter(&mut self) -> anyhow::Result<$ty> {
            if self.remaining() < size_of::<$ty>() {
                return Err(anyhow::anyhow!("buffer underflow"));
            }
            Ok(self.$getter())
        }
    }
}

pub trait BufExt: bytes::Buf {
    get_try_impl!(try_get_u32_le, u32, get_u32_le);
}

impl<T: bytes::Buf> BufExt for T {}

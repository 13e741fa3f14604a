//! Completion queue entry (16 bytes, `struct io_uring_cqe`).

use super::{field, shape_view, RawField};
use crate::error::NativeError;
use crate::raw;

pub mod layout {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const USER_DATA: RawField = RawField::new(0, 8);
    pub const RES: RawField = RawField::new(8, 4);
    pub const FLAGS: RawField = RawField::new(12, 4);
}

shape_view!(
    /// View over one `io_uring_cqe`.
    CompletionEntry,
    layout::SIZE
);

impl CompletionEntry {
    field!(user_data, set_user_data, layout::USER_DATA, u64, raw::get_u64, raw::put_u64);
    field!(res, set_res, layout::RES, i32, raw::get_i32, raw::put_i32);
    field!(flags, set_flags, layout::FLAGS, u32, raw::get_u32, raw::put_u32);

    /// Fill all three fields.
    pub fn set(&self, user_data: u64, res: i32, flags: u32) {
        self.set_user_data(user_data);
        self.set_res(res);
        self.set_flags(flags);
    }

    /// Decode `res`: negative is an errno, anything else a count.
    pub fn outcome(&self) -> Result<u32, NativeError> {
        let res = self.res();
        match NativeError::from_result(res) {
            Some(e) => Err(e),
            None => Ok(res as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn test_outcome_decoding() {
        let mut backing = [0u8; 32];
        let mut cqe = unsafe { CompletionEntry::at(backing.as_mut_ptr() as usize) };
        cqe.set(42, -libc::ETIME, 0);
        assert_eq!(cqe.outcome(), Err(NativeError::new(libc::ETIME)));

        unsafe { cqe.reposition(backing.as_mut_ptr() as usize + 16) };
        cqe.set(43, 128, 2);
        assert_eq!(cqe.outcome(), Ok(128));
        assert_eq!(cqe.user_data(), 43);
        assert_eq!(cqe.flags(), 2);
        assert_eq!(backing[16], 43);
    }
}

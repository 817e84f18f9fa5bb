//! Temp storage management.
//!
//! Every transfer stages the downloaded file in its own [`TempSlot`]. The
//! slot is released explicitly on the success path and by its `Drop` impl on
//! every other path.

mod temp;

pub use temp::{TempSlot, TempStorage};

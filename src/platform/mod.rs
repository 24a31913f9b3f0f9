/*!
 * Platform Module
 * OS abstraction seams and their POSIX implementations
 */

pub mod posix;
pub mod traits;

pub use posix::{PosixFs, PosixMask};
pub use traits::{FsOps, MaskBackend};

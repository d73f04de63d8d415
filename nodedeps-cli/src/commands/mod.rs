pub mod portable;
pub mod rebuild;
pub mod sync;

pub mod check;
pub mod summary;
pub mod sweep;

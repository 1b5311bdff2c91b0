pub mod interner;
pub mod strerror;

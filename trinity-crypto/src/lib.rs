pub mod address;
pub mod commitment;
pub mod hash;
pub mod keys;
pub mod merkle;

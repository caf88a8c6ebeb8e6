mod assignment;
mod entity;
mod sample;
mod tag;

pub use assignment::*;
pub use entity::*;
pub use sample::*;
pub use tag::*;

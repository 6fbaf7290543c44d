pub mod diagnosis;
pub mod entity;
pub mod records;
pub mod source;

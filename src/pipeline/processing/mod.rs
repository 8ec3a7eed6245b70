// Pipeline processing: page parsing, classification, extraction and cataloguing

pub mod catalog;
pub mod classify;
pub mod datetime;
pub mod extract;
pub mod follow;
pub mod page;
pub mod parent;
pub mod probe;

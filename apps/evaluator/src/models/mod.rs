pub mod document;
pub mod evaluation;

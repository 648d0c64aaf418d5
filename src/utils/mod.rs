pub mod json_recovery;
pub mod sanitize;
pub mod similarity;

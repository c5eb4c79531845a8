pub mod site;

pub use site::{LANGCODE, TestSite, text_items, tree};

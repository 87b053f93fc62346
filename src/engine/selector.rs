//! Category Selection
//!
//! Routes query text to the index it should be searched against.

use crate::index::Category;

/// Picks the category searched for a piece of query text
pub trait CategorySelector: Send + Sync {
    fn select(&self, query_text: &str) -> Category;
}

/// Code-like queries (containing a run of digits, as in "COMP SCI 354")
/// go to the code index; everything else goes to the title index.
#[derive(Debug, Clone, Copy)]
pub struct DigitRunSelector {
    run_len: usize,
}

impl Default for DigitRunSelector {
    fn default() -> Self {
        Self { run_len: 3 }
    }
}

impl DigitRunSelector {
    pub fn new(run_len: usize) -> Self {
        Self {
            run_len: run_len.max(1),
        }
    }
}

impl CategorySelector for DigitRunSelector {
    fn select(&self, query_text: &str) -> Category {
        if has_digit_run(query_text, self.run_len) {
            Category::Code
        } else {
            Category::Title
        }
    }
}

/// Whether `text` holds at least `len` consecutive ASCII digits
fn has_digit_run(text: &str, len: usize) -> bool {
    let mut run = 0;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= len {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Route query text with the default three-digit rule
pub fn select_category(query_text: &str) -> Category {
    DigitRunSelector::default().select(query_text)
}

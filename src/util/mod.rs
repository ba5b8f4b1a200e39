//! Text helpers shared by reconciliation and the CLI.
//!
//! - **Sanitizing**: strip terminal control sequences from remote names
//! - **Reading time**: HTML-aware word counts and minute estimates
//!
//! # Examples
//!
//! ```
//! use feedsync::util::{estimate_read_time, sanitize_name};
//!
//! assert_eq!(sanitize_name("  Tech\x07 ", "fallback"), "Tech");
//! assert_eq!(estimate_read_time("<p>two words</p>", 2), 1.0);
//! ```

mod text;

pub use text::{
    estimate_read_time, sanitize_name, strip_control_chars, word_count, DEFAULT_WORDS_PER_MINUTE,
};

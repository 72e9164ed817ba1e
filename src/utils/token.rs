//! Token counting traits and utilities

pub mod tiktoken;

/// Trait for counting tokens in a string.
pub trait CountToken {
    fn count_token(&self, string: &str) -> usize;
}

/// Blanket impl of CountToken for Fn(&str) -> usize.
impl<F> CountToken for F where F: Fn(&str) -> usize {
    fn count_token(&self, string: &str) -> usize {
        self(string)
    }
}

/// Count the number of tokens in a string by the length of the string.
#[inline]
pub fn count_tokens_by_len(string: &str) -> usize {
    string.len()
}

/// Count the tokens of several strings, e.g. the messages of a rendered prompt.
pub fn count_all<'a>(counter: &impl CountToken, strings: impl IntoIterator<Item=&'a str>) -> usize {
    strings.into_iter().map(|s| counter.count_token(s)).sum()
}

#[cfg(test)]
mod test_token {
    use super::{count_all, count_tokens_by_len, CountToken};

    #[test]
    fn test_str_len_impl() {
        let counter = str::len;
        let size = counter.count_token("");
        assert_eq!(0, size);
    }

    #[test]
    fn test_count_all() {
        assert_eq!(8, count_all(&count_tokens_by_len, ["abc", "de", "fgh"]));
    }
}

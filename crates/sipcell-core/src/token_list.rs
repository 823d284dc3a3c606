use std::fmt;

use smol_str::SmolStr;

/// Comma-separated token header values (Allow/Supported/Require/etc.).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenList(pub Vec<SmolStr>);

impl TokenList {
    /// Parses a comma-separated token list, skipping empty segments.
    pub fn parse(input: &str) -> Self {
        Self(
            input
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(SmolStr::new)
                .collect(),
        )
    }

    pub fn tokens(&self) -> &[SmolStr] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Token lookup, case-insensitive per RFC 3261 option-tag rules.
    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Appends a token if not already present.
    pub fn add(&mut self, token: &str) {
        if !self.contains(token) {
            self.0.push(SmolStr::new(token));
        }
    }
}

impl fmt::Display for TokenList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            f.write_str(token)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_serializes() {
        let list = TokenList::parse("100rel, timer,gruu");
        assert_eq!(list.tokens().len(), 3);
        assert!(list.contains("GRUU"));
        assert_eq!(list.to_string(), "100rel, timer, gruu");
    }

    #[test]
    fn add_deduplicates() {
        let mut list = TokenList::parse("path");
        list.add("Path");
        assert_eq!(list.tokens().len(), 1);
    }
}

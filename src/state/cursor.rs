use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Resume position within a traversal: page number and 1-based item offset
///
/// The offset only applies to the first page visited; advancing clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    page: u32,
    offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid start position '{0}', expected N or N.M with N >= 1")]
pub struct CursorParseError(String);

impl PaginationCursor {
    /// Creates a cursor; page 0 is clamped to 1
    pub fn new(page: u32, offset: u32) -> Self {
        Self {
            page: page.max(1),
            offset,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// True if the item at 1-based position `index` should be skipped
    pub fn skips(&self, index: u32) -> bool {
        self.offset > 0 && index < self.offset
    }

    /// The next page, with the offset reset
    pub fn advance(self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            offset: 0,
        }
    }
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl FromStr for PaginationCursor {
    type Err = CursorParseError;

    /// Parses `N` or `N.M`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CursorParseError(s.to_string());
        let (page, offset) = match s.trim().split_once('.') {
            Some((p, o)) => (p, Some(o)),
            None => (s.trim(), None),
        };

        let page: u32 = page.parse().map_err(|_| err())?;
        if page == 0 {
            return Err(err());
        }
        let offset: u32 = match offset {
            Some(o) => o.parse().map_err(|_| err())?,
            None => 0,
        };

        Ok(Self { page, offset })
    }
}

impl fmt::Display for PaginationCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset > 0 {
            write!(f, "{}.{}", self.page, self.offset)
        } else {
            write!(f, "{}", self.page)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_only() {
        let c: PaginationCursor = "12".parse().unwrap();
        assert_eq!((c.page(), c.offset()), (12, 0));
    }

    #[test]
    fn test_parse_page_and_offset() {
        let c: PaginationCursor = "12.9".parse().unwrap();
        assert_eq!((c.page(), c.offset()), (12, 9));
        assert_eq!(c.to_string(), "12.9");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("0".parse::<PaginationCursor>().is_err());
        assert!("x".parse::<PaginationCursor>().is_err());
        assert!("2.x".parse::<PaginationCursor>().is_err());
    }

    #[test]
    fn test_skips_before_offset_only() {
        let c = PaginationCursor::new(1, 3);
        assert!(c.skips(1));
        assert!(c.skips(2));
        assert!(!c.skips(3));
        assert!(!PaginationCursor::new(1, 0).skips(1));
    }

    #[test]
    fn test_advance_resets_offset() {
        let c = PaginationCursor::new(4, 7).advance();
        assert_eq!((c.page(), c.offset()), (5, 0));
    }

    #[test]
    fn test_page_zero_clamped() {
        assert_eq!(PaginationCursor::new(0, 0).page(), 1);
    }
}

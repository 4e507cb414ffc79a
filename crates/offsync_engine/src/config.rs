//! Configuration for pull operations.

/// Default number of records requested per pull page.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Settings that shape a pull.
#[derive(Debug, Clone)]
pub struct PullSettings {
    /// Records requested per page. The pull ends when the server returns
    /// fewer than this many records.
    pub page_size: u64,
}

impl PullSettings {
    /// Creates settings with the default page size.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }
}

impl Default for PullSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(PullSettings::default().page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(PullSettings::new().with_page_size(10).page_size, 10);
    }
}

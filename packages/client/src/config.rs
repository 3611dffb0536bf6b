//! Client configuration

use crate::error::{Error, Kind};

/// Tunables for a [`Client`](crate::Client).
///
/// The defaults match common download workloads: ten sockets in flight and
/// three redirect hops before a chain is declared a loop.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum number of requests past the queue at any instant.
    pub concurrency: usize,
    /// Maximum length of a `redirected_from` chain before the tail fails.
    pub max_redirects: usize,
    /// Fail a request after this many consecutive ticks without byte
    /// progress. `None` disables the guard.
    pub max_idle_ticks: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_redirects: 3,
            max_idle_ticks: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    #[must_use]
    pub fn max_idle_ticks(mut self, ticks: Option<u32>) -> Self {
        self.max_idle_ticks = ticks;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a builder error when `concurrency` is zero, since the loop
    /// could never admit a request.
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrency == 0 {
            return Err(Error::new(Kind::Builder).with("concurrency must be at least 1"));
        }
        Ok(())
    }
}

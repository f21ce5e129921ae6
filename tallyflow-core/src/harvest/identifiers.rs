use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use tracing::debug;

use crate::{error::Result, retry::RetryPolicy, retry::execute};

pub const DEFAULT_HARVEST_RETRIES: u32 = 3;
pub const DEFAULT_HARVEST_SLEEP_MS: u64 = 5_000;

/// One page of a paged identifier listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierPage {
    pub identifiers: Vec<String>,
    /// Absent or empty on the last page.
    pub resumption_token: Option<String>,
}

/// Remote endpoint listing the identifiers of a harvest.
///
/// Transient endpoint failures are reported as
/// [`crate::error::TallyError::Harvest`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    async fn list_identifiers(
        &self,
        resumption_token: Option<String>,
    ) -> Result<IdentifierPage>;
}

/// Forward-only sequence of identifiers over every page of a source.
///
/// Pages are fetched lazily. The sequence cannot be restarted; a fetch that
/// keeps failing after the retries ends it with the error.
pub struct IdentifierHarvest<'a> {
    source: &'a dyn IdentifierSource,
    retry: RetryPolicy,
    excluded: HashSet<String>,
    buffer: VecDeque<String>,
    token: Option<String>,
    exhausted: bool,
}

impl std::fmt::Debug for IdentifierHarvest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierHarvest")
            .field("retry", &self.retry)
            .field("excluded", &self.excluded.len())
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl<'a> IdentifierHarvest<'a> {
    pub fn new(source: &'a dyn IdentifierSource, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            excluded: HashSet::new(),
            buffer: VecDeque::new(),
            token: None,
            exhausted: false,
        }
    }

    /// Identifiers that are silently left out of the sequence.
    pub fn excluding(
        mut self,
        excluded: impl IntoIterator<Item = String>,
    ) -> Self {
        self.excluded.extend(excluded);
        self
    }

    /// Fetches pages until an identifier is available or the listing ends.
    pub async fn has_next(&mut self) -> Result<bool> {
        while self.buffer.is_empty() {
            if self.exhausted {
                return Ok(false);
            }

            let source = self.source;
            let token = self.token.clone();
            let page = execute(
                "list identifiers",
                self.retry.retries,
                self.retry.sleep(),
                || source.list_identifiers(token.clone()),
            )
            .await?;

            self.token = page.resumption_token.filter(|token| !token.is_empty());
            self.exhausted = self.token.is_none();
            debug!(
                fetched = page.identifiers.len(),
                last_page = self.exhausted,
                "fetched identifier page"
            );
            self.buffer.extend(
                page.identifiers
                    .into_iter()
                    .filter(|identifier| !self.excluded.contains(identifier)),
            );
        }
        Ok(true)
    }

    pub async fn next(&mut self) -> Result<Option<String>> {
        if self.has_next().await? {
            Ok(self.buffer.pop_front())
        } else {
            Ok(None)
        }
    }
}

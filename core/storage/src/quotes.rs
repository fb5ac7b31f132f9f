use rusqlite::params;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::scope::{ConnectionScope, Database};

/// Parse whitespace-separated page numbers.
pub fn parse_pages(text: &str) -> Result<Vec<i64>> {
    text.split_whitespace()
        .map(|token| {
            token.parse::<i64>().map_err(|_| StoreError::InvalidPage {
                token: token.to_string(),
            })
        })
        .collect()
}

/// Sort page numbers numerically and render them space-joined.
///
/// Duplicates are kept.
pub fn sort_page_list(text: &str) -> Result<String> {
    let mut pages = parse_pages(text)?;
    pages.sort_unstable();
    Ok(pages
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(" "))
}

/// Operations on the `rick_quotes` ledger inside a caller-owned transaction.
pub struct QuoteTable<'a> {
    scope: &'a ConnectionScope<'a>,
}

impl<'a> QuoteTable<'a> {
    pub fn new(scope: &'a ConnectionScope<'a>) -> Self {
        Self { scope }
    }

    pub fn ensure_table(&self) -> Result<()> {
        self.scope
            .execute("CREATE TABLE IF NOT EXISTS rick_quotes (pages TEXT)", [])?;
        Ok(())
    }

    /// Merge `pages` into the ledger and return what is now stored.
    pub fn record_pages(&self, pages: &str) -> Result<String> {
        let seen: Option<Option<String>> = self
            .scope
            .query_optional("SELECT pages FROM rick_quotes LIMIT 1", [], |row| row.get(0))?;

        let stored = match seen {
            None => {
                let sorted = sort_page_list(pages)?;
                self.scope.execute(
                    "INSERT INTO rick_quotes (pages) VALUES (?1)",
                    params![sorted],
                )?;
                sorted
            }
            Some(existing) => {
                let merged = match existing {
                    Some(existing) => format!("{} {}", existing, pages),
                    None => pages.to_string(),
                };
                let sorted = sort_page_list(&merged)?;
                self.scope
                    .execute("UPDATE rick_quotes SET pages = ?1", params![sorted])?;
                sorted
            }
        };

        debug!("Quote ledger now holds: {}", stored);
        Ok(stored)
    }

    /// Stored page list, or `None` when nothing has been recorded yet.
    pub fn get_pages(&self) -> Result<Option<String>> {
        let pages: Option<String> = self
            .scope
            .query_optional("SELECT pages FROM rick_quotes LIMIT 1", [], |row| row.get(0))?
            .flatten();

        if pages.is_none() {
            warn!("Quote ledger is empty");
        }
        Ok(pages)
    }

    /// Pages already used, ascending.
    pub fn used_pages(&self) -> Result<Vec<i64>> {
        match self.get_pages()? {
            Some(pages) => parse_pages(&pages),
            None => Ok(Vec::new()),
        }
    }
}

/// Quote ledger that runs every call in its own transaction.
#[derive(Debug, Clone)]
pub struct QuoteLedger {
    db: Database,
}

impl QuoteLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn ensure_table(&self) -> Result<()> {
        self.db.scoped(|scope| scope.quotes().ensure_table())
    }

    pub fn record_pages(&self, pages: &str) -> Result<String> {
        self.db.scoped(|scope| scope.quotes().record_pages(pages))
    }

    pub fn get_pages(&self) -> Result<Option<String>> {
        self.db.scoped(|scope| scope.quotes().get_pages())
    }

    pub fn used_pages(&self) -> Result<Vec<i64>> {
        self.db.scoped(|scope| scope.quotes().used_pages())
    }
}

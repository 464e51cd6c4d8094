//! Built-in provider adapters.

mod arxiv;
mod pmc;
mod template;
mod unpaywall;

pub use arxiv::{ARXIV_BASE_URL, ArxivAdapter};
pub use pmc::{EUROPE_PMC_BASE_URL, EuropePmcAdapter};
pub use template::{PLACEHOLDERS, TemplateAdapter, has_placeholder};
pub use unpaywall::{UNPAYWALL_BASE_URL, UnpaywallAdapter};

//! Shared fixtures for integration tests: mock provider endpoints and configs.

#![allow(dead_code)]

pub mod socket_guard;

use std::path::Path;

use fulltext_core::{FullTextConfig, ProviderConfig, SourceFormat};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Minimal JATS article with two body sections, a table and a reference.
pub const JATS_ARTICLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<article>
  <front>
    <journal-meta><journal-title-group><journal-title>Journal of Tests</journal-title></journal-title-group></journal-meta>
    <article-meta>
      <title-group><article-title>Mock full text</article-title></title-group>
      <abstract><p>An abstract that says what the paper is about.</p></abstract>
    </article-meta>
  </front>
  <body>
    <sec><title>Introduction</title><p>Cells divide. This sentence pads the body text so that it is long enough to count as real full text for quality scoring purposes in the cache.</p></sec>
    <sec><title>Methods</title><p>We counted them with a microscope and wrote everything down carefully, twice, in two separate notebooks kept in two separate rooms.</p>
      <table-wrap><label>Table 1</label><caption><p>Counts</p></caption>
        <table><thead><tr><th>Sample</th><th>Count</th></tr></thead><tbody><tr><td>A</td><td>3</td></tr></tbody></table>
      </table-wrap>
    </sec>
  </body>
  <back><ref-list><ref><mixed-citation>Doe J. Counting cells. 2020.</mixed-citation></ref></ref-list></back>
</article>"#;

/// A body that sniffs as PDF; the PDF converter cannot extract it but the
/// waterfall accepts it.
pub const FAKE_PDF: &[u8] = b"%PDF-1.4\n% not really a pdf\n";

/// Config with every built-in provider pointed at `server` and no rate limiting.
pub fn mock_config(root: &Path, server: &MockServer) -> FullTextConfig {
    let mut config = FullTextConfig::with_cache_root(root);
    config.europepmc_base_url = format!("{}/europepmc", server.uri());
    config.arxiv_base_url = format!("{}/arxiv", server.uri());
    config.unpaywall_base_url = format!("{}/unpaywall", server.uri());
    config.rate_limit_ms = 0;
    config.max_attempts = 1;
    config
}

/// Adds a URL-template provider served by `server`.
pub fn with_template(
    mut config: FullTextConfig,
    server: &MockServer,
    name: &str,
    tier: u8,
    format: SourceFormat,
    route: &str,
) -> FullTextConfig {
    config.providers.push(ProviderConfig {
        name: name.to_string(),
        tier,
        format,
        url_template: format!("{}{route}", server.uri()),
        max_concurrency: None,
    });
    config
}

/// Serves `body` for `GET <path>`.
pub async fn serve(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Serves the JATS article for a PMCID through the Europe PMC full-text route.
pub async fn serve_pmc_article(server: &MockServer, pmcid: &str) {
    serve(
        server,
        &format!("/europepmc/{pmcid}/fullTextXML"),
        JATS_ARTICLE.as_bytes(),
    )
    .await;
}

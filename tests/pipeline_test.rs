//! End-to-end pipeline tests against mocked providers.
//!
//! Every external service is a wiremock endpoint; nothing here touches the
//! network. Providers that are not mocked are disabled in the test config
//! so a regression cannot silently reach a real API.

use geo_corpus::orchestrator::{EnrichmentOptions, SearchFilters, SearchRequest};
use geo_corpus::{Config, Orchestrator};
use serde_json::json;
use std::path::Path;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pdf_body() -> Vec<u8> {
    let mut bytes = b"%PDF-1.5\n".to_vec();
    bytes.resize(11 * 1024, b'x');
    bytes
}

/// Hermetic config: E-utilities and Unpaywall point at the mock server,
/// everything else is off.
fn test_config(server_uri: &str, data_root: &Path) -> Config {
    let mut config = Config::default();

    config.identity.contact_email = Some("tester@example.org".to_string());
    config.providers.geo.base_url = Some(format!("{server_uri}/eutils"));
    config.providers.pubmed.base_url = Some(format!("{server_uri}/eutils"));
    config.providers.unpaywall.base_url = Some(format!("{server_uri}/unpaywall"));

    config.providers.pmc.enable = Some(false);
    config.providers.openalex.enable = Some(false);
    config.providers.crossref.enable = Some(false);
    config.providers.europe_pmc.enable = Some(false);
    config.providers.biorxiv.enable = Some(false);
    config.providers.arxiv.enable = Some(false);

    config.paths.data_root = data_root.to_path_buf();
    config.paths.index_db_path = data_root.join("index.db");

    config.deadlines.per_url_timeout_ms = 2_000;
    config.deadlines.per_publication_budget_ms = 10_000;
    config
}

/// Mount the GEO + PubMed + Unpaywall happy-path fixtures.
async fn mount_happy_path(server: &MockServer) {
    // GEO series search.
    Mock::given(method("GET"))
        .and(path("/eutils/esearch.fcgi"))
        .and(query_param("db", "gds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "esearchresult": {"idlist": ["200189158"]}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/eutils/esummary.fcgi"))
        .and(query_param("db", "gds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "uids": ["200189158"],
                "200189158": {
                    "accession": "GSE189158",
                    "title": "Breast cancer RNA-seq across treatment arms",
                    "summary": "RNA-seq profiling of breast cancer biopsies",
                    "taxon": "Homo sapiens",
                    "gpl": "24676",
                    "n_samples": 42,
                    "pdat": "2022/01/05",
                    "pubmedids": [35042862]
                }
            }
        })))
        .mount(server)
        .await;

    // Citing-paper discovery via the accession-mention search.
    Mock::given(method("GET"))
        .and(path("/eutils/esearch.fcgi"))
        .and(query_param("db", "pubmed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "esearchresult": {"idlist": ["40000001"]}
        })))
        .mount(server)
        .await;

    // Original publication metadata.
    Mock::given(method("GET"))
        .and(path("/eutils/esummary.fcgi"))
        .and(query_param("db", "pubmed"))
        .and(query_param("id", "35042862"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "35042862": {
                    "uid": "35042862",
                    "title": "Original profiling study.",
                    "pubdate": "2022 Jan 15",
                    "fulljournalname": "Nature Communications",
                    "authors": [{"name": "Garcia L"}],
                    "articleids": [
                        {"idtype": "doi", "value": "10.1038/orig1"}
                    ]
                }
            }
        })))
        .mount(server)
        .await;

    // Citing publication metadata.
    Mock::given(method("GET"))
        .and(path("/eutils/esummary.fcgi"))
        .and(query_param("db", "pubmed"))
        .and(query_param("id", "40000001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "40000001": {
                    "uid": "40000001",
                    "title": "Reanalysis of GSE189158.",
                    "pubdate": "2023 Mar 2",
                    "fulljournalname": "Genome Biology",
                    "authors": [{"name": "Chen W"}],
                    "articleids": [
                        {"idtype": "doi", "value": "10.5555/citing1"}
                    ]
                }
            }
        })))
        .mount(server)
        .await;

    // Unpaywall knows both DOIs and points at the mock PDF.
    Mock::given(method("GET"))
        .and(path_regex(r"^/unpaywall/10\."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_oa": true,
            "best_oa_location": {
                "url": format!("{}/landing", server.uri()),
                "url_for_pdf": format!("{}/files/paper.pdf", server.uri()),
                "host_type": "repository"
            },
            "oa_locations": []
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/paper.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
        .mount(server)
        .await;
}

fn count_pdfs(dir: &Path) -> usize {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "pdf") {
                count += 1;
            }
        }
    }
    count
}

#[tokio::test]
async fn happy_path_search_downloads_citing_pdfs() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    let data_dir = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(test_config(&server.uri(), data_dir.path()))
        .await
        .unwrap();

    let response = orchestrator
        .search(SearchRequest {
            query: "breast cancer RNA-seq".to_string(),
            filters: SearchFilters::default(),
            max_results: 1,
            enrichment: EnrichmentOptions {
                include_citing_papers: Some(true),
                download_pdfs: Some(true),
                include_full_content: Some(false),
            },
        })
        .await
        .unwrap();

    assert_eq!(response.datasets.len(), 1);
    assert!(!response.partial);

    let view = &response.datasets[0];
    assert_eq!(view.dataset.geo_id, "GSE189158");
    assert!(view.relevance > 0.0);
    assert!(view.enrichment_status.completed);
    // Original + at least one citing paper.
    assert!(view.enrichment_status.papers_discovered >= 2);
    assert!(view.enrichment_status.pdfs_downloaded >= 1);
    // Strategy A could not run (OpenAlex disabled) and says so.
    assert!(view
        .enrichment_status
        .untried
        .contains_key("pmid_citation"));

    // The citing paper's PDF landed in the citing directory and is a PDF.
    let citing_dir = data_dir.path().join("pdfs").join("GSE189158").join("citing");
    let citing_pdf = citing_dir.join("PMID_40000001.pdf");
    assert!(citing_pdf.exists(), "missing {}", citing_pdf.display());
    let bytes = std::fs::read(&citing_pdf).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert!(bytes.len() >= 10 * 1024);
}

#[tokio::test]
async fn repeating_a_search_is_idempotent_on_disk() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    let data_dir = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(test_config(&server.uri(), data_dir.path()))
        .await
        .unwrap();

    let request = SearchRequest {
        query: "breast cancer RNA-seq".to_string(),
        filters: SearchFilters::default(),
        max_results: 1,
        enrichment: EnrichmentOptions {
            include_citing_papers: Some(true),
            download_pdfs: Some(true),
            include_full_content: Some(false),
        },
    };

    let first = orchestrator.search(request.clone()).await.unwrap();
    let pdfs_after_first = count_pdfs(data_dir.path());
    assert!(pdfs_after_first >= 1);

    let second = orchestrator.search(request).await.unwrap();
    let pdfs_after_second = count_pdfs(data_dir.path());

    // No duplicate files, no rewrites, identical dataset metadata.
    assert_eq!(pdfs_after_first, pdfs_after_second);
    assert_eq!(
        first.datasets[0].dataset.geo_id,
        second.datasets[0].dataset.geo_id
    );
    assert_eq!(
        first.datasets[0].enrichment_status.papers_discovered,
        second.datasets[0].enrichment_status.papers_discovered
    );
}

#[tokio::test]
async fn deadline_yields_partial_response_without_temp_files() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    let data_dir = tempfile::tempdir().unwrap();

    let mut config = test_config(&server.uri(), data_dir.path());
    config.deadlines.request_deadline_ms = 1;

    let orchestrator = Orchestrator::new(config).await.unwrap();
    let response = orchestrator
        .search(SearchRequest {
            query: "breast cancer RNA-seq".to_string(),
            filters: SearchFilters::default(),
            max_results: 1,
            enrichment: EnrichmentOptions {
                include_citing_papers: Some(true),
                download_pdfs: Some(true),
                include_full_content: Some(false),
            },
        })
        .await
        .unwrap();

    assert!(response.partial);
    assert!(response
        .datasets
        .iter()
        .any(|view| !view.enrichment_status.completed));

    // No half-written temp files anywhere under the data root.
    let mut pending = vec![data_dir.path().to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                assert_ne!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("tmp"),
                    "stale temp file: {}",
                    path.display()
                );
            }
        }
    }
}

#[tokio::test]
async fn all_url_providers_disabled_still_completes() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    let data_dir = tempfile::tempdir().unwrap();

    let mut config = test_config(&server.uri(), data_dir.path());
    config.providers.unpaywall.enable = Some(false);

    let orchestrator = Orchestrator::new(config).await.unwrap();
    let response = orchestrator
        .search(SearchRequest {
            query: "breast cancer RNA-seq".to_string(),
            filters: SearchFilters::default(),
            max_results: 1,
            enrichment: EnrichmentOptions {
                include_citing_papers: Some(true),
                download_pdfs: Some(true),
                include_full_content: Some(false),
            },
        })
        .await
        .unwrap();

    let view = &response.datasets[0];
    assert!(view.enrichment_status.completed);
    assert!(view.enrichment_status.papers_discovered >= 2);
    assert_eq!(view.enrichment_status.pdfs_downloaded, 0);
    assert_eq!(view.enrichment_status.urls_found, 0);
    assert_eq!(count_pdfs(data_dir.path()), 0);
}

#[tokio::test]
async fn metadata_only_search_skips_enrichment() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    let data_dir = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(test_config(&server.uri(), data_dir.path()))
        .await
        .unwrap();

    let response = orchestrator
        .search(SearchRequest {
            query: "breast cancer RNA-seq".to_string(),
            filters: SearchFilters::default(),
            max_results: 1,
            enrichment: EnrichmentOptions {
                include_citing_papers: Some(false),
                download_pdfs: Some(false),
                include_full_content: Some(false),
            },
        })
        .await
        .unwrap();

    assert_eq!(response.datasets.len(), 1);
    assert!(response.datasets[0].publications.is_empty());
    assert!(response.datasets[0].enrichment_status.completed);
    assert_eq!(count_pdfs(data_dir.path()), 0);
}

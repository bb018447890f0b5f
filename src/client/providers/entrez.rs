//! NCBI E-utilities URL construction, shared by the GEO and PubMed clients.

use url::Url;

pub const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Identity parameters appended to every E-utilities request. NCBI grants
/// 10 req/s with an API key, 3 req/s without.
#[derive(Debug, Clone, Default)]
pub struct EntrezIdentity {
    pub email: Option<String>,
    pub api_key: Option<String>,
}

/// Builder for one E-utilities endpoint call.
#[derive(Debug)]
pub struct EntrezRequest {
    url: Url,
}

impl EntrezRequest {
    fn endpoint(base: &str, name: &str, db: &str, identity: &EntrezIdentity) -> Self {
        let mut url = Url::parse(&format!("{}/{name}.fcgi", base.trim_end_matches('/')))
            .unwrap_or_else(|_| {
                Url::parse(&format!("{EUTILS_BASE}/{name}.fcgi")).expect("static URL parses")
            });
        url.query_pairs_mut().append_pair("db", db);
        if let Some(email) = &identity.email {
            url.query_pairs_mut().append_pair("email", email);
        }
        if let Some(key) = &identity.api_key {
            url.query_pairs_mut().append_pair("api_key", key);
        }
        Self { url }
    }

    pub fn esearch(base: &str, db: &str, identity: &EntrezIdentity) -> Self {
        Self::endpoint(base, "esearch", db, identity)
    }

    pub fn esummary(base: &str, db: &str, identity: &EntrezIdentity) -> Self {
        Self::endpoint(base, "esummary", db, identity)
    }

    pub fn efetch(base: &str, db: &str, identity: &EntrezIdentity) -> Self {
        Self::endpoint(base, "efetch", db, identity)
    }

    #[must_use]
    pub fn term(mut self, term: &str) -> Self {
        self.url.query_pairs_mut().append_pair("term", term);
        self
    }

    #[must_use]
    pub fn ids(mut self, ids: &[String]) -> Self {
        self.url.query_pairs_mut().append_pair("id", &ids.join(","));
        self
    }

    #[must_use]
    pub fn retmax(mut self, retmax: u32) -> Self {
        self.url
            .query_pairs_mut()
            .append_pair("retmax", &retmax.to_string());
        self
    }

    #[must_use]
    pub fn retmode(mut self, retmode: &str) -> Self {
        self.url.query_pairs_mut().append_pair("retmode", retmode);
        self
    }

    #[must_use]
    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    #[must_use]
    pub fn build(self) -> String {
        self.url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esearch_url_carries_db_term_and_identity() {
        let identity = EntrezIdentity {
            email: Some("user@example.org".to_string()),
            api_key: Some("secret".to_string()),
        };
        let url = EntrezRequest::esearch(EUTILS_BASE, "gds", &identity)
            .term("breast cancer AND GSE[ETYP]")
            .retmax(20)
            .retmode("json")
            .build();

        assert!(url.starts_with("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi?"));
        assert!(url.contains("db=gds"));
        assert!(url.contains("email=user%40example.org"));
        assert!(url.contains("api_key=secret"));
        assert!(url.contains("retmax=20"));
        assert!(url.contains("term=breast+cancer+AND+GSE%5BETYP%5D"));
    }

    #[test]
    fn esummary_joins_ids_with_commas() {
        let url = EntrezRequest::esummary(EUTILS_BASE, "pubmed", &EntrezIdentity::default())
            .ids(&["1".to_string(), "2".to_string(), "3".to_string()])
            .retmode("json")
            .build();
        assert!(url.contains("esummary.fcgi"));
        assert!(url.contains("id=1%2C2%2C3"));
    }

    #[test]
    fn custom_base_url_is_respected() {
        let url = EntrezRequest::esearch("http://127.0.0.1:9999/eutils", "gds", &EntrezIdentity::default())
            .term("x")
            .build();
        assert!(url.starts_with("http://127.0.0.1:9999/eutils/esearch.fcgi"));
    }
}

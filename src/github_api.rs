use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::detector::{DirEntry, EntryKind, RepoInspector};
use crate::error::{MinerError, Result};
use crate::http_client::{ApiResponse, HttpRequest, RateLimitedClient};
use crate::models::RepositoryCandidate;
use crate::pagination::{PageRequest, SearchPage, SearchSource};

pub const GITHUB_API_URL: &str = "https://api.github.com";
pub const USER_AGENT: &str = "github-repo-mining/0.1";

const SEARCH_QUERY: &str = r#"
query($q: String!, $first: Int!, $after: String) {
  search(query: $q, type: REPOSITORY, first: $first, after: $after) {
    repositoryCount
    pageInfo { endCursor hasNextPage }
    nodes {
      ... on Repository {
        name
        owner { login }
        stargazerCount
        description
        url
        repositoryTopics(first: 20) { nodes { topic { name } } }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    repository_count: u64,
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<RepositoryNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: bool,
}

/// Non-repository nodes arrive as `{}`, hence every field is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    name: Option<String>,
    owner: Option<Owner>,
    stargazer_count: Option<u64>,
    description: Option<String>,
    url: Option<String>,
    repository_topics: Option<TopicConnection>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct TopicConnection {
    #[serde(default)]
    nodes: Vec<TopicNode>,
}

#[derive(Debug, Deserialize)]
struct TopicNode {
    topic: Topic,
}

#[derive(Debug, Deserialize)]
struct Topic {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RestSearchResponse {
    total_count: u64,
    #[serde(default)]
    items: Vec<RestRepository>,
}

#[derive(Debug, Deserialize)]
struct RestRepository {
    name: String,
    owner: Owner,
    #[serde(default)]
    stargazers_count: u64,
    description: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct TopicsResponse {
    #[serde(default)]
    names: Vec<String>,
}

/// `/contents/{path}` answers with an array for directories, an object for files.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Dir(Vec<ContentEntry>),
    File(FileContent),
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl FileContent {
    fn decode(&self) -> Result<Option<String>> {
        let Some(content) = &self.content else {
            return Ok(None);
        };
        match self.encoding.as_deref() {
            Some("base64") | None => {
                let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = STANDARD.decode(compact)?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            Some(_) => Ok(Some(content.clone())),
        }
    }
}

/// GitHub REST and GraphQL endpoints used by the miner.
#[derive(Clone)]
pub struct GitHubApi {
    client: RateLimitedClient,
    token: String,
    base_url: String,
}

impl GitHubApi {
    pub fn new(client: RateLimitedClient, token: impl Into<String>) -> Self {
        Self::with_base_url(client, token, GITHUB_API_URL)
    }

    pub fn with_base_url(client: RateLimitedClient, token: impl Into<String>, base_url: &str) -> Self {
        Self {
            client,
            token: token.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        request
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn url(&self, segments: &[&str], params: &[(&str, String)]) -> Result<String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| MinerError::InvalidUrl(e.to_string()))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| MinerError::InvalidUrl(self.base_url.clone()))?;
            path.pop_if_empty();
            for segment in segments {
                // Repository paths arrive as "a/b/c"; keep each part a separate segment.
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url.into())
    }

    async fn get(&self, url: String) -> Result<ApiResponse> {
        self.client.request(&self.authorize(HttpRequest::get(url))).await
    }

    async fn search_graphql(&self, query: &str, first: u32, after: Option<&str>) -> Result<SearchPage> {
        let body = json!({
            "query": SEARCH_QUERY,
            "variables": { "q": query, "first": first, "after": after },
        });
        let url = self.url(&["graphql"], &[])?;
        let request = self.authorize(HttpRequest::post(url, body.to_string()));

        let response = self
            .client
            .request(&request)
            .await?
            .found()
            .ok_or_else(|| MinerError::GraphQl("GraphQL endpoint not found".to_string()))?;
        let parsed: GraphQlResponse<SearchData> = response.json()?;

        if !parsed.errors.is_empty() {
            let messages: Vec<String> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(MinerError::GraphQl(messages.join("; ")));
        }
        let search = parsed
            .data
            .ok_or_else(|| MinerError::GraphQl("response carried no data".to_string()))?
            .search;

        let items: Vec<RepositoryCandidate> = search
            .nodes
            .into_iter()
            .flatten()
            .filter_map(|node| {
                let name = node.name?;
                let owner = node.owner?.login;
                let mut candidate = RepositoryCandidate::new(owner, name);
                candidate.stars = node.stargazer_count.unwrap_or_default();
                candidate.description = node.description;
                if let Some(url) = node.url {
                    candidate.url = url;
                }
                candidate.topics = node
                    .repository_topics
                    .map(|t| t.nodes.into_iter().map(|n| n.topic.name).collect())
                    .unwrap_or_default();
                Some(candidate)
            })
            .collect();

        debug!(
            "GraphQL page: {} items of {} for '{}'",
            items.len(),
            search.repository_count,
            query
        );

        Ok(SearchPage {
            items,
            total_count: Some(search.repository_count),
            next_cursor: search.page_info.end_cursor,
            has_next_page: search.page_info.has_next_page,
        })
    }

    async fn search_rest(&self, query: &str, page: u32, per_page: u32) -> Result<SearchPage> {
        let url = self.url(
            &["search", "repositories"],
            &[
                ("q", query.to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
            ],
        )?;

        // The search endpoint answers 422 past its result window.
        let response = match self.get(url).await {
            Ok(ApiResponse::Found(response)) => response,
            Ok(ApiResponse::NotFound) => return Ok(SearchPage::default()),
            Err(MinerError::Api { status: 422, .. }) => {
                debug!("Search window exhausted for '{}' at page {}", query, page);
                return Ok(SearchPage::default());
            }
            Err(e) => return Err(e),
        };
        let parsed: RestSearchResponse = response.json()?;

        let items = parsed
            .items
            .into_iter()
            .map(|repo| RepositoryCandidate {
                owner: repo.owner.login,
                name: repo.name,
                stars: repo.stargazers_count,
                description: repo.description,
                topics: repo.topics,
                url: repo.html_url,
            })
            .collect();

        Ok(SearchPage {
            items,
            total_count: Some(parsed.total_count),
            next_cursor: None,
            has_next_page: false,
        })
    }

    async fn contents(&self, owner: &str, name: &str, path: &str) -> Result<Option<ContentsResponse>> {
        let url = self.url(&["repos", owner, name, "contents", path], &[])?;
        match self.get(url).await? {
            ApiResponse::Found(response) => Ok(Some(response.json()?)),
            ApiResponse::NotFound => Ok(None),
        }
    }
}

#[async_trait]
impl SearchSource for GitHubApi {
    async fn search_page(&self, query: &str, request: &PageRequest) -> Result<SearchPage> {
        match request {
            PageRequest::Cursor { first, after } => {
                self.search_graphql(query, *first, after.as_deref()).await
            }
            PageRequest::Offset { page, per_page } => self.search_rest(query, *page, *per_page).await,
        }
    }
}

#[async_trait]
impl RepoInspector for GitHubApi {
    async fn languages(&self, owner: &str, name: &str) -> Result<Option<HashMap<String, u64>>> {
        let url = self.url(&["repos", owner, name, "languages"], &[])?;
        match self.get(url).await? {
            ApiResponse::Found(response) => Ok(Some(response.json()?)),
            ApiResponse::NotFound => Ok(None),
        }
    }

    async fn topics(&self, owner: &str, name: &str) -> Result<Vec<String>> {
        let url = self.url(&["repos", owner, name, "topics"], &[])?;
        match self.get(url).await? {
            ApiResponse::Found(response) => Ok(response.json::<TopicsResponse>()?.names),
            ApiResponse::NotFound => Ok(Vec::new()),
        }
    }

    async fn file_text(&self, owner: &str, name: &str, path: &str) -> Result<Option<String>> {
        match self.contents(owner, name, path).await? {
            Some(ContentsResponse::File(file)) => file.decode(),
            Some(ContentsResponse::Dir(_)) | None => Ok(None),
        }
    }

    async fn list_dir(&self, owner: &str, name: &str, path: &str) -> Result<Option<Vec<DirEntry>>> {
        match self.contents(owner, name, path).await? {
            Some(ContentsResponse::Dir(entries)) => Ok(Some(
                entries
                    .into_iter()
                    .map(|e| DirEntry {
                        kind: match e.kind.as_str() {
                            "file" => EntryKind::File,
                            "dir" => EntryKind::Dir,
                            _ => EntryKind::Other,
                        },
                        name: e.name,
                        path: e.path,
                    })
                    .collect(),
            )),
            Some(ContentsResponse::File(_)) | None => Ok(None),
        }
    }

    async fn readme(&self, owner: &str, name: &str) -> Result<Option<String>> {
        let url = self.url(&["repos", owner, name, "readme"], &[])?;
        match self.get(url).await? {
            ApiResponse::Found(response) => response.json::<FileContent>()?.decode(),
            ApiResponse::NotFound => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::testing::{client_with, ok, response, FakeClock, FakeTransport};
    use crate::http_client::{HttpMethod, RateLimitPolicy};
    use std::sync::Arc;

    fn api(responses: Vec<crate::http_client::HttpResponse>) -> (GitHubApi, Arc<FakeTransport>) {
        let clock = FakeClock::at(1_700_000_000);
        let transport = FakeTransport::new(clock.clone(), responses);
        let client = client_with(clock, transport.clone(), RateLimitPolicy::default());
        (GitHubApi::new(client, "secret"), transport)
    }

    #[tokio::test]
    async fn test_graphql_search_parses_nodes_and_page_info() {
        let body = r#"{
          "data": {
            "search": {
              "repositoryCount": 1234,
              "pageInfo": {"endCursor": "Y3Vyc29yOjUw", "hasNextPage": true},
              "nodes": [
                {
                  "name": "dashboard",
                  "owner": {"login": "acme"},
                  "stargazerCount": 42,
                  "description": "Metrics",
                  "url": "https://github.com/acme/dashboard",
                  "repositoryTopics": {"nodes": [{"topic": {"name": "react"}}]}
                },
                {}
              ]
            }
          }
        }"#;
        let (api, transport) = api(vec![ok(body)]);

        let page = api
            .search_page(
                "language:TypeScript topic:react",
                &PageRequest::Cursor {
                    first: 50,
                    after: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].full_name(), "acme/dashboard");
        assert_eq!(page.items[0].stars, 42);
        assert_eq!(page.items[0].topics, vec!["react"]);
        assert_eq!(page.next_cursor.as_deref(), Some("Y3Vyc29yOjUw"));
        assert!(page.has_next_page);
        assert_eq!(page.total_count, Some(1234));

        let sent = transport.sent.lock().unwrap();
        let request = &sent[0].0;
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, "https://api.github.com/graphql");
        assert!(request
            .headers
            .contains(&("Authorization".to_string(), "Bearer secret".to_string())));
        let body: serde_json::Value =
            serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["variables"]["first"], 50);
        assert_eq!(body["variables"]["q"], "language:TypeScript topic:react");
    }

    #[tokio::test]
    async fn test_graphql_errors_surface() {
        let (api, _) = api(vec![ok(r#"{"errors": [{"message": "Bad credentials"}]}"#)]);
        let err = api
            .search_page(
                "q",
                &PageRequest::Cursor {
                    first: 10,
                    after: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MinerError::GraphQl(m) if m == "Bad credentials"));
    }

    #[tokio::test]
    async fn test_rest_search_encodes_query() {
        let body = r#"{
          "total_count": 5000,
          "items": [{
            "name": "dashboard",
            "owner": {"login": "acme"},
            "stargazers_count": 7,
            "description": null,
            "topics": ["react", "jest"],
            "html_url": "https://github.com/acme/dashboard"
          }]
        }"#;
        let (api, transport) = api(vec![ok(body)]);

        let page = api
            .search_page(
                "language:TypeScript topic:react fork:false",
                &PageRequest::Offset {
                    page: 2,
                    per_page: 100,
                },
            )
            .await
            .unwrap();

        assert_eq!(page.total_count, Some(5000));
        assert_eq!(page.items[0].topics, vec!["react", "jest"]);
        let url = transport.sent_urls()[0].clone();
        assert!(url.starts_with("https://api.github.com/search/repositories?q=language%3ATypeScript"));
        assert!(url.ends_with("&per_page=100&page=2"));
    }

    #[tokio::test]
    async fn test_rest_search_past_window_is_empty() {
        let (api, _) = api(vec![response(422, "Cannot access beyond the first 1000 results", &[])]);
        let page = api
            .search_page(
                "q",
                &PageRequest::Offset {
                    page: 11,
                    per_page: 100,
                },
            )
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_file_text_decodes_base64_with_newlines() {
        // "{\"name\": \"x\"}" split across lines the way the API returns it.
        let body = r#"{"type": "file", "encoding": "base64", "content": "eyJuYW1l\nIjogIngifQ==\n"}"#;
        let (api, transport) = api(vec![ok(body)]);

        let text = api.file_text("acme", "dashboard", "package.json").await.unwrap();

        assert_eq!(text.as_deref(), Some("{\"name\": \"x\"}"));
        assert_eq!(
            transport.sent_urls()[0],
            "https://api.github.com/repos/acme/dashboard/contents/package.json"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let (api, _) = api(vec![response(404, "", &[])]);
        assert_eq!(api.file_text("acme", "dashboard", "package.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_dir_maps_entry_kinds() {
        let body = r#"[
          {"name": "App.test.tsx", "path": "src/App.test.tsx", "type": "file"},
          {"name": "components", "path": "src/components", "type": "dir"},
          {"name": "vendor", "path": "src/vendor", "type": "submodule"}
        ]"#;
        let (api, transport) = api(vec![ok(body)]);

        let entries = api.list_dir("acme", "dashboard", "src").await.unwrap().unwrap();

        assert_eq!(
            entries.iter().map(|e| e.kind).collect::<Vec<_>>(),
            vec![EntryKind::File, EntryKind::Dir, EntryKind::Other]
        );
        assert_eq!(
            transport.sent_urls()[0],
            "https://api.github.com/repos/acme/dashboard/contents/src"
        );
    }

    #[tokio::test]
    async fn test_root_listing_url_has_no_trailing_path() {
        let (api, transport) = api(vec![ok("[]")]);
        api.list_dir("acme", "dashboard", "").await.unwrap();
        assert_eq!(
            transport.sent_urls()[0],
            "https://api.github.com/repos/acme/dashboard/contents"
        );
    }

    #[tokio::test]
    async fn test_languages_and_topics() {
        let (api, _) = api(vec![
            ok(r#"{"TypeScript": 12000, "CSS": 300}"#),
            ok(r#"{"names": ["react", "dashboard"]}"#),
        ]);
        let languages = api.languages("acme", "dashboard").await.unwrap().unwrap();
        assert_eq!(languages.get("TypeScript"), Some(&12000));
        assert_eq!(api.topics("acme", "dashboard").await.unwrap(), vec!["react", "dashboard"]);
    }
}

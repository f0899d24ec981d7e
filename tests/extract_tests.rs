//! Paged extraction tests against an in-process HTTP stub

use std::net::SocketAddr;

use data_warehouse_sync::catalog::{self, ObjectFilter, SourceKind, TableSpec};
use data_warehouse_sync::config::SourceSection;
use data_warehouse_sync::extract::{HttpSource, PageFiles, Retriever};
use data_warehouse_sync::SyncError;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const GROUPS_PAGE: &str = r#"{
  "usergroups": [
    {"id": "3684a786-6671-4268-8ed0-9db82ebca60b", "group": "faculty", "desc": "Faculty Member"},
    {"id": "503a81cd-6c26-400f-b620-14c08943697c", "group": "staff", "desc": "Staff Member"},
    {"id": "ad0bc554-d5bc-463c-85d1-5562127ae91b", "group": "graduate", "desc": "Graduate Student"}
  ],
  "totalRecords": 3
}"#;

const EMPTY_GROUPS_PAGE: &str = r#"{"usergroups": [], "totalRecords": 3}"#;

fn route(head: &str) -> (&'static str, String, String) {
    let request_line = head.lines().next().unwrap_or_default();
    let authorized = head.to_lowercase().contains("x-okapi-token: secret-token");

    if request_line.starts_with("POST /authn/login") {
        return (
            "201 Created",
            "X-Okapi-Token: secret-token\r\n".to_string(),
            "{}".to_string(),
        );
    }
    if !authorized {
        return ("401 Unauthorized", String::new(), "missing token".to_string());
    }
    if request_line.starts_with("GET /groups?") {
        let body = if request_line.contains("offset=0&") {
            GROUPS_PAGE
        } else {
            EMPTY_GROUPS_PAGE
        };
        return ("200 OK", String::new(), body.to_string());
    }
    if request_line.starts_with("GET /notes?") {
        if request_line.contains("query=") {
            return ("400 Bad Request", String::new(), "query not supported".to_string());
        }
        return ("200 OK", String::new(), r#"{"notes": []}"#.to_string());
    }
    if request_line.starts_with("GET /broken?") {
        return ("422 Unprocessable Entity", String::new(), "bad query".to_string());
    }
    ("404 Not Found", String::new(), "no such endpoint".to_string())
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

async fn handle(mut socket: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let (status, headers, body) = route(&head);
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
        status,
        body.len(),
        headers,
        body
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    let _ = socket.shutdown().await;
}

async fn start_stub() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(handle(socket));
        }
    });
    addr
}

fn source_config(addr: SocketAddr) -> SourceSection {
    SourceSection {
        url: format!("http://{}", addr),
        tenant: "diku".to_string(),
        username: "sync".to_string(),
        password: "password".to_string(),
        page_size: 3,
        timeout_secs: 10,
        ..Default::default()
    }
}

fn paged(name: &'static str, source: &'static str) -> TableSpec {
    TableSpec {
        name,
        source,
        direct_source: None,
        anonymize: false,
        kind: SourceKind::PagedApi,
        object_filter: ObjectFilter::None,
    }
}

#[tokio::test]
async fn test_paging_stops_at_empty_page() {
    let addr = start_stub().await;
    let source = HttpSource::login(&source_config(addr)).await.unwrap();
    let dir = tempdir().unwrap();
    let table = catalog::find("user_groups").unwrap();
    let files = PageFiles::new(dir.path(), table.name, None);

    let extraction = source.retrieve(table, &files).await.unwrap();

    assert!(extraction.found);
    assert_eq!(extraction.pages, vec![files.page(0), files.page(1)]);
    assert_eq!(files.read_count().unwrap(), Some(1));
    let first = std::fs::read_to_string(files.page(0)).unwrap();
    assert!(first.contains("faculty"));
}

#[tokio::test]
async fn test_unavailable_source_reports_no_data() {
    let addr = start_stub().await;
    let source = HttpSource::login(&source_config(addr)).await.unwrap();
    let dir = tempdir().unwrap();
    let table = paged("missing_things", "/missing");
    let files = PageFiles::new(dir.path(), table.name, None);

    let extraction = source.retrieve(&table, &files).await.unwrap();
    assert!(!extraction.found);
    assert_eq!(files.read_count().unwrap(), None);
}

#[tokio::test]
async fn test_other_status_is_transport_error_with_body() {
    let addr = start_stub().await;
    let source = HttpSource::login(&source_config(addr)).await.unwrap();
    let dir = tempdir().unwrap();
    let table = paged("broken_things", "/broken");
    let files = PageFiles::new(dir.path(), table.name, None);

    match source.retrieve(&table, &files).await {
        Err(SyncError::SourceStatus { status, body }) => {
            assert_eq!(status, 422);
            assert_eq!(body, "bad query");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_notes_are_requested_without_query() {
    let addr = start_stub().await;
    let source = HttpSource::login(&source_config(addr)).await.unwrap();
    let dir = tempdir().unwrap();
    let table = catalog::find("notes").unwrap();
    let files = PageFiles::new(dir.path(), table.name, Some("east"));

    let extraction = source.retrieve(table, &files).await.unwrap();
    assert!(extraction.found);
    assert_eq!(extraction.pages.len(), 1);
    assert!(dir.path().join("notes_east_0.json").exists());
    assert_eq!(files.read_count().unwrap(), Some(0));
}

#[tokio::test]
async fn test_failed_login() {
    let addr = start_stub().await;
    let mut config = source_config(addr);
    config.login_path = "/bl-users/login".to_string();
    assert!(matches!(
        HttpSource::login(&config).await,
        Err(SyncError::SourceStatus { status: 401, .. })
    ));
}

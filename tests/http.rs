//! HTTP collaborators against a one-shot local responder.

use snapguard::{BackupConfig, BackupError, GithubProbe, HttpSource, RemoteSource, VisibilityProbe};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answers exactly one request with `response` verbatim and hands back the
/// raw request head.
async fn serve_raw(response: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).to_string()
    });

    (format!("http://{}", addr), handle)
}

/// Answers exactly one request with a well-formed response.
async fn serve_once(
    status: &'static str,
    content_type: &'static str,
    body: &'static str,
) -> (String, JoinHandle<String>) {
    serve_raw(format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    ))
    .await
}

fn config_for(base_url: &str) -> BackupConfig {
    let base_url = base_url.to_string();
    BackupConfig::from_lookup(move |key| {
        match key {
            "BACKUP_URL" => Some(base_url.clone()),
            "BACKUP_USERNAME" => Some("admin".to_string()),
            "BACKUP_PASSWORD" => Some("pw".to_string()),
            "GITHUB_REPOSITORY" => Some("acme/backups".to_string()),
            "GITHUB_TOKEN" => Some("t0ken".to_string()),
            "GITHUB_API_URL" => Some(base_url.clone()),
            "REQUEST_TIMEOUT" => Some("5".to_string()),
            _ => None,
        }
    })
    .unwrap()
}

#[tokio::test]
async fn test_fetch_sends_basic_auth_to_backup_endpoint() {
    let (url, server) = serve_once("200 OK", "application/json", r#"{"sites":[1,2]}"#).await;
    let source = HttpSource::new(&config_for(&url)).unwrap();

    let document = source.fetch().await.unwrap();
    assert_eq!(document.body, br#"{"sites":[1,2]}"#);
    assert_eq!(document.content_type.as_deref(), Some("application/json"));

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /api/manage/sysConfig/backup?action=backup HTTP/1.1"));
    // base64("admin:pw")
    assert!(request
        .to_ascii_lowercase()
        .contains(&"authorization: Basic YWRtaW46cHc=".to_ascii_lowercase()));
}

#[tokio::test]
async fn test_fetch_accepts_json_with_wrong_content_type() {
    let (url, server) = serve_once("200 OK", "text/plain", r#"[1,2,3]"#).await;
    let source = HttpSource::new(&config_for(&url)).unwrap();

    let document = source.fetch().await.unwrap();
    assert_eq!(document.body, b"[1,2,3]");
    server.await.unwrap();
}

#[tokio::test]
async fn test_fetch_rejected_credentials() {
    let (url, server) = serve_once("401 Unauthorized", "text/plain", "nope").await;
    let source = HttpSource::new(&config_for(&url)).unwrap();

    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, BackupError::Transport(_)));
    assert!(err.to_string().contains("Authentication rejected"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_fetch_server_error() {
    let (url, server) = serve_once("500 Internal Server Error", "text/plain", "boom").await;
    let source = HttpSource::new(&config_for(&url)).unwrap();

    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, BackupError::Transport(_)));
    assert!(err.to_string().contains("500"));
    assert!(err.to_string().contains("boom"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_fetch_invalid_json_is_parse_error() {
    let (url, server) = serve_once("200 OK", "text/html", "<html>login</html>").await;
    let source = HttpSource::new(&config_for(&url)).unwrap();

    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, BackupError::Parse(_)));
    assert_eq!(err.exit_code(), 5);
    server.await.unwrap();
}

#[tokio::test]
async fn test_fetch_oversized_content_length_is_transport_error() {
    let (url, server) = serve_raw(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
         Content-Length: 9000000000000000\r\nConnection: close\r\n\r\n{\"partial\":"
            .to_string(),
    )
    .await;
    let source = HttpSource::new(&config_for(&url)).unwrap();

    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, BackupError::Transport(_)));
    assert_eq!(err.exit_code(), 4);
    server.await.unwrap();
}

#[tokio::test]
async fn test_fetch_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = HttpSource::new(&config_for(&format!("http://{}", addr))).unwrap();
    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, BackupError::Transport(_)));
}

#[tokio::test]
async fn test_probe_reads_private_flag() {
    let (url, server) = serve_once("200 OK", "application/json", r#"{"private":true}"#).await;
    let probe = GithubProbe::new(&config_for(&url)).unwrap();

    assert!(probe.repository_is_private().await.unwrap());

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /repos/acme/backups HTTP/1.1"));
    assert!(request.to_ascii_lowercase().contains("authorization: token t0ken"));
}

#[tokio::test]
async fn test_probe_public_repository() {
    let (url, server) =
        serve_once("200 OK", "application/json", r#"{"private":false,"name":"backups"}"#).await;
    let probe = GithubProbe::new(&config_for(&url)).unwrap();

    assert!(!probe.repository_is_private().await.unwrap());
    server.await.unwrap();
}

#[tokio::test]
async fn test_probe_not_found() {
    let (url, server) = serve_once("404 Not Found", "application/json", r#"{"message":"Not Found"}"#).await;
    let probe = GithubProbe::new(&config_for(&url)).unwrap();

    let err = probe.repository_is_private().await.unwrap_err();
    assert!(err.to_string().contains("not found"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_probe_missing_field_is_an_error() {
    let (url, server) = serve_once("200 OK", "application/json", r#"{"name":"backups"}"#).await;
    let probe = GithubProbe::new(&config_for(&url)).unwrap();

    assert!(matches!(
        probe.repository_is_private().await,
        Err(BackupError::Parse(_))
    ));
    server.await.unwrap();
}

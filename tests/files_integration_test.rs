mod common;

use common::{TestServer, unreachable_webhook};
use reqwest::StatusCode;

#[tokio::test]
async fn test_serve_stored_file_with_range() {
    let server = TestServer::start(&unreachable_webhook()).await;
    let client = server.client();

    std::fs::write(server.storage_dir().join("clip.mp4"), b"0123456789").unwrap();

    let response = client
        .get(server.url("/files/clip.mp4"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "video/mp4"
    );
    assert_eq!(response.headers()["accept-ranges"].to_str().unwrap(), "bytes");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"0123456789");

    let response = client
        .get(server.url("/files/clip.mp4"))
        .header("Range", "bytes=2-5")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()["content-range"].to_str().unwrap(),
        "bytes 2-5/10"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"2345");

    let response = client
        .get(server.url("/files/clip.mp4"))
        .header("Range", "bytes=20-")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_serve_empty_file() {
    let server = TestServer::start(&unreachable_webhook()).await;
    let client = server.client();

    std::fs::write(server.storage_dir().join("empty.txt"), b"").unwrap();

    let response = client
        .get(server.url("/files/empty.txt"))
        .header("Range", "bytes=0-")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_or_escaping_file_is_not_found() {
    let server = TestServer::start(&unreachable_webhook()).await;
    let client = server.client();

    let response = client
        .get(server.url("/files/nope.jpg"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    for path in ["/files/%2Fetc%2Fpasswd", "/files/%2E%2E%2Fsecret", "/files/..%5Csecret"] {
        let response = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "path {path}");
    }
}

#[tokio::test]
async fn test_unknown_paths_return_app_shell() {
    let server = TestServer::start(&unreachable_webhook()).await;
    let client = server.client();

    for path in ["/", "/result", "/some/deep/link"] {
        let response = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "path {path}");
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        let body = response.text().await.unwrap();
        assert!(body.contains("Product_Image"));
    }
}

#[tokio::test]
async fn test_ui_dir_is_served_with_index_fallback() {
    let ui = tempfile::tempdir().unwrap();
    std::fs::write(ui.path().join("index.html"), "<html>bundle</html>").unwrap();
    std::fs::write(ui.path().join("app.js"), "console.log(1)").unwrap();
    let ui_dir = ui.path().to_string_lossy().into_owned();

    let server = TestServer::start_with(&unreachable_webhook(), |config| {
        config.ui_dir = Some(ui_dir);
    })
    .await;
    let client = server.client();

    let response = client.get(server.url("/app.js")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "console.log(1)");

    let response = client.get(server.url("/result")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<html>bundle</html>");
}

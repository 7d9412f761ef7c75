//! ResourceLoader against a live mock origin.

use std::time::Duration;

use folio_net::{
    Fetcher, LoaderConfig, NetError, Request, RequestMode, ResourceLoader, ResponseType,
};
use http::{Method, StatusCode};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loader_for(server: &MockServer) -> ResourceLoader {
    let origin = Url::parse(&server.uri()).unwrap();
    ResourceLoader::new(LoaderConfig::default().with_origin(origin)).unwrap()
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&server.uri()).unwrap().join(p).unwrap()
}

#[tokio::test]
async fn same_origin_get_is_basic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photography"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<h1>Photography</h1>"),
        )
        .mount(&server)
        .await;

    let loader = loader_for(&server);
    let response = loader
        .fetch(&Request::get(url(&server, "/photography")))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.response_type, ResponseType::Basic);
    assert!(!response.redirected);
    assert_eq!(response.text().unwrap(), "<h1>Photography</h1>");
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "text/html"
    );
}

#[tokio::test]
async fn error_status_is_returned_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let loader = loader_for(&server);
    let response = loader
        .fetch(&Request::get(url(&server, "/gone")))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!response.ok());
}

#[tokio::test]
async fn post_body_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscribe"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let loader = loader_for(&server);
    let request = Request::post(url(&server, "/subscribe"), "email=reader@example.com".into());
    assert_eq!(request.method, Method::POST);

    let response = loader.fetch(&request).await.unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
}

#[tokio::test]
async fn foreign_origin_no_cors_is_opaque() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/font.woff2"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
        .mount(&server)
        .await;

    // The loader acts for a different origin than the mock server.
    let config = LoaderConfig::default()
        .with_origin(Url::parse("https://patrickprunty.com/").unwrap());
    let loader = ResourceLoader::new(config).unwrap();

    let response = loader
        .fetch(&Request::get(url(&server, "/font.woff2")).mode(RequestMode::NoCors))
        .await
        .unwrap();

    assert_eq!(response.response_type, ResponseType::Opaque);
    assert!(response.body().is_empty());
    assert_eq!(response.status_code(), 0);
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let loader = loader_for(&server);
    let request = Request::get(url(&server, "/slow")).timeout(Duration::from_millis(100));

    assert!(matches!(
        loader.fetch(&request).await,
        Err(NetError::Timeout(_))
    ));
}

#[tokio::test]
async fn unreachable_host_is_an_error() {
    let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
    // Port 9 on loopback is almost never listening.
    let request = Request::get(Url::parse("http://127.0.0.1:9/").unwrap())
        .timeout(Duration::from_secs(2));

    assert!(loader.fetch(&request).await.is_err());
}

//! Response framing behavior against scripted mock servers: header merge,
//! framing precedence, the close ladder, interim responses, and the size
//! guard.

mod helpers;

use helpers::mock_server::MockServer;
use strix::{Client, Error, Request};

fn client() -> Client {
    Client::builder().build()
}

#[tokio::test]
async fn test_duplicate_headers_merge_in_arrival_order() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nX-Probe: a\r\nContent-Length: 2\r\nX-Probe: b\r\n\r\nok".to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.headers().get("x-probe"), Some("a, b"));
    assert_eq!(resp.read(None).await.unwrap().as_ref(), b"ok");
}

#[tokio::test]
async fn test_chunked_wins_over_content_length() {
    // the declared length is a lie; chunk framing decides where the body ends
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 100\r\n\r\n\
          4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"
            .to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    let body = resp.read(None).await.unwrap();
    assert_eq!(body.as_ref(), b"Wikipedia");
}

#[tokio::test]
async fn test_zero_length_chunked_body_is_legal() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n".to_vec(),
    ])
    .await;

    let client = client();
    let mut resp = client
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert!(resp.read(None).await.unwrap().is_empty());
    // body ended on the terminating chunk marker; the connection is reusable
    assert_eq!(client.pool_stats().idle, 1);
}

#[tokio::test]
async fn test_chunked_trailers_are_discarded() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          4\r\nWiki\r\n0\r\nX-Trailer: ignored\r\n\r\n"
            .to_vec(),
    ])
    .await;

    let client = client();
    let mut resp = client
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.read(None).await.unwrap().as_ref(), b"Wiki");
    assert!(!resp.headers().contains("x-trailer"));
    assert_eq!(client.pool_stats().idle, 1);
}

#[tokio::test]
async fn test_close_ladder_http11_default_stays_open() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec(),
    ])
    .await;

    let resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert!(!resp.will_close());
}

#[tokio::test]
async fn test_close_ladder_http11_connection_close() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok".to_vec(),
    ])
    .await;

    let resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert!(resp.will_close());
}

#[tokio::test]
async fn test_close_ladder_http10_default_closes() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec(),
    ])
    .await;

    let resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert!(resp.will_close());
}

#[tokio::test]
async fn test_close_ladder_http10_keep_alive_stays_open() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\nContent-Length: 2\r\n\r\nok".to_vec(),
    ])
    .await;

    let resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert!(!resp.will_close());
}

#[tokio::test]
async fn test_keep_alive_max_one_forces_close() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nKeep-Alive: timeout=5, max=1\r\nConnection: keep-alive\r\nContent-Length: 2\r\n\r\nok"
            .to_vec(),
    ])
    .await;

    let resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert!(resp.will_close());
}

#[tokio::test]
async fn test_head_yields_empty_body_and_reusable_connection() {
    // the server claims 500 body bytes but HEAD responses carry none
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello".to_vec(),
    ])
    .await;

    let client = client();
    let mut head = client
        .execute(&Request::head(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(head.status(), 200);
    assert_eq!(head.headers().get("content-length"), Some("500"));
    assert!(head.read(None).await.unwrap().is_empty());

    // the very same connection serves the follow-up GET
    let mut get = client
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(get.read(None).await.unwrap().as_ref(), b"Hello");
    assert_eq!(client.pool_stats().reused, 1);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_size_guard_discards_oversized_body() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\npayload-start".to_vec(),
    ])
    .await;

    let client = Client::builder().max_body_size(100).build();
    let mut resp = client
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), 204);
    assert_eq!(resp.reason(), "No Content");
    assert!(resp.body_discarded());
    assert!(resp.read(None).await.unwrap().is_empty());
    // original headers survive so callers can see what was declared
    assert_eq!(resp.headers().get("content-length"), Some("1000"));

    // the connection was torn down, not pooled
    let stats = client.pool_stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.retired, 1);
}

#[tokio::test]
async fn test_size_guard_spares_small_bodies() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello".to_vec(),
    ])
    .await;

    let client = Client::builder().max_body_size(100).build();
    let mut resp = client
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(!resp.body_discarded());
    assert_eq!(resp.read(None).await.unwrap().as_ref(), b"Hello");
}

#[tokio::test]
async fn test_interim_100_is_skipped() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 100 Continue\r\nX-Interim: yes\r\n\r\n\
          HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
            .to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(!resp.headers().contains("x-interim"));
    assert_eq!(resp.read(None).await.unwrap().as_ref(), b"ok");
}

#[tokio::test]
async fn test_204_ignores_content_length() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 204 No Content\r\nContent-Length: 100\r\n\r\n".to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert!(resp.read(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_delimited_body_runs_to_eof() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.0 200 OK\r\n\r\nbody until the connection closes".to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert!(resp.will_close());
    let body = resp.read(None).await.unwrap();
    assert_eq!(body.as_ref(), b"body until the connection closes");
}

#[tokio::test]
async fn test_http09_response() {
    let server = MockServer::single_connection(vec![
        b"HTTP/0.9 200 OK\r\nold-school body".to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.version().code(), 9);
    assert!(resp.headers().is_empty());
    assert!(resp.will_close());
    assert_eq!(resp.read(None).await.unwrap().as_ref(), b"old-school body");
}

#[tokio::test]
async fn test_unknown_protocol_is_fatal() {
    let server = MockServer::single_connection(vec![
        b"ICY 200 OK\r\n\r\n".to_vec(),
    ])
    .await;

    let client = client();
    let err = client
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownProtocol(_)));
    assert_eq!(client.pool_stats().retired, 1);
}

#[tokio::test]
async fn test_truncated_body_is_a_framing_error() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nonly this much".to_vec(),
    ])
    .await;

    let client = client();
    let mut resp = client
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    let err = resp.read(None).await.unwrap_err();
    assert!(matches!(err, Error::Framing(_)));

    // the half-read connection was retired before the error surfaced
    let stats = client.pool_stats();
    assert_eq!(stats.retired, 1);
    assert_eq!(stats.idle, 0);
}

#[tokio::test]
async fn test_bad_chunk_size_is_a_framing_error() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nZZZ\r\nWiki\r\n0\r\n\r\n".to_vec(),
    ])
    .await;

    let client = client();
    let mut resp = client
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    let err = resp.read(None).await.unwrap_err();
    assert!(matches!(err, Error::Framing(_)));
    assert_eq!(client.pool_stats().idle, 0);
}

#[tokio::test]
async fn test_readline_scans_buffered_bytes() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 12\r\n\r\nline1\nline2\n".to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.readline(None).await.unwrap().as_ref(), b"line1\n");
    // a limit clips the returned line
    assert_eq!(resp.readline(Some(3)).await.unwrap().as_ref(), b"lin");
    assert_eq!(resp.readline(None).await.unwrap().as_ref(), b"e2\n");
    assert!(resp.readline(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_readlines_collects_until_end_of_body() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 12\r\n\r\nline1\nline2\n".to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    let lines = resp.readlines(None).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].as_ref(), b"line1\n");
    assert_eq!(lines[1].as_ref(), b"line2\n");
}

#[tokio::test]
async fn test_wait_time_is_recorded() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec(),
    ])
    .await;

    let resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert!(resp.wait_time().is_some());
}

#[tokio::test]
async fn test_set_body_replaces_buffered_content() {
    let server = MockServer::single_connection(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\noriginal".to_vec(),
    ])
    .await;

    let mut resp = client()
        .execute(&Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    resp.read(None).await.unwrap();
    resp.set_body("mangled");
    assert_eq!(resp.read(None).await.unwrap().as_ref(), b"mangled");
}

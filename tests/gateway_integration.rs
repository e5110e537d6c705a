//! End-to-end tests that drive real HTTP requests, over a real TCP
//! socket, through the whole pipeline: accept loop, parsing, auth,
//! permission checks, and the in-memory backend. Each test spins up its
//! own gateway on an ephemeral port so they can run concurrently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use gatehouse::auth::{TokenAuthorizer, UserRecord};
use gatehouse::backend::MemoryBackend;
use gatehouse::config::GatewayConfig;
use gatehouse::dialect::S3DialectManager;
use gatehouse::pipeline::PipelineContext;
use gatehouse::pool::{BoundedWorkerPool, PoolConfig};
use gatehouse::router::RouterBuilder;
use gatehouse::server;

fn user_record(id: &str) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        display_name: id.to_string(),
        tenant: "test".into(),
        suspended: false,
    }
}

/// Boots an S3-dialect gateway against a fresh in-memory backend,
/// authenticated with two bearer tokens ("alice-token", "bob-token").
/// Returns the bound address; the server keeps running for the life of
/// the test process.
async fn spawn_gateway() -> SocketAddr {
    let backend = MemoryBackend::new();
    let authorizer = TokenAuthorizer::new(vec![
        ("alice-token".into(), user_record("alice")),
        ("bob-token".into(), user_record("bob")),
    ]);
    let router = RouterBuilder::new()
        .default_manager(S3DialectManager::new(backend, authorizer))
        .build();

    let config = Arc::new(ArcSwap::from_pointee(GatewayConfig::default()));
    let pool = Arc::new(BoundedWorkerPool::new(PoolConfig::default()));
    let ctx = Arc::new(PipelineContext::new(router, config));
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, ctx, pool, shutdown));
    addr
}

struct RawResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// Sends one hand-built HTTP/1.1 request over a fresh connection and
/// reads until the peer closes it — every request here sends
/// `Connection: close`, so that's exactly one response.
async fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut head = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nAuthorization: {token}\r\n"
    );
    for (name, value) in extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if !body.is_empty() {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes()).await.unwrap();
    if !body.is_empty() {
        stream.write_all(body).await.unwrap();
    }

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> RawResponse {
    let sep = find(raw, b"\r\n\r\n").expect("response missing header/body separator");
    let head = std::str::from_utf8(&raw[..sep]).unwrap();
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .unwrap()
        .parse()
        .unwrap();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(": ") {
            headers.insert(k.to_ascii_lowercase(), v.to_string());
        }
    }

    let mut body = raw[sep + 4..].to_vec();
    if let Some(len) = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        body.truncate(len);
    }

    RawResponse { status, headers, body }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extract_tag(haystack: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = haystack.find(&open).expect("opening tag not found") + open.len();
    let end = haystack[start..].find(&close).expect("closing tag not found") + start;
    haystack[start..end].to_string()
}

async fn create_bucket(addr: SocketAddr, name: &str, token: &str) {
    let res = send(addr, "PUT", &format!("/{name}"), token, &[], b"").await;
    assert_eq!(res.status, 200, "create bucket {name} failed");
}

#[tokio::test]
async fn put_then_get_returns_matching_etag() {
    let addr = spawn_gateway().await;
    create_bucket(addr, "scenario-one", "alice-token").await;

    let put = send(addr, "PUT", "/scenario-one/greeting.txt", "alice-token", &[], b"hello world").await;
    assert_eq!(put.status, 200);
    let put_etag = put.headers.get("etag").cloned().expect("PUT response missing ETag");

    let get = send(addr, "GET", "/scenario-one/greeting.txt", "alice-token", &[], b"").await;
    assert_eq!(get.status, 200);
    assert_eq!(get.headers.get("etag"), Some(&put_etag));
    assert_eq!(get.body, b"hello world");
}

#[tokio::test]
async fn range_get_returns_partial_content_with_exact_content_range() {
    let addr = spawn_gateway().await;
    create_bucket(addr, "scenario-two", "alice-token").await;

    let payload = vec![b'x'; 1024];
    let put = send(addr, "PUT", "/scenario-two/blob", "alice-token", &[], &payload).await;
    assert_eq!(put.status, 200);

    let get = send(
        addr,
        "GET",
        "/scenario-two/blob",
        "alice-token",
        &[("Range", "bytes=100-199")],
        b"",
    )
    .await;
    assert_eq!(get.status, 206);
    assert_eq!(
        get.headers.get("content-range"),
        Some(&"bytes 100-199/1024".to_string())
    );
    assert_eq!(get.body.len(), 100);
    assert_eq!(get.body, payload[100..200]);
}

#[tokio::test]
async fn multipart_upload_completes_lists_and_aborts_correctly() {
    let addr = spawn_gateway().await;
    create_bucket(addr, "scenario-three", "alice-token").await;

    let init = send(addr, "POST", "/scenario-three/bigfile?uploads", "alice-token", &[], b"").await;
    assert_eq!(init.status, 200);
    let upload_id = extract_tag(&String::from_utf8(init.body).unwrap(), "UploadId");

    let part1 = vec![b'a'; 5 * 1024 * 1024];
    let part2 = vec![b'b'; 5 * 1024 * 1024];
    let part3 = vec![b'c'; 1024];

    let p1 = send(
        addr,
        "PUT",
        &format!("/scenario-three/bigfile?uploadId={upload_id}&partNumber=1"),
        "alice-token",
        &[],
        &part1,
    )
    .await;
    assert_eq!(p1.status, 200);
    let etag1 = p1.headers.get("etag").cloned().unwrap();

    let p2 = send(
        addr,
        "PUT",
        &format!("/scenario-three/bigfile?uploadId={upload_id}&partNumber=2"),
        "alice-token",
        &[],
        &part2,
    )
    .await;
    assert_eq!(p2.status, 200);
    let etag2 = p2.headers.get("etag").cloned().unwrap();

    let p3 = send(
        addr,
        "PUT",
        &format!("/scenario-three/bigfile?uploadId={upload_id}&partNumber=3"),
        "alice-token",
        &[],
        &part3,
    )
    .await;
    assert_eq!(p3.status, 200);
    let etag3 = p3.headers.get("etag").cloned().unwrap();

    let complete_body = format!(
        "<CompleteMultipartUpload>\
         <Part><PartNumber>1</PartNumber><ETag>{etag1}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{etag2}</ETag></Part>\
         <Part><PartNumber>3</PartNumber><ETag>{etag3}</ETag></Part>\
         </CompleteMultipartUpload>"
    );
    let complete = send(
        addr,
        "POST",
        &format!("/scenario-three/bigfile?uploadId={upload_id}"),
        "alice-token",
        &[],
        complete_body.as_bytes(),
    )
    .await;
    assert_eq!(
        complete.status,
        200,
        "complete failed: {}",
        String::from_utf8_lossy(&complete.body)
    );

    let head = send(addr, "HEAD", "/scenario-three/bigfile", "alice-token", &[], b"").await;
    assert_eq!(head.status, 200);
    assert_eq!(
        head.headers.get("content-length").map(String::as_str),
        Some((10 * 1024 * 1024 + 1024).to_string()).as_deref()
    );

    let listing = send(addr, "GET", "/scenario-three?uploads", "alice-token", &[], b"").await;
    assert_eq!(listing.status, 200);
    let listing_body = String::from_utf8(listing.body).unwrap();
    assert!(
        !listing_body.contains(&upload_id),
        "completed upload should no longer appear in the multipart upload listing"
    );

    // A second, abandoned upload: aborting it must delete its stored parts.
    let init2 = send(addr, "POST", "/scenario-three/throwaway?uploads", "alice-token", &[], b"").await;
    assert_eq!(init2.status, 200);
    let upload_id2 = extract_tag(&String::from_utf8(init2.body).unwrap(), "UploadId");

    let part = send(
        addr,
        "PUT",
        &format!("/scenario-three/throwaway?uploadId={upload_id2}&partNumber=1"),
        "alice-token",
        &[],
        b"partial data",
    )
    .await;
    assert_eq!(part.status, 200);

    let abort = send(
        addr,
        "DELETE",
        &format!("/scenario-three/throwaway?uploadId={upload_id2}"),
        "alice-token",
        &[],
        b"",
    )
    .await;
    assert_eq!(abort.status, 204);

    let list_parts = send(
        addr,
        "GET",
        &format!("/scenario-three/throwaway?uploadId={upload_id2}"),
        "alice-token",
        &[],
        b"",
    )
    .await;
    assert_eq!(list_parts.status, 200);
    let list_parts_body = String::from_utf8(list_parts.body).unwrap();
    assert!(
        !list_parts_body.contains("<Part>"),
        "aborting an upload should delete every part it had received"
    );
}

#[tokio::test]
async fn multi_object_delete_reports_partial_access_denied() {
    let addr = spawn_gateway().await;
    create_bucket(addr, "scenario-four", "alice-token").await;

    // Open the bucket to shared writes so bob can put objects of his own
    // into alice's bucket; each object still carries its own private ACL
    // owned by whoever created it.
    let acl = send(
        addr,
        "PUT",
        "/scenario-four?acl&x-acl=public-read-write",
        "alice-token",
        &[],
        b"",
    )
    .await;
    assert_eq!(acl.status, 200);

    for key in ["alice-1", "alice-2", "alice-3"] {
        let put = send(addr, "PUT", &format!("/scenario-four/{key}"), "alice-token", &[], b"mine").await;
        assert_eq!(put.status, 200);
    }
    for key in ["bob-1", "bob-2"] {
        let put = send(addr, "PUT", &format!("/scenario-four/{key}"), "bob-token", &[], b"not yours").await;
        assert_eq!(put.status, 200);
    }

    let delete_body = "<Delete>\
        <Object><Key>alice-1</Key></Object>\
        <Object><Key>alice-2</Key></Object>\
        <Object><Key>alice-3</Key></Object>\
        <Object><Key>bob-1</Key></Object>\
        <Object><Key>bob-2</Key></Object>\
        </Delete>";
    let delete = send(addr, "POST", "/scenario-four?delete", "alice-token", &[], delete_body.as_bytes()).await;
    assert_eq!(delete.status, 200);
    let body = String::from_utf8(delete.body).unwrap();

    assert_eq!(body.matches("<Deleted>").count(), 3);
    assert_eq!(body.matches("<Error>").count(), 2);
    assert!(body.contains("<Deleted><Key>alice-1</Key></Deleted>"));
    assert!(body.contains("<Deleted><Key>alice-2</Key></Deleted>"));
    assert!(body.contains("<Deleted><Key>alice-3</Key></Deleted>"));
    assert!(body.contains("<Error><Key>bob-1</Key><Code>AccessDenied</Code></Error>"));
    assert!(body.contains("<Error><Key>bob-2</Key><Code>AccessDenied</Code></Error>"));

    let head_bob1 = send(addr, "HEAD", "/scenario-four/bob-1", "bob-token", &[], b"").await;
    assert_eq!(head_bob1.status, 200, "bob's object must survive alice's denied delete");

    let head_alice1 = send(addr, "HEAD", "/scenario-four/alice-1", "alice-token", &[], b"").await;
    assert_eq!(head_alice1.status, 404, "alice's own object should actually be gone");
}

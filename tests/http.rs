use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use assert_matches::assert_matches;
use reqwest::blocking::Client;

use ps4_pkg_fetch::catalog::{CatalogClient, OrbisPatchesClient};
use ps4_pkg_fetch::domain::TitleId;
use ps4_pkg_fetch::error::PkgError;
use ps4_pkg_fetch::fetcher::{HttpPieceSource, PieceSource};

/// Answers one connection per canned response and hands back every request
/// it saw, lowercased.
fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().unwrap();
            seen.push(read_request(&mut stream));
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
        seen
    });
    (base_url, handle)
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let read = stream.read(&mut buf).unwrap();
        if read == 0 {
            break;
        }
        data.extend_from_slice(&buf[..read]);
        let Some(end) = data.windows(4).position(|window| window == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..end]).to_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= end + 4 + length {
            break;
        }
    }
    String::from_utf8_lossy(&data).to_lowercase()
}

fn response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn client() -> Client {
    Client::builder().no_proxy().build().unwrap()
}

#[test]
fn piece_request_asks_for_full_range() {
    let (base_url, server) = serve(vec![response("206 Partial Content", "abc")]);
    let source = HttpPieceSource::new(client());

    let Ok(mut stream) = source.open(&format!("{base_url}/pkg/GAME_0.pkg")) else {
        panic!("piece request failed");
    };
    assert_eq!(stream.content_length, Some(3));
    let mut body = String::new();
    stream.reader.read_to_string(&mut body).unwrap();
    assert_eq!(body, "abc");

    let requests = server.join().unwrap();
    assert!(requests[0].starts_with("get /pkg/game_0.pkg http/1.1"));
    assert!(requests[0].contains("range: bytes=0-"));
}

#[test]
fn piece_request_error_status_is_reported() {
    let (base_url, server) = serve(vec![response("403 Forbidden", "denied")]);
    let source = HttpPieceSource::new(client());

    let Err(err) = source.open(&format!("{base_url}/pkg/GAME_1.pkg")) else {
        panic!("forbidden piece was accepted");
    };
    assert_matches!(err, PkgError::TransferStatus { status: 403, .. });
    server.join().unwrap();
}

#[test]
fn piece_resolution_posts_key_with_ajax_headers() {
    let body = r#"{"success": true, "pieces": [{"pkg_url": "http://cdn/GAME_0.pkg"}]}"#;
    let (base_url, server) = serve(vec![response("200 OK", body)]);
    let catalog = OrbisPatchesClient::new(client(), format!("{base_url}/"));
    let title: TitleId = "CUSA00001".parse().unwrap();

    let locations = catalog.resolve_pieces(&title, "abc123").unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].base_name(), Some("GAME_0.pkg"));

    let requests = server.join().unwrap();
    let request = &requests[0];
    assert!(request.starts_with("post /api/patch.php http/1.1"));
    assert!(request.contains("x-requested-with: xmlhttprequest"));
    assert!(request.contains(&format!("referer: {base_url}/cusa00001")));
    assert!(request.contains("content-type: application/x-www-form-urlencoded"));
    assert!(request.ends_with("\r\n\r\nkey=abc123"));
}

#[test]
fn lookup_retries_busy_catalog() {
    let page = r#"<h3 class="h3-title">Retry Game</h3>
        <div class="patch-container"><a class="main" data-version="01.00" data-key="k"></a></div>"#;
    let (base_url, server) = serve(vec![
        response("503 Service Unavailable", "busy"),
        response("200 OK", page),
    ]);
    let catalog = OrbisPatchesClient::new(client(), base_url);
    let title: TitleId = "CUSA00002".parse().unwrap();

    let listing = catalog.lookup(&title).unwrap();
    assert_eq!(listing.title, "Retry Game");
    assert_eq!(listing.entry(1).unwrap().key, "k");

    let requests = server.join().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].starts_with("get /cusa00002 http/1.1"));
}

#[test]
fn lookup_of_unknown_title_is_not_found() {
    let (base_url, server) = serve(vec![response("404 Not Found", "")]);
    let catalog = OrbisPatchesClient::new(client(), base_url);
    let title: TitleId = "CUSA99999".parse().unwrap();

    assert_matches!(catalog.lookup(&title), Err(PkgError::LookupNotFound(id)) => {
        assert_eq!(id, "CUSA99999");
    });
    server.join().unwrap();
}

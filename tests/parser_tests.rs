use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderValue};
use ipnet::IpNet;
use serde_json::json;

use formrelay::submission::metadata::{client_ip, extract};
use formrelay::submission::parser::{parse_body, parse_multipart};

// ── Bodies ──────────────────────────────────────────────────────

#[test]
fn urlencoded_names_nest_and_collect() {
    let body = b"fields%5BfirstName%5D=Ada&fields%5Bcolours%5D%5B%5D=red&fields%5Bcolours%5D%5B%5D=blue\
&fields%5Baddress%5D%5Bcity%5D=Hobart&g-recaptcha-response=tok";
    let values = parse_body(Some("application/x-www-form-urlencoded"), body).unwrap();

    assert_eq!(
        values,
        json!({
            "firstName": "Ada",
            "colours": ["red", "blue"],
            "address": { "city": "Hobart" },
            "g-recaptcha-response": "tok",
        })
    );
}

#[test]
fn repeated_plain_names_become_lists() {
    let values = parse_body(Some("application/x-www-form-urlencoded"), b"tag=a&tag=b&single=x").unwrap();
    assert_eq!(values, json!({ "tag": ["a", "b"], "single": "x" }));
}

#[test]
fn json_bodies_must_be_objects() {
    assert_eq!(
        parse_body(Some("application/json"), br#"{"fields":{"email":"a@b.c"},"email":"ignored"}"#).unwrap(),
        json!({ "email": "ignored" })
    );
    assert_eq!(
        parse_body(None, b"[1,2]").unwrap_err(),
        "Submission body must be an object"
    );
    assert!(parse_body(Some("application/json"), b"{").unwrap_err().starts_with("Invalid JSON"));
}

#[test]
fn unknown_content_type_falls_back() {
    assert_eq!(parse_body(Some("text/plain"), br#"{"a":"1"}"#).unwrap(), json!({ "a": "1" }));
    assert_eq!(parse_body(Some("text/plain"), b"a=1").unwrap(), json!({ "a": "1" }));
}

#[tokio::test]
async fn multipart_records_files_without_content() {
    let boundary = "XBOUNDARY";
    let body = format!(
        "--{boundary}\r\n\
Content-Disposition: form-data; name=\"fields[email]\"\r\n\r\n\
ada@example.com\r\n\
--{boundary}\r\n\
Content-Disposition: form-data; name=\"fields[cv]\"; filename=\"cv.pdf\"\r\n\
Content-Type: application/pdf\r\n\r\n\
%PDF-1.4\r\n\
--{boundary}--\r\n"
    );
    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}")).unwrap(),
    );

    let values = parse_multipart(&headers, bytes::Bytes::from(body)).await.unwrap();
    assert_eq!(values["email"], "ada@example.com");
    assert_eq!(values["cv"]["filename"], "cv.pdf");
    assert_eq!(values["cv"]["content_type"], "application/pdf");
    assert_eq!(values["cv"]["size"], 8);

    let err = parse_multipart(&HeaderMap::new(), bytes::Bytes::new()).await.unwrap_err();
    assert_eq!(err, "Missing multipart boundary");
}

// ── Client address ──────────────────────────────────────────────

fn forwarded(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
    headers
}

#[test]
fn forwarded_for_is_only_trusted_from_proxies() {
    let proxies: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap()];
    let proxy: IpAddr = "10.1.2.3".parse().unwrap();
    let stranger: IpAddr = "198.51.100.7".parse().unwrap();
    let headers = forwarded("203.0.113.9, 10.0.0.5");

    assert_eq!(client_ip(&headers, Some(proxy), &proxies), "203.0.113.9".parse::<IpAddr>().unwrap());
    assert_eq!(client_ip(&headers, Some(stranger), &proxies), stranger);
    assert_eq!(client_ip(&headers, Some(proxy), &[]), proxy);
    assert_eq!(client_ip(&forwarded("garbage"), Some(proxy), &proxies), proxy);
}

#[test]
fn metadata_captures_request_details() {
    let mut headers = forwarded("203.0.113.9");
    headers.insert("user-agent", HeaderValue::from_static("tests/1.0"));
    headers.insert("referer", HeaderValue::from_static("https://example.com/contact"));

    let meta = extract(&headers, Some("192.0.2.1".parse().unwrap()), &[]);
    assert_eq!(
        meta.to_json(),
        json!({ "ip": "192.0.2.1", "user_agent": "tests/1.0", "referer": "https://example.com/contact" })
    );
}

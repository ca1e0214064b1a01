mod common;

use std::time::{Duration, Instant};

use anyhow::Result;
use boarding_gateway::auth::Role;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn paths_are_rewritten_per_service() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[]).await?;
    let token = common::token("7", "ops@example.com", Role::Admin);

    let cases = [
        ("/users/42?include=projects", "/api/users/42", Some("include=projects")),
        ("/clients", "/api/clients", None),
        ("/projects/9/members", "/api/projects/9/members", None),
        ("/ia/chat/completions", "/chat/completions", None),
        ("/ia", "/", None),
    ];

    for (request_path, expected_path, expected_query) in cases {
        let res = gateway
            .client
            .get(gateway.url(request_path))
            .bearer_auth(&token)
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK, "{}", request_path);

        let seen = upstream.last();
        assert_eq!(seen.path, expected_path, "{}", request_path);
        assert_eq!(seen.query.as_deref(), expected_query, "{}", request_path);
    }
    Ok(())
}

#[tokio::test]
async fn upstream_response_is_relayed() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[]).await?;
    upstream.respond_with(StatusCode::CREATED);

    let res = gateway
        .client
        .delete(gateway.url("/clients/3"))
        .bearer_auth(common::token("7", "ops@example.com", Role::Admin))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(common::header(res.headers(), "x-upstream"), Some("mock"));

    let body: Value = res.json().await?;
    assert_eq!(body["method"], "DELETE");
    assert_eq!(body["path"], "/api/clients/3");
    Ok(())
}

#[tokio::test]
async fn spoofed_trust_headers_are_replaced() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[]).await?;

    gateway
        .client
        .get(gateway.url("/users/me"))
        .bearer_auth(common::token("42", "ana@example.com", Role::User))
        .header("x-user-id", "1")
        .header("x-user-role", "ADMIN")
        .send()
        .await?;

    let seen = upstream.last();
    assert_eq!(common::header(&seen.headers, "x-user-id"), Some("42"));
    assert_eq!(common::header(&seen.headers, "x-user-role"), Some("USER"));
    assert_eq!(seen.headers.get_all("x-user-id").iter().count(), 1);

    // Public routes never carry identity, even a forged one
    gateway
        .client
        .post(gateway.url("/auth/register"))
        .header("x-user-id", "1")
        .header("x-user-email", "root@example.com")
        .json(&json!({"email": "new@example.com"}))
        .send()
        .await?;

    let seen = upstream.last();
    assert!(!seen.headers.contains_key("x-user-id"));
    assert!(!seen.headers.contains_key("x-user-email"));
    Ok(())
}

#[tokio::test]
async fn json_bodies_are_reencoded_with_exact_length() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[]).await?;
    let payload = json!({"name": "Apollo", "budget": 1200, "tags": ["a", "b"]});

    let res = gateway
        .client
        .post(gateway.url("/projects"))
        .bearer_auth(common::token("7", "ops@example.com", Role::ClientAdmin))
        .header("content-type", "application/json")
        // Whitespace the gateway is free to drop
        .body(serde_json::to_string_pretty(&payload)?)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let seen = upstream.last();
    let forwarded: Value = serde_json::from_slice(&seen.body)?;
    assert_eq!(forwarded, payload);
    assert_eq!(
        common::header(&seen.headers, "content-length"),
        Some(seen.body.len().to_string().as_str())
    );
    Ok(())
}

#[tokio::test]
async fn non_json_bodies_pass_through() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[]).await?;

    gateway
        .client
        .put(gateway.url("/ia/upload"))
        .bearer_auth(common::token("7", "ops@example.com", Role::User))
        .header("content-type", "text/plain")
        .body("raw text body")
        .send()
        .await?;

    let seen = upstream.last();
    assert_eq!(&seen.body[..], b"raw text body");
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_rejected_locally() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[]).await?;

    let res = gateway
        .client
        .post(gateway.url("/users"))
        .bearer_auth(common::token("7", "ops@example.com", Role::Admin))
        .header("content-type", "application/json")
        .body("{\"name\": ")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body: Value = res.json().await?;
    assert_eq!(body["code"], "INVALID_JSON");
    // Development explains the parse failure
    assert!(body["error"].is_string());
    assert!(upstream.hits().is_empty());
    Ok(())
}

#[tokio::test]
async fn json_parse_detail_hidden_outside_development() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[("NODE_ENV", "staging")]).await?;

    let res = gateway
        .client
        .post(gateway.url("/users"))
        .bearer_auth(common::token("7", "ops@example.com", Role::Admin))
        .header("content-type", "application/json")
        .body("{\"name\": ")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body: Value = res.json().await?;
    assert_eq!(body["code"], "INVALID_JSON");
    assert!(body.get("error").is_none());
    assert!(upstream.hits().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_prefix_is_not_found() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[]).await?;

    for path in ["/nope", "/usersettings", "/api/users"] {
        let res = gateway.client.get(gateway.url(path)).send().await?;
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{}", path);

        let body: Value = res.json().await?;
        assert_eq!(body["code"], "ROUTE_NOT_FOUND");
    }
    assert!(upstream.hits().is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_service_maps_to_bad_gateway() -> Result<()> {
    let closed = portpicker::pick_unused_port().expect("free port");
    let users_url = format!("http://127.0.0.1:{}", closed);
    let (_upstream, gateway) = common::ensure_stack(&[("USERS_SERVICE_URL", users_url.as_str())]).await?;

    let res = gateway
        .client
        .get(gateway.url("/users"))
        .bearer_auth(common::token("7", "ops@example.com", Role::Admin))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let body: Value = res.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "users service is currently unavailable");
    assert_eq!(body["code"], "UPSTREAM_UNREACHABLE");
    // Development builds explain the failure
    assert!(body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn failure_detail_hidden_outside_development() -> Result<()> {
    let closed = portpicker::pick_unused_port().expect("free port");
    let ia_url = format!("http://127.0.0.1:{}", closed);
    let (_upstream, gateway) = common::ensure_stack(&[
        ("NODE_ENV", "staging"),
        ("IA_SERVICE_URL", ia_url.as_str()),
    ])
    .await?;

    let res = gateway
        .client
        .get(gateway.url("/ia/chat"))
        .bearer_auth(common::token("7", "ops@example.com", Role::Admin))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let body: Value = res.json().await?;
    assert_eq!(body["message"], "ia service is currently unavailable");
    assert!(body.get("error").is_none());
    Ok(())
}

#[tokio::test]
async fn slow_service_maps_to_upstream_timeout() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[("UPSTREAM_TIMEOUT_MS", "200")]).await?;
    upstream.respond_after(Duration::from_secs(3));

    let started = Instant::now();
    let res = gateway
        .client
        .get(gateway.url("/ia/slow"))
        .bearer_auth(common::token("7", "ops@example.com", Role::User))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(started.elapsed() < Duration::from_secs(3));

    let body: Value = res.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "ia service is currently unavailable");
    assert_eq!(body["code"], "UPSTREAM_TIMEOUT");
    assert!(body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn upgraded_connections_are_bridged() -> Result<()> {
    let (upstream, gateway) = common::ensure_stack(&[]).await?;
    let token = common::token("7", "ops@example.com", Role::User);

    let mut stream = TcpStream::connect(gateway.addr).await?;
    stream
        .write_all(
            format!(
                "GET /ia/stream HTTP/1.1\r\nHost: gateway\r\nConnection: Upgrade\r\nUpgrade: echo\r\nAuthorization: Bearer {}\r\n\r\n",
                token
            )
            .as_bytes(),
        )
        .await?;

    let mut head = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await?;
            head.push(byte[0]);
        }
        Ok::<_, std::io::Error>(())
    })
    .await??;

    let head = String::from_utf8_lossy(&head).to_ascii_lowercase();
    assert!(head.starts_with("http/1.1 101"), "{}", head);
    assert!(head.contains("upgrade: echo"), "{}", head);

    // Bytes now flow both ways through the gateway
    for message in [&b"ping"[..], &b"second frame"[..]] {
        stream.write_all(message).await?;
        let mut echoed = vec![0u8; message.len()];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut echoed)).await??;
        assert_eq!(echoed, message);
    }

    let seen = upstream.last();
    assert_eq!(seen.path, "/stream");
    assert_eq!(common::header(&seen.headers, "x-user-id"), Some("7"));
    Ok(())
}

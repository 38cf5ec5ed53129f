use helpdesk::config::{AssistantConfig, Config};
use helpdesk::server::{router, AppState};
use serde_json::{json, Value};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("helpdesk.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Assistant settings pointing at `proxy_url` with the given credentials
#[allow(dead_code)]
pub fn assistant_config(proxy_url: &str, primary: Option<&str>, backup: Option<&str>) -> AssistantConfig {
    AssistantConfig {
        proxy_url: proxy_url.to_string(),
        api_key: primary.map(String::from),
        backup_api_key: backup.map(String::from),
        ..Default::default()
    }
}

/// Buffered completion body with a single choice
#[allow(dead_code)]
pub fn completion_json(content: &str) -> Value {
    json!({
        "id": "gen-test",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

/// Event-stream body carrying `fragments` and the closing sentinel
#[allow(dead_code)]
pub fn sse_text(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": fragment}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Start the HTTP service on an ephemeral port
///
/// Completions are forwarded to `api_base`; uploads land under
/// `public_dir`.
#[allow(dead_code)]
pub async fn spawn_service(api_base: &str, public_dir: &Path) -> SocketAddr {
    let mut config = Config::default();
    config.provider.api_base = api_base.to_string();
    config.server.public_dir = public_dir.to_path_buf();
    let state = AppState::new(&config).expect("failed to build service state");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().expect("listener has no address");
    tokio::spawn(async move {
        axum::serve(listener, router(state))
            .await
            .expect("service stopped unexpectedly");
    });
    addr
}

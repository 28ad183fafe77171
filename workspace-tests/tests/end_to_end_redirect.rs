use redir_agent::{serve, Agent};
use redir_core::{
    Command, GatewayConfig, LocalEngine, Reply, SqliteStorage, StateGateway, StorageConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use workspace_tests::{wildcard_rule, RecordingEngine};

async fn sqlite_agent(database_url: &str) -> (Agent, Arc<LocalEngine>) {
    let storage = SqliteStorage::connect(&StorageConfig {
        database_url: database_url.to_string(),
        max_connections: 1,
    })
    .await
    .unwrap();
    let engine = Arc::new(LocalEngine::new());
    let gateway = StateGateway::new(Arc::new(storage), engine.clone(), GatewayConfig::default());
    let agent = Agent::new(gateway, engine.clone());
    agent.start().await.unwrap();
    (agent, engine)
}

async fn run_lines(agent: &Agent, lines: &[Value]) -> Vec<Value> {
    let input: String = lines.iter().map(|line| format!("{}\n", line)).collect();
    let mut output = Vec::new();
    serve(agent, input.as_bytes(), &mut output).await.unwrap();

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_end_to_end_redirect_flow() {
    let _ = tracing_subscriber::fmt::try_init();

    let temp_dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}", temp_dir.path().join("redir.db").to_string_lossy());

    // 1. Configure and activate two rules
    let (agent, engine) = sqlite_agent(&db_url).await;
    let replies = run_lines(
        &agent,
        &[
            json!({"type": "saveRule", "rule": {
                "tag": "api", "from": "||api.example.com/v1/", "to": "http://localhost:3000/mock",
                "type": "wildcard", "resourceTypes": ["xmlhttprequest"]
            }}),
            json!({"type": "saveRule", "rule": {
                "tag": "bundle", "from": "^https://cdn\\.example\\.com/(.+)\\.min\\.js$",
                "to": "http://localhost:8080/\\1.js", "type": "regex", "resourceTypes": ["script"]
            }}),
            json!({"type": "activate"}),
            json!({"observe": {"requestId": "10", "url": "https://cdn.example.com/app.min.js", "method": "get", "type": "script"}}),
            json!({"observe": {"requestId": "11", "url": "https://www.api.example.com/v1/users", "method": "post", "type": "xmlhttprequest"}}),
            json!({"observe": {"requestId": "12", "url": "https://cdn.example.com/app.min.js", "method": "get", "type": "image"}}),
        ],
    )
    .await;

    assert_eq!(replies[0], json!({"ok": true, "id": 1}));
    assert_eq!(replies[1], json!({"ok": true, "id": 2}));
    assert_eq!(replies[2], json!({"ok": true}));
    assert_eq!(
        replies[3]["redirect"],
        json!({"ruleId": 2, "url": "http://localhost:8080/app.js"})
    );
    assert_eq!(
        replies[4]["redirect"],
        json!({"ruleId": 1, "url": "http://localhost:3000/mock"})
    );
    assert_eq!(replies[5]["redirect"], Value::Null);
    assert_eq!(engine.rule_ids().await, vec![1, 2]);

    // 2. A restarted agent restores the active rules and the log
    drop(agent);
    let (agent, engine) = sqlite_agent(&db_url).await;
    assert_eq!(engine.rule_ids().await, vec![1, 2]);

    let replies = run_lines(&agent, &[json!({"type": "init"})]).await;
    let state = &replies[0]["state"];
    assert_eq!(state["rules"]["order"], json!([2, 1]));
    assert_eq!(state["rules"]["active"], json!([2, 1]));
    let logged: Vec<_> = state["requests"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["request"]["requestId"].clone())
        .collect();
    assert_eq!(logged, vec![json!("11"), json!("10")]);
    assert_eq!(state["requests"]["items"][0]["rule"]["tag"], json!("api"));

    // 3. Disabling removes the redirect
    let replies = run_lines(
        &agent,
        &[
            json!({"type": "disableRules", "ids": [2]}),
            json!({"observe": {"requestId": "13", "url": "https://cdn.example.com/app.min.js", "method": "get", "type": "script"}}),
        ],
    )
    .await;
    assert_eq!(replies[1]["redirect"], Value::Null);
    assert_eq!(engine.rule_ids().await, vec![1]);
}

#[tokio::test]
async fn test_invalid_regex_is_rejected_without_persisting() {
    let (agent, engine) = sqlite_agent("sqlite::memory:").await;

    let replies = run_lines(
        &agent,
        &[
            json!({"type": "saveRule", "rule": {
                "tag": "broken", "from": "(unclosed", "to": "http://x", "type": "regex",
                "resourceTypes": ["script"]
            }}),
            json!({"type": "enableRules", "ids": [1]}),
            json!({"type": "init"}),
        ],
    )
    .await;

    assert_eq!(replies[0], json!({"ok": true, "id": 1}));
    assert_eq!(replies[1]["ok"], json!(false));
    assert!(replies[1]["error"].as_str().unwrap().contains("invalid regex"));
    assert_eq!(replies[2]["state"]["rules"]["active"], json!([]));
    assert!(engine.rule_ids().await.is_empty());
}

#[tokio::test]
async fn test_gateway_with_recording_engine_over_sqlite() {
    let temp_dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::connect(&StorageConfig {
        database_url: format!("sqlite://{}", temp_dir.path().join("rec.db").to_string_lossy()),
        max_connections: 1,
    })
    .await
    .unwrap();
    let engine = Arc::new(RecordingEngine::default());
    let gateway = StateGateway::new(Arc::new(storage), engine.clone(), GatewayConfig::default());

    for tag in ["A", "B"] {
        let reply = gateway
            .handle(Command::SaveRule {
                rule_id: None,
                rule: wildcard_rule(tag, "http://a", "http://b"),
            })
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Created { .. }));
    }
    gateway.handle(Command::EnableRules { ids: vec![1, 2] }).await.unwrap();
    gateway.handle(Command::DisableRules { ids: vec![1] }).await.unwrap();

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].added_ids(), vec![1, 2]);
    assert_eq!(calls[1].remove_rule_ids, vec![1]);
    assert_eq!(gateway.snapshot().await.unwrap().rules.active, vec![2]);
}

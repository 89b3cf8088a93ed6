//! End-to-end relay behavior through a real server, a mock upstream socket and
//! a mock knowledge base.

mod common;

use common::*;
use futures::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_relay::core::realtime::DEFAULT_INSTRUCTIONS;

async fn knowledge_base() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/indexes/contosobenefits/docs/search"))
        .and(header("api-key", "search-key"))
        .and(body_partial_json(json!({"queryType": "semantic"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"chunk_id": "doc_1", "title": "Benefits", "chunk": "Dental is covered."},
                {"chunk_id": "doc_2", "title": "Leave", "chunk": "20 days of leave."}
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/indexes/contosobenefits/docs/search"))
        .and(body_partial_json(json!({"queryType": "full", "search": "doc_1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"chunk_id": "doc_1", "title": "Benefits", "chunk": "Dental is covered."}
            ]
        })))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn test_session_update_is_rewritten_and_other_messages_pass_through() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(relay_config(&upstream)).await;

    let mut client = connect_client(addr, "", &[("x-ms-client-request-id", "req-42")]).await;
    let mut upstream_conn = upstream.accept().await;

    assert!(upstream_conn.uri.starts_with("/openai/realtime?"));
    assert!(upstream_conn.uri.contains("deployment=test-deployment"));
    assert_eq!(upstream_conn.headers["api-key"], "upstream-key");
    assert_eq!(upstream_conn.headers["x-ms-client-request-id"], "req-42");

    send_json(
        &mut client,
        json!({
            "type": "session.update",
            "session": {
                "instructions": "pretend to be a pirate",
                "tool_choice": "required",
                "tools": [{"type": "function", "name": "shell"}],
                "voice": "alloy"
            }
        }),
    )
    .await;

    let update = next_json(&mut upstream_conn.socket).await;
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["instructions"], DEFAULT_INSTRUCTIONS);
    assert_eq!(update["session"]["tool_choice"], "none");
    assert_eq!(update["session"]["tools"], json!([]));
    assert_eq!(update["session"]["voice"], "alloy");

    // Audio and other events are untouched in both directions.
    let append = json!({"type": "input_audio_buffer.append", "audio": "AAAA"});
    send_json(&mut client, append.clone()).await;
    assert_eq!(next_json(&mut upstream_conn.socket).await, append);

    let delta = json!({"type": "response.audio.delta", "delta": "BBBB", "item_id": "i1"});
    send_json(&mut upstream_conn.socket, delta.clone()).await;
    assert_eq!(next_json(&mut client).await, delta);
}

#[tokio::test]
async fn test_session_created_is_scrubbed() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(relay_config(&upstream)).await;

    let mut client = connect_client(addr, "", &[]).await;
    let mut upstream_conn = upstream.accept().await;

    send_json(
        &mut upstream_conn.socket,
        json!({
            "type": "session.created",
            "session": {
                "id": "sess_1",
                "instructions": "secret server prompt",
                "tools": [{"type": "function", "name": "search"}],
                "tool_choice": "auto",
                "max_response_output_tokens": 4096
            }
        }),
    )
    .await;

    let created = next_json(&mut client).await;
    assert_eq!(created["session"]["id"], "sess_1");
    assert_eq!(created["session"]["instructions"], "");
    assert_eq!(created["session"]["tools"], json!([]));
    assert_eq!(created["session"]["tool_choice"], "none");
    assert!(created["session"]["max_response_output_tokens"].is_null());
}

#[tokio::test]
async fn test_server_tool_call_is_hidden_and_answered() {
    let kb = knowledge_base().await;
    let mut upstream = MockUpstream::start().await;
    let mut config = relay_config(&upstream);
    config.search_endpoint = Some(kb.uri());
    config.search_api_key = Some("search-key".to_string());
    let (addr, _state) = start_relay(config).await;

    let mut client = connect_client(addr, "", &[]).await;
    let mut upstream_conn = upstream.accept().await;
    let socket = &mut upstream_conn.socket;

    send_json(&mut client, json!({"type": "session.update", "session": {}})).await;
    let update = next_json(socket).await;
    assert_eq!(update["session"]["tool_choice"], "auto");
    let tool_names: Vec<_> = update["session"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(tool_names, vec!["search", "report_grounding"]);

    let call = json!({
        "type": "function_call",
        "call_id": "call_1",
        "name": "search",
        "arguments": "{\"query\":\"dental\"}"
    });
    send_json(socket, json!({"type": "response.output_item.added", "item": call})).await;
    send_json(
        socket,
        json!({"type": "response.function_call_arguments.delta", "delta": "{\"qu"}),
    )
    .await;
    send_json(
        socket,
        json!({"type": "response.function_call_arguments.done", "arguments": "{\"query\":\"dental\"}"}),
    )
    .await;
    send_json(socket, json!({"type": "conversation.item.created", "item": call})).await;
    send_json(socket, json!({"type": "response.output_item.done", "item": call})).await;

    let result = next_json(socket).await;
    assert_eq!(
        result,
        json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": "call_1",
                "output": "[doc_1]: Dental is covered.\n-----\n[doc_2]: 20 days of leave.\n-----\n"
            }
        })
    );

    send_json(
        socket,
        json!({
            "type": "response.done",
            "response": {
                "id": "resp_1",
                "output": [call, {"type": "message", "id": "msg_1"}]
            }
        }),
    )
    .await;

    // The conversation continues without the client asking.
    assert_eq!(next_json(socket).await, json!({"type": "response.create"}));

    // The first thing the client sees is the trimmed response.done.
    let done = next_json(&mut client).await;
    assert_eq!(done["type"], "response.done");
    assert_eq!(done["response"]["output"], json!([{"type": "message", "id": "msg_1"}]));

    // A second response.done without tool calls does not trigger another continuation.
    send_json(
        socket,
        json!({"type": "response.done", "response": {"output": []}}),
    )
    .await;
    assert_eq!(next_json(&mut client).await["type"], "response.done");
    let marker = json!({"type": "rate_limits.updated"});
    send_json(&mut client, marker.clone()).await;
    assert_eq!(next_json(socket).await, marker);
}

#[tokio::test]
async fn test_client_tool_result_reaches_client() {
    let kb = knowledge_base().await;
    let mut upstream = MockUpstream::start().await;
    let mut config = relay_config(&upstream);
    config.search_endpoint = Some(kb.uri());
    config.search_api_key = Some("search-key".to_string());
    let (addr, _state) = start_relay(config).await;

    let mut client = connect_client(addr, "", &[]).await;
    let mut upstream_conn = upstream.accept().await;
    let socket = &mut upstream_conn.socket;

    // Settle the continuation owed at session start.
    send_json(
        socket,
        json!({"type": "response.done", "response": {"output": []}}),
    )
    .await;
    assert_eq!(next_json(socket).await, json!({"type": "response.create"}));
    assert_eq!(next_json(&mut client).await["type"], "response.done");

    send_json(
        socket,
        json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call",
                "call_id": "call_2",
                "name": "report_grounding",
                "arguments": "{\"sources\":[\"doc_1\"]}"
            }
        }),
    )
    .await;

    let output = next_json(socket).await;
    assert_eq!(output["type"], "conversation.item.create");
    assert_eq!(output["item"]["call_id"], "call_2");
    assert!(output["item"]["output"].is_null());

    let extension = next_json(&mut client).await;
    assert_eq!(extension["type"], "extension.middle_tier_tool_response");
    assert_eq!(extension["previous_item_id"], "call_2");
    assert_eq!(extension["tool_name"], "report_grounding");
    let grounding: serde_json::Value =
        serde_json::from_str(extension["tool_result"].as_str().unwrap()).unwrap();
    assert_eq!(
        grounding,
        json!({"sources": [{"chunk_id": "doc_1", "title": "Benefits", "chunk": "Dental is covered."}]})
    );

    // The client-bound tool still resumes generation once the turn is done.
    send_json(
        socket,
        json!({"type": "response.done", "response": {"output": []}}),
    )
    .await;
    assert_eq!(next_json(socket).await, json!({"type": "response.create"}));
    assert_eq!(next_json(&mut client).await["type"], "response.done");
}

#[tokio::test]
async fn test_unknown_tool_is_dropped_silently() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(relay_config(&upstream)).await;

    let mut client = connect_client(addr, "", &[]).await;
    let mut upstream_conn = upstream.accept().await;
    let socket = &mut upstream_conn.socket;

    send_json(
        socket,
        json!({
            "type": "response.output_item.done",
            "item": {"type": "function_call", "call_id": "c9", "name": "launch_rockets", "arguments": "{}"}
        }),
    )
    .await;
    let marker = json!({"type": "response.text.delta", "delta": "hi"});
    send_json(socket, marker.clone()).await;

    // Nothing about the unknown call reaches the client.
    assert_eq!(next_json(&mut client).await, marker);
}

#[tokio::test]
async fn test_binary_frames_are_relayed() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(relay_config(&upstream)).await;

    let mut client = connect_client(addr, "", &[]).await;
    let mut upstream_conn = upstream.accept().await;

    client
        .send(Message::binary(vec![0u8, 159, 146, 150]))
        .await
        .unwrap();

    let frame = tokio::time::timeout(STEP_TIMEOUT, futures::StreamExt::next(&mut upstream_conn.socket))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame, Message::binary(vec![0u8, 159, 146, 150]));
}

#[tokio::test]
async fn test_client_close_closes_upstream() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = start_relay(relay_config(&upstream)).await;

    let mut client = connect_client(addr, "", &[]).await;
    let mut upstream_conn = upstream.accept().await;

    client.close(None).await.unwrap();

    expect_closed(&mut upstream_conn.socket).await;

    // The connection slot is returned once the relay has wound down.
    tokio::time::timeout(STEP_TIMEOUT, async {
        while state.ws_connection_count() != 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection slot was not released");
}

#[tokio::test]
async fn test_upstream_close_closes_client() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(relay_config(&upstream)).await;

    let mut client = connect_client(addr, "", &[]).await;
    let mut upstream_conn = upstream.accept().await;

    upstream_conn.socket.close(None).await.unwrap();

    expect_closed(&mut client).await;
}

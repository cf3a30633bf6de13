//! End-to-end coverage of the Homebase Link against a mock remote endpoint
//! (spec.md §8): datapoint mapping, dedupe, chunk reassembly,
//! request/response correlation, and reconnect.

use std::sync::Arc;
use std::time::Duration;

use fleet_gateway::broadcast::Broadcaster;
use fleet_gateway::cache::StatusCache;
use fleet_gateway::config::GatewayConfig;
use fleet_gateway::homebase::{self, LinkContext, RequestOutcome};
use fleet_gateway::repo::status_writer::LoggingStatusWriter;
use gateway_protocol::BrowserEvent;
use gateway_test_support::MockHomebaseServer;

fn test_ctx() -> LinkContext {
    LinkContext {
        cache: StatusCache::new(),
        broadcaster: Broadcaster::new(),
        status_writer: Arc::new(LoggingStatusWriter),
        config: Arc::new(GatewayConfig::default()),
    }
}

async fn recv_status_change(rx: &mut tokio::sync::broadcast::Receiver<BrowserEvent>) -> gateway_protocol::StatusEntry {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a status change")
            .unwrap()
        {
            BrowserEvent::StatusChange { data } => return data,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn simple_datapoint_maps_to_a_status_change() {
    let server = MockHomebaseServer::start().await.unwrap();
    let ctx = test_ctx();
    let mut rx = ctx.broadcaster.subscribe();
    let address = format!("127.0.0.1:{}", server.local_addr().port());
    let _handle = homebase::spawn(address, ctx.clone());

    // Connect synthesizes `ess/connected=1` before anything else.
    let first = recv_status_change(&mut rx).await;
    assert_eq!(first.entry_type, "connected");
    assert_eq!(first.value, "1");

    server.push_datapoint("ess/subject", "sally").await;
    let entry = recv_status_change(&mut rx).await;
    assert_eq!(entry.source, "ess");
    assert_eq!(entry.entry_type, "subject");
    assert_eq!(entry.value, "sally");
}

#[tokio::test]
async fn duplicate_datapoint_is_suppressed() {
    let server = MockHomebaseServer::start().await.unwrap();
    let ctx = test_ctx();
    let mut rx = ctx.broadcaster.subscribe();
    let address = format!("127.0.0.1:{}", server.local_addr().port());
    let _handle = homebase::spawn(address, ctx.clone());

    recv_status_change(&mut rx).await; // ess/connected=1

    server.push_datapoint("ess/running", "1").await;
    let first = recv_status_change(&mut rx).await;
    assert_eq!(first.value, "1");

    server.push_datapoint("ess/running", "1").await;
    // The repeat must not produce a second StatusChange; the next thing on
    // the bus (if anything arrives within the window) must not also say
    // "running"="1" again for the same host.
    server.push_datapoint("ess/running", "2").await;
    let next = recv_status_change(&mut rx).await;
    assert_eq!(next.value, "2", "the duplicate in between should have been dropped silently");
}

#[tokio::test]
async fn git_and_obs_datapoints_map_per_the_translation_table() {
    let server = MockHomebaseServer::start().await.unwrap();
    let ctx = test_ctx();
    let mut rx = ctx.broadcaster.subscribe();
    let address = format!("127.0.0.1:{}", server.local_addr().port());
    let _handle = homebase::spawn(address, ctx.clone());

    recv_status_change(&mut rx).await; // ess/connected=1

    server.push_datapoint("ess/git/branch", "main").await;
    let git_entry = recv_status_change(&mut rx).await;
    assert_eq!(git_entry.source, "git");
    assert_eq!(git_entry.entry_type, "branch");
    assert_eq!(git_entry.value, "main");

    server.push_datapoint("ess/obs_active", "1").await;
    let obs_entry = recv_status_change(&mut rx).await;
    assert_eq!(obs_entry.source, "ess");
    assert_eq!(obs_entry.entry_type, "in_obs");
    assert_eq!(obs_entry.value, "1");
}

#[tokio::test]
async fn chunked_message_reassembles_into_a_datapoint() {
    let server = MockHomebaseServer::start().await.unwrap();
    let ctx = test_ctx();
    let mut rx = ctx.broadcaster.subscribe();
    let address = format!("127.0.0.1:{}", server.local_addr().port());
    let _handle = homebase::spawn(address, ctx.clone());

    recv_status_change(&mut rx).await; // ess/connected=1

    let payload = serde_json::json!({
        "type": "datapoint",
        "name": "ess/subject",
        "data": "carl",
    })
    .to_string();
    let (first_half, second_half) = payload.split_at(payload.len() / 2);
    server.push_chunked("msg-1", &[first_half, second_half]).await;

    let entry = recv_status_change(&mut rx).await;
    assert_eq!(entry.entry_type, "subject");
    assert_eq!(entry.value, "carl");
}

#[tokio::test]
async fn eval_request_resolves_and_failed_eval_broadcasts_tcl_error() {
    let server = MockHomebaseServer::start().await.unwrap();
    let ctx = test_ctx();
    let mut rx = ctx.broadcaster.subscribe();
    let address = format!("127.0.0.1:{}", server.local_addr().port());
    let handle = homebase::spawn(address, ctx.clone());

    recv_status_change(&mut rx).await; // ess/connected=1

    let eval_task = tokio::spawn({
        let handle = handle.clone();
        async move { handle.eval("set x 1".to_owned(), Some(Duration::from_secs(5))).await }
    });

    // Wait for the eval frame to reach the mock server, then answer it.
    let request_id = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(frame) = server
                .received_frames()
                .into_iter()
                .find(|f| f.get("cmd").and_then(|v| v.as_str()) == Some("eval"))
            {
                return frame["requestId"].as_str().unwrap().to_owned();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("eval frame never arrived");

    server.respond_ok(&request_id, serde_json::json!("3.3")).await;
    let outcome = eval_task.await.unwrap();
    assert!(matches!(outcome, RequestOutcome::Ok(v) if v == serde_json::json!("3.3")));

    // A second, failing eval must broadcast a TCL_ERROR frame.
    let mut tcl_error_rx = ctx.broadcaster.subscribe();
    let handle2 = handle.clone();
    let eval_task2 = tokio::spawn(async move { handle2.eval("bad script".to_owned(), Some(Duration::from_secs(5))).await });

    let request_id2 = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(frame) = server
                .received_frames()
                .into_iter()
                .filter(|f| f.get("cmd").and_then(|v| v.as_str()) == Some("eval"))
                .next_back()
            {
                if frame["requestId"].as_str().unwrap() != request_id {
                    return frame["requestId"].as_str().unwrap().to_owned();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second eval frame never arrived");

    server.respond_error(&request_id2, "bad script").await;
    let outcome2 = eval_task2.await.unwrap();
    assert!(matches!(outcome2, RequestOutcome::Error(ref e) if e == "bad script"));

    let tcl_error = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let BrowserEvent::TclError { data } = tcl_error_rx.recv().await.unwrap() {
                return data;
            }
        }
    })
    .await
    .expect("TCL_ERROR was never broadcast");
    assert_eq!(tcl_error, "bad script");
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resubscribes() {
    let server = MockHomebaseServer::start().await.unwrap();
    let ctx = test_ctx();
    let mut rx = ctx.broadcaster.subscribe();
    let address = format!("127.0.0.1:{}", server.local_addr().port());
    let _handle = homebase::spawn(address, ctx.clone());

    recv_status_change(&mut rx).await; // ess/connected=1 (first session)
    let frames_before = server.received_frames().len();
    assert!(frames_before > 0, "first session should have sent subscribe/touch frames");

    server.drop_connection().await;

    // Reconnect (fast-retry phase: 2-3s) re-opens the session and re-emits
    // ess/connected=1, along with a fresh round of subscribe/touch frames.
    let reconnected = tokio::time::timeout(Duration::from_secs(6), async {
        loop {
            if let BrowserEvent::StatusChange { data } = rx.recv().await.unwrap() {
                if data.entry_type == "connected" && data.value == "1" {
                    return data;
                }
            }
        }
    })
    .await
    .expect("link never reconnected");
    assert_eq!(reconnected.entry_type, "connected");
    assert_eq!(reconnected.value, "1");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        server.received_frames().len() > frames_before,
        "reconnect should have sent a new round of subscribe/touch frames"
    );
}

//! End-to-End Test Suite: Host Session over a Channel
//!
//! Drives a configured orchestrator the way an async editor host would:
//! configuration loaded from disk, outbound messages read from a tokio
//! channel and serialized to the wire format, source answers fed back in.

use ricecoder_autocomplete::*;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const CONFIG: &str = r#"
word_patterns:
  lisp: "[\\w\\-]+"
defaults:
  matcher: { name: prefix, ignore_case: true }
  sorter: alphanum
  filter: [dedup]
  complete_length: 2
  popup_limit: 5
"#;

fn load_config(dir: &TempDir) -> EngineConfig {
    let path = dir.path().join("autocomplete.yaml");
    std::fs::write(&path, CONFIG).expect("Failed to write config");
    ConfigLoader::load_from_path(&path).expect("Failed to load config")
}

async fn next_message(rx: &mut UnboundedReceiver<HostMessage>, method: &str) -> HostMessage {
    loop {
        let message = rx.recv().await.expect("channel closed");
        if message.method() == method {
            return message;
        }
    }
}

/// Full round trip: trigger, notify, answer, popup, accept
#[tokio::test]
async fn test_channel_session_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = load_config(&temp_dir);

    let (sink, mut rx) = ChannelSink::channel();
    let mut orchestrator = CompletionOrchestrator::new(config, sink).expect("orchestrator");

    let mut source = SourceDescriptor::new("words", 5);
    source.mark = "w".to_string();
    source.on_completed = true;

    let bundle = EventBundle::new(Context::new(3, "(defun my-fu", "lisp").with_tick(1))
        .with_lines(["", "", "(defun my-fu"])
        .with_source(source);

    orchestrator.on_complete(bundle.clone(), false);

    let notifies = match next_message(&mut rx, "notify_complete").await {
        HostMessage::NotifyComplete { notifies, .. } => notifies,
        other => panic!("unexpected message {:?}", other),
    };
    assert_eq!(notifies.len(), 1);
    let sctx = notifies[0].context.clone();
    assert_eq!(sctx.base, "my-fu");
    assert_eq!(sctx.start_column, 8);

    let answer = IncomingResult {
        context: sctx,
        start_column: 8,
        matches: ["my-func", "MY-FULL", "my-func", "other", "my-fun"]
            .iter()
            .map(|w| RawMatch::Word(w.to_string()))
            .collect(),
        refresh: false,
    };
    orchestrator.complete(&bundle, answer).expect("complete");

    // skip the empty popup sent with the trigger
    let mut popup = next_message(&mut rx, "update_matches").await;
    if let HostMessage::UpdateMatches { matches, .. } = &popup {
        if matches.is_empty() {
            popup = next_message(&mut rx, "update_matches").await;
        }
    }

    let wire: Value = serde_json::to_value(&popup).expect("serialize");
    assert_eq!(wire["method"], "update_matches");
    assert_eq!(wire["start_byte_column"], 8);
    let words: Vec<&str> = wire["matches"]
        .as_array()
        .expect("matches")
        .iter()
        .filter_map(|m| m["word"].as_str())
        .collect();
    assert_eq!(words, vec!["MY-FULL", "my-fun", "my-func"]);
    assert_eq!(wire["matches"][0]["menu"], "[w] ");

    let user_data = wire["matches"][2]["user_data"]
        .as_str()
        .expect("user_data")
        .to_string();
    let accepted = EventBundle::new(Context::new(3, "(defun my-func", "lisp").with_tick(2))
        .with_lines(["", "", "(defun my-func"])
        .with_source(bundle.sources["words"].clone());
    orchestrator.on_complete_done(
        &accepted,
        CompletedItem {
            word: "my-func".to_string(),
            user_data,
            ..CompletedItem::default()
        },
    );

    match next_message(&mut rx, "notify_completed").await {
        HostMessage::NotifyCompleted {
            name,
            source_context,
            ..
        } => {
            assert_eq!(name, "words");
            assert_eq!(source_context.event, ContextEvent::Completed);
            assert_eq!(source_context.base, "my-func");
        }
        other => panic!("unexpected message {:?}", other),
    }
}

/// Warm-up requests go out without touching session state
#[tokio::test]
async fn test_channel_warmup() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let (sink, mut rx) = ChannelSink::channel();
    let mut orchestrator =
        CompletionOrchestrator::new(load_config(&temp_dir), sink).expect("orchestrator");

    let bundle = EventBundle::new(Context::new(1, "", "lisp"))
        .with_source(SourceDescriptor::new("words", 5))
        .with_source(SourceDescriptor::new("paths", 3));
    orchestrator.on_warmup(&bundle, &[]);

    match next_message(&mut rx, "warmup_sources").await {
        HostMessage::WarmupSources { warmups, .. } => {
            let names: Vec<&str> = warmups.iter().map(|w| w.name.as_str()).collect();
            assert_eq!(names, vec!["paths", "words"]);
        }
        other => panic!("unexpected message {:?}", other),
    }
    assert!(orchestrator.state().in_flight.is_empty());
    assert!(orchestrator.state().cache.is_empty());
}

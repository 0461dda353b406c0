// tests/property/ordering_test.rs

//! Property-based tests for per-session ordering
//! Responses come back in the order requests were queued, even when several
//! producers feed one session at once.

use crate::test_helpers::TestContext;
use lildb_gateway::core::protocol::{Request, Response};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_responses_follow_queue_order(
        batches in prop::collection::vec(
            prop::collection::vec("[A-Z]{1,6}( [a-z0-9]{1,8}){0,3}", 1..20),
            1..5
        ),
        queue_depth in 1usize..8
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::new();
            let session = ctx.sessions.open_stream(None);
            ctx.sessions.connect(&session, "db1").await.unwrap();

            let (tx, mut rx) = mpsc::unbounded_channel();
            let queue = Arc::new(ctx.dispatcher.spawn_worker(session.clone(), queue_depth, tx));

            let mut producers = Vec::new();
            for (producer, batch) in batches.iter().enumerate() {
                let queue = queue.clone();
                let batch = batch.clone();
                producers.push(tokio::spawn(async move {
                    let mut submitted = Vec::new();
                    for (i, command) in batch.into_iter().enumerate() {
                        let text = format!("{command} #{producer}.{i}");
                        let sequence = queue.submit(Request::command(text.clone())).await.unwrap();
                        submitted.push((sequence, text));
                    }
                    submitted
                }));
            }

            let mut by_sequence = HashMap::new();
            for producer in producers {
                for (sequence, text) in producer.await.unwrap() {
                    assert!(by_sequence.insert(sequence, text).is_none());
                }
            }

            let Ok(queue) = Arc::try_unwrap(queue) else {
                panic!("all producers have finished");
            };
            queue.finish().await;

            let mut next = 0u64;
            while let Some(response) = rx.recv().await {
                assert_eq!(response.sequence, next);
                let Response::Command(output) = response.item else {
                    panic!("only commands were queued");
                };
                assert_eq!(&output.output, &by_sequence[&next]);
                next += 1;
            }
            assert_eq!(next as usize, by_sequence.len());

            let executed: Vec<String> =
                ctx.driver.executed().into_iter().map(|c| c.command).collect();
            let expected: Vec<String> =
                (0..next).map(|s| by_sequence[&s].clone()).collect();
            assert_eq!(executed, expected);
        });
    }
}

// tests/property/registry_accounting_test.rs

//! Property-based tests for reference accounting
//! A connection exists exactly while some open session is bound to it.

use crate::test_helpers::TestContext;
use lildb_gateway::core::{ConnectError, ConnectOutcome, DisconnectError};
use proptest::prelude::*;

const ADDRESSES: [&str; 2] = ["10.0.0.5", "10.0.0.6"];
const SESSIONS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Connect(usize, usize),
    Disconnect(usize, usize),
    Close(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..SESSIONS, 0..ADDRESSES.len()).prop_map(|(s, a)| Op::Connect(s, a)),
        3 => (0..SESSIONS, 0..ADDRESSES.len()).prop_map(|(s, a)| Op::Disconnect(s, a)),
        1 => (0..SESSIONS).prop_map(Op::Close),
    ]
}

/// What the test expects each session to look like.
#[derive(Debug, Clone, PartialEq)]
enum Model {
    Unbound,
    Bound(usize),
    Closed,
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_ref_counts_follow_bound_sessions(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::new();
            let sessions: Vec<_> = (0..SESSIONS).map(|_| ctx.sessions.open_stream(None)).collect();
            let mut model = vec![Model::Unbound; SESSIONS];

            for op in &ops {
                match *op {
                    Op::Connect(s, a) => {
                        let result = ctx.sessions.connect(&sessions[s], ADDRESSES[a]).await;
                        match model[s].clone() {
                            Model::Closed => assert_eq!(result, Err(ConnectError::SessionTerminated)),
                            Model::Bound(current) if current == a => {
                                assert!(matches!(result, Ok(ConnectOutcome::AlreadyConnected(_))));
                            }
                            Model::Bound(current) => assert_eq!(
                                result,
                                Err(ConnectError::AlreadyBound(ADDRESSES[current].to_string()))
                            ),
                            Model::Unbound => {
                                assert!(matches!(result, Ok(ConnectOutcome::Connected(_))));
                                model[s] = Model::Bound(a);
                            }
                        }
                    }
                    Op::Disconnect(s, a) => {
                        let result = ctx.sessions.disconnect(&sessions[s], ADDRESSES[a]).await;
                        let anyone_bound = model.iter().any(|m| *m == Model::Bound(a));
                        match model[s].clone() {
                            Model::Closed => assert_eq!(result, Err(DisconnectError::SessionTerminated)),
                            _ if !anyone_bound => assert_eq!(result, Err(DisconnectError::NotFound)),
                            Model::Bound(current) if current == a => {
                                assert_eq!(result, Ok(()));
                                model[s] = Model::Unbound;
                            }
                            _ => assert_eq!(
                                result,
                                Err(DisconnectError::NotBound(ADDRESSES[a].to_string()))
                            ),
                        }
                    }
                    Op::Close(s) => {
                        let closed = ctx.sessions.close_stream(&sessions[s]).await;
                        assert_eq!(closed, model[s] != Model::Closed);
                        model[s] = Model::Closed;
                    }
                }

                for (a, address) in ADDRESSES.iter().enumerate() {
                    let bound = model.iter().filter(|m| **m == Model::Bound(a)).count();
                    let expected = (bound > 0).then_some(bound);
                    assert_eq!(ctx.registry.ref_count(address).await, expected);
                    assert_eq!(
                        ctx.driver.opens_for(address) - ctx.driver.closes_for(address),
                        usize::from(bound > 0)
                    );
                }
            }

            // Closing every stream leaves nothing behind.
            for session in &sessions {
                ctx.sessions.close_stream(session).await;
            }
            assert!(ctx.registry.is_empty());
            assert_eq!(ctx.driver.live_links(), 0);
        });
    }
}

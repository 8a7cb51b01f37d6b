//! Integration tests for the ladder service
//!
//! These drive the coordinator the way the command consumer does and check
//! the store, the notifications and the metrics together:
//! - Pairing, reporting, corrections and cancellations
//! - The staleness guard on corrections
//! - Expiry sweeps and announcement chunking
//! - Concurrent enqueues, in memory and on a shared database file
//! - Leaderboards and the AMQP dispatch path

mod fixtures;

use chrono::{Duration, Utc};
use futures::future::join_all;
use ladder_queue::amqp::handlers::dispatch;
use ladder_queue::amqp::{LadderCommand, MessageEnvelope, COMMAND_QUEUE};
use ladder_queue::config::{LadderConfig, RatingConfig};
use ladder_queue::ladder::LadderCoordinator;
use ladder_queue::metrics::MetricsCollector;
use ladder_queue::store::{ledger, matches, memory_pool, requests};
use ladder_queue::types::{GameMode, Identity, MatchState, ReportOutcome, WhoWon};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use fixtures::{player, FailingGateway, TestLadder};

#[tokio::test]
async fn test_report_cancel_and_correct_through_commands() {
    let ladder = TestLadder::new().await;
    let (alice, bob) = (player(1), player(2));
    ladder.pair(&alice, &bob, GameMode::Bo1, Utc::now()).await;

    let win = assert_ok!(
        ladder
            .coordinator
            .handle(LadderCommand::Report {
                identity: alice.clone(),
                outcome: ReportOutcome::Win,
            })
            .await
    );
    assert_eq!(
        win.message,
        "player1 defeated player2 in a Bo1 match. New ratings: player1 1200 -> 1216, player2 1200 -> 1184."
    );

    let cancel = assert_ok!(
        ladder
            .coordinator
            .handle(LadderCommand::Report {
                identity: bob.clone(),
                outcome: ReportOutcome::Cancel,
            })
            .await
    );
    assert!(cancel.success);
    assert!(cancel.message.contains("Ratings restored: player1 1200, player2 1200."));

    let loss = assert_ok!(
        ladder
            .coordinator
            .handle(LadderCommand::Report {
                identity: alice.clone(),
                outcome: ReportOutcome::Loss,
            })
            .await
    );
    assert!(loss.message.starts_with("player2 defeated player1"));
    assert_eq!(ladder.rating_of(&alice).await, 1184);
    assert_eq!(ladder.rating_of(&bob).await, 1216);

    let repeat = assert_ok!(
        ladder
            .coordinator
            .handle(LadderCommand::Report {
                identity: alice.clone(),
                outcome: ReportOutcome::Loss,
            })
            .await
    );
    assert!(repeat.message.starts_with("Corrected result: "));
    assert_eq!(ladder.rating_of(&alice).await, 1184);
    assert_eq!(ladder.rating_of(&bob).await, 1216);

    // Every applied result beyond the live one was tombstoned on both ledgers
    let alice_user = ladder.user(&alice).await;
    let bob_user = ladder.user(&bob).await;
    let mut conn = ladder.coordinator.pool().acquire().await.unwrap();
    for user in [&alice_user, &bob_user] {
        let live: Vec<_> = ledger::fetch_ledger(user.id, &mut conn)
            .await
            .unwrap()
            .into_iter()
            .filter(|entry| !entry.is_tombstoned)
            .collect();
        assert_eq!(live.len(), 2, "initial entry plus the current result");
        assert_eq!(live[0].rating, user.current_rating);
        assert_eq!(live[1].rating, 1200);
    }

    let current = matches::fetch_most_recent_match(alice_user.id, &mut conn)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.state, MatchState::Completed);
    assert_eq!(current.winner, WhoWon::P2);
    drop(conn);

    let corrections = &ladder.metrics.matches().corrections_total;
    assert_eq!(corrections.with_label_values(&["cancel"]).get(), 1);
    assert_eq!(corrections.with_label_values(&["loss"]).get(), 1);
    assert_eq!(ladder.metrics.matches().completed_total.get(), 3);
}

#[tokio::test]
async fn test_correction_rejected_after_opponent_moves_on() {
    let ladder = TestLadder::new().await;
    let (alice, bob, carol) = (player(1), player(2), player(3));
    let start = Utc::now() - Duration::minutes(10);

    ladder.pair(&alice, &bob, GameMode::Bo1, start).await;
    let win = ladder
        .coordinator
        .report(&alice, ReportOutcome::Win, start)
        .await
        .unwrap();
    assert!(win.success);

    // Bob plays on against Carol
    ladder
        .pair(&bob, &carol, GameMode::Bo1, start + Duration::minutes(1))
        .await;

    let correction = ladder
        .coordinator
        .report(&alice, ReportOutcome::Loss, start + Duration::minutes(2))
        .await
        .unwrap();
    assert!(!correction.success);
    assert!(correction.message.contains("already moved on"));

    let cancel = ladder
        .coordinator
        .report(&alice, ReportOutcome::Cancel, start + Duration::minutes(2))
        .await
        .unwrap();
    assert!(!cancel.success);

    // Nothing was rewritten
    assert_eq!(ladder.rating_of(&alice).await, 1216);
    assert_eq!(ladder.rating_of(&bob).await, 1184);
    assert_eq!(ladder.metrics.matches().stale_conflicts_total.get(), 2);
}

#[tokio::test]
async fn test_open_match_blocks_requeue() {
    let ladder = TestLadder::new().await;
    let (alice, bob) = (player(1), player(2));
    let now = Utc::now();
    ladder.pair(&alice, &bob, GameMode::Bo3, now).await;

    let requeue = ladder.coordinator.enqueue(&alice, None, None, now).await.unwrap();
    assert!(!requeue.success);
    assert!(requeue.message.contains("still open match"));

    ladder
        .coordinator
        .report(&bob, ReportOutcome::Win, now)
        .await
        .unwrap();
    let after_report = ladder.coordinator.enqueue(&alice, None, None, now).await.unwrap();
    assert!(after_report.success);
}

#[tokio::test]
async fn test_duplicate_enqueue_rejected() {
    let ladder = TestLadder::new().await;
    let alice = player(1);
    let now = Utc::now();

    let first = assert_ok!(ladder.coordinator.enqueue(&alice, Some(200), None, now).await);
    assert!(first.success);
    let second = assert_ok!(ladder.coordinator.enqueue(&alice, Some(400), None, now).await);
    assert!(!second.success);
    assert!(second.message.starts_with("Found existing queued match request"));

    let mut conn = ladder.coordinator.pool().acquire().await.unwrap();
    assert_eq!(requests::count_queued(&mut conn).await.unwrap(), 1);
}

#[tokio::test]
async fn test_narrow_ranges_prevent_pairing() {
    let ladder = TestLadder::new().await;
    let (alice, bob) = (player(1), player(2));
    let start = Utc::now() - Duration::minutes(5);
    ladder.pair(&alice, &bob, GameMode::Bo1, start).await;
    ladder
        .coordinator
        .report(&alice, ReportOutcome::Win, start)
        .await
        .unwrap();

    // 1216 vs 1184: a 32 point gap
    let now = Utc::now();
    ladder.coordinator.enqueue(&alice, Some(10), None, now).await.unwrap();
    let narrow = ladder.coordinator.enqueue(&bob, Some(10), None, now).await.unwrap();
    assert!(narrow.message.starts_with("You have successfully joined"));

    ladder.coordinator.dequeue(&bob, now).await.unwrap();
    let wide = ladder.coordinator.enqueue(&bob, Some(50), None, now).await.unwrap();
    assert!(wide.message.starts_with("You have successfully joined"), "alice's own range still excludes bob");

    ladder.coordinator.dequeue(&alice, now).await.unwrap();
    ladder.coordinator.enqueue(&alice, Some(32), None, now).await.unwrap();
    let mut conn = ladder.coordinator.pool().acquire().await.unwrap();
    assert_eq!(requests::count_queued(&mut conn).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_enqueues_pair_everyone_once() {
    let ladder = TestLadder::new().await;
    let now = Utc::now();
    let players: Vec<Identity> = (1..=10).map(player).collect();

    let outcomes = join_all(players.iter().map(|identity| {
        let coordinator = ladder.coordinator.clone();
        let identity = identity.clone();
        async move {
            coordinator
                .enqueue(&identity, None, Some(GameMode::Bo1), now)
                .await
        }
    }))
    .await;
    for outcome in outcomes {
        assert!(assert_ok!(outcome).success);
    }

    let mut seated = Vec::new();
    for identity in &players {
        seated.push(ladder.user(identity).await.id);
    }

    let mut conn = ladder.coordinator.pool().acquire().await.unwrap();
    assert_eq!(requests::count_queued(&mut conn).await.unwrap(), 0);
    assert_eq!(
        matches::count_in_state(MatchState::Matched, &mut conn).await.unwrap(),
        5
    );

    // Each open match holds exactly two of the players
    let mut per_match: HashMap<i64, usize> = HashMap::new();
    for user_id in seated {
        let current = matches::fetch_current_match(user_id, &mut conn)
            .await
            .unwrap()
            .expect("everyone is seated");
        *per_match.entry(current.id).or_default() += 1;
    }
    assert_eq!(per_match.len(), 5);
    assert!(per_match.values().all(|&seats| seats == 2));
    drop(conn);

    assert_eq!(ladder.gateway.role_removals().len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_enqueues_on_a_shared_file_store() {
    let ladder = TestLadder::on_file(16).await;
    let now = Utc::now();
    let players: Vec<Identity> = (1..=20).map(player).collect();

    let tasks: Vec<_> = players
        .iter()
        .map(|identity| {
            let coordinator = ladder.coordinator.clone();
            let identity = identity.clone();
            tokio::spawn(async move {
                coordinator
                    .enqueue(&identity, None, Some(GameMode::Bo1), now)
                    .await
            })
        })
        .collect();
    for joined in join_all(tasks).await {
        let outcome = assert_ok!(assert_ok!(joined));
        assert!(outcome.success, "{}", outcome.message);
    }

    let mut seated = Vec::new();
    for identity in &players {
        seated.push(ladder.user(identity).await.id);
    }

    let mut conn = ladder.coordinator.pool().acquire().await.unwrap();
    assert_eq!(requests::count_queued(&mut conn).await.unwrap(), 0);
    assert_eq!(
        matches::count_in_state(MatchState::Matched, &mut conn).await.unwrap(),
        10
    );
    let mut per_match: HashMap<i64, usize> = HashMap::new();
    for user_id in seated {
        let current = matches::fetch_current_match(user_id, &mut conn)
            .await
            .unwrap()
            .expect("everyone is seated");
        *per_match.entry(current.id).or_default() += 1;
    }
    assert_eq!(per_match.len(), 10);
    assert!(per_match.values().all(|&seats| seats == 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_enqueues_of_one_player_queue_once() {
    let ladder = TestLadder::on_file(8).await;
    let now = Utc::now();
    let identity = player(1);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = ladder.coordinator.clone();
            let identity = identity.clone();
            tokio::spawn(async move {
                coordinator
                    .enqueue(&identity, None, Some(GameMode::Bo1), now)
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    for joined in join_all(tasks).await {
        // Losers are told they are already queued; none may surface a store error.
        let outcome = assert_ok!(assert_ok!(joined));
        if outcome.success {
            accepted += 1;
        } else {
            assert!(outcome.message.contains("existing queued match request"), "{}", outcome.message);
        }
    }
    assert_eq!(accepted, 1);

    let mut conn = ladder.coordinator.pool().acquire().await.unwrap();
    assert_eq!(requests::count_queued(&mut conn).await.unwrap(), 1);
    drop(conn);
    assert_eq!(ladder.user(&identity).await.current_rating, 1200);
}

#[tokio::test]
async fn test_expiry_sweeps_are_idempotent_and_chunked() {
    let config = LadderConfig {
        announcement_chunk_size: 200,
        ..LadderConfig::default()
    };
    let ladder = TestLadder::with_config(config).await;
    let now = Utc::now();
    let long_ago = now - Duration::hours(2);

    for n in 1..=4 {
        ladder
            .queue_directly(&player(n), GameMode::Bo1, long_ago)
            .await;
    }
    ladder.queue_directly(&player(9), GameMode::Bo1, now).await;
    let expired = assert_ok!(ladder.coordinator.expire_stale(now).await);
    assert_eq!(expired.len(), 4);

    let announcements = ladder.gateway.announcements();
    assert!(announcements.len() > 1, "four lines do not fit in one message");
    assert!(announcements.iter().all(|a| a.text.len() <= 200));
    let text: String = announcements.iter().map(|a| a.text.as_str()).collect();
    for n in 1..=4 {
        assert!(text.contains(&format!("user player{} because it was 30m stale", n)));
    }
    assert!(!text.contains("player9"));
    assert_eq!(ladder.gateway.role_removals().len(), 4);

    ladder.gateway.clear();
    let again = assert_ok!(ladder.coordinator.expire_stale(now).await);
    assert!(again.is_empty());
    assert!(ladder.gateway.notifications().is_empty());
    assert_eq!(ladder.metrics.queue().expired_total.get(), 4);
}

#[tokio::test]
async fn test_leaderboard_commands() {
    let ladder = TestLadder::new().await;
    let (alice, bob) = (player(1), player(2));
    let now = Utc::now();
    ladder.pair(&alice, &bob, GameMode::Bo1, now).await;
    ladder
        .coordinator
        .report(&bob, ReportOutcome::Loss, now)
        .await
        .unwrap();

    let elo = ladder
        .coordinator
        .handle(LadderCommand::EloLeaderboard)
        .await
        .unwrap();
    assert_eq!(
        elo.message,
        "All time top Elo Ratings: \n\n1 - player1 - Elo 1216 - 1W / 0L\n2 - player2 - Elo 1184 - 0W / 1L"
    );

    let monthly = ladder
        .coordinator
        .handle(LadderCommand::MonthlyLeaderboard)
        .await
        .unwrap();
    assert_eq!(
        monthly.message,
        "Total wins this month: \n\n1 - player1 - 1W / 0L\n2 - player2 - 0W / 1L"
    );

    let standings = ladder
        .coordinator
        .monthly_standings(now + Duration::days(40))
        .await
        .unwrap();
    assert!(standings.iter().all(|s| s.wins == 0 && s.losses == 0));
}

#[tokio::test]
async fn test_notification_failures_do_not_undo_commands() {
    let gateway = Arc::new(FailingGateway::default());
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let coordinator = LadderCoordinator::new(
        memory_pool().await.unwrap(),
        LadderConfig::default(),
        RatingConfig::default(),
        gateway.clone(),
    )
    .with_metrics(metrics.clone());
    let now = Utc::now();

    coordinator.enqueue(&player(1), None, None, now).await.unwrap();
    let paired = coordinator.enqueue(&player(2), None, None, now).await.unwrap();
    assert!(paired.success);
    assert_eq!(gateway.attempts(), 3);

    let mut conn = coordinator.pool().acquire().await.unwrap();
    assert_eq!(
        matches::count_in_state(MatchState::Matched, &mut conn).await.unwrap(),
        1
    );
    let failures = &metrics.service().notification_failures_total;
    assert_eq!(failures.with_label_values(&["remove_role"]).get(), 2);
    assert_eq!(failures.with_label_values(&["announce"]).get(), 1);
}

#[tokio::test]
async fn test_dispatch_runs_commands_from_the_wire() {
    let ladder = TestLadder::new().await;
    let envelope = MessageEnvelope::new(
        LadderCommand::Enqueue {
            identity: player(1),
            range: Some(150),
            mode: Some(GameMode::Bo3),
        },
        COMMAND_QUEUE,
    );
    let bytes = envelope.to_bytes().unwrap();

    let reply = assert_ok!(dispatch(ladder.coordinator.as_ref(), ladder.gateway.as_ref(), &bytes).await);
    assert_eq!(reply.correlation_id, envelope.correlation_id);
    assert!(reply.success);
    assert_eq!(
        reply.message,
        "You have successfully joined the matchmaking queue with a range of 150 elo points."
    );
    assert_eq!(ladder.gateway.replies(), vec![reply]);

    let invalid = MessageEnvelope::new(
        LadderCommand::Dequeue {
            identity: Identity::new("", "nobody"),
        },
        COMMAND_QUEUE,
    );
    assert_err!(
        dispatch(
            ladder.coordinator.as_ref(),
            ladder.gateway.as_ref(),
            &invalid.to_bytes().unwrap()
        )
        .await
    );
}

#[test]
fn test_negative_range_rejected_without_touching_the_queue() {
    tokio_test::block_on(async {
        let ladder = TestLadder::new().await;
        let outcome = ladder
            .coordinator
            .handle(LadderCommand::Enqueue {
                identity: player(1),
                range: Some(-5),
                mode: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.message, "Range cannot be negative: -5");

        let mut conn = ladder.coordinator.pool().acquire().await.unwrap();
        assert_eq!(requests::count_queued(&mut conn).await.unwrap(), 0);
    });
}

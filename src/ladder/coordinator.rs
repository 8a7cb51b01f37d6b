//! Ladder coordinator
//!
//! Owns the command flows: enqueue (with pairing), dequeue, report/cancel with
//! result correction, stale request expiry and leaderboards. Every flow runs
//! its store work inside transactions and only talks to chat after commit.
//!
//! User-facing errors come back as `Ok(CommandOutcome { success: false, .. })`.
//! Retryable and fatal errors are returned as `Err` for the trigger layer.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info, warn};

use crate::amqp::messages::LadderCommand;
use crate::amqp::publisher::NotificationGateway;
use crate::config::{LadderConfig, RatingConfig};
use crate::error::{LadderError, Result};
use crate::ladder::leaderboard::{
    elo_leaderboard, monthly_leaderboard, render_elo_standings, render_monthly_standings,
};
use crate::ladder::maps;
use crate::ladder::pairing::{PairingConfig, PairingStrategy, WeightedPairingEngine};
use crate::metrics::MetricsCollector;
use crate::rating::{EloCalculator, RatingCalculator, RatingLedger};
use crate::store::{self, matches, requests, users};
use crate::types::{
    CommandOutcome, GameMode, Identity, Match, MatchRequest, MatchState, Rating, ReportOutcome,
    Standing, User, UserId, WhoWon,
};
use crate::utils::{chunk_lines, current_timestamp};

const UNREGISTERED_DEQUEUE: &str = "Unable to find your account in our system. You must queue at least once to register before you can dequeue. If this is a mistake contact the admins to iron it out and we'll help!";
const UNREGISTERED_REPORT: &str = "Unable to find your account in our system. You must queue at least once to register before you can report. If this is a mistake contact the admins to iron it out and we'll help!";
const NO_MATCH_TO_REPORT: &str =
    "Unable to find a match to report - you need to be paired before you can report results.";
const ALREADY_CANCELLED: &str = "This match has already been cancelled - nothing to do!";
const STALE_CORRECTION: &str = "Your opponent has already moved on to another match, so this result can no longer be changed. Contact the admins if it needs fixing.";

/// A request removed by the expiry sweep, with its owner
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredRequest {
    pub request: MatchRequest,
    pub user: User,
}

/// Ratings of both seats before and after a report
#[derive(Debug, Clone, PartialEq)]
struct RatingChange {
    p1: User,
    p2: User,
    p1_before: Rating,
    p2_before: Rating,
}

/// What a report did to the match
#[derive(Debug)]
enum Resolution {
    Recorded {
        updated: Match,
        change: RatingChange,
        corrected: bool,
    },
    Cancelled {
        updated: Match,
        p1: User,
        p2: User,
        /// Ratings were restored from a previously recorded result
        restored: bool,
    },
}

/// Entry point for all ladder commands
#[derive(Clone)]
pub struct LadderCoordinator {
    pool: SqlitePool,
    config: LadderConfig,
    default_rating: Rating,
    ledger: RatingLedger,
    pairing: Arc<dyn PairingStrategy>,
    notifier: Arc<dyn NotificationGateway>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl LadderCoordinator {
    /// Create a coordinator with the Elo calculator and the weighted pairing engine
    pub fn new(
        pool: SqlitePool,
        config: LadderConfig,
        rating: RatingConfig,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Self {
        let default_rating = rating.default_rating;
        let calculator: Arc<dyn RatingCalculator> = Arc::new(EloCalculator::new(rating));
        let pairing = Arc::new(WeightedPairingEngine::new(PairingConfig::from(&config)));

        Self {
            pool,
            config,
            default_rating,
            ledger: RatingLedger::new(calculator),
            pairing,
            notifier,
            metrics: None,
        }
    }

    /// Record metrics for every command handled
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    /// Dispatch a command from the trigger layer at the current time
    pub async fn handle(&self, command: LadderCommand) -> Result<CommandOutcome> {
        let now = current_timestamp();
        match command {
            LadderCommand::Enqueue {
                identity,
                range,
                mode,
            } => self.enqueue(&identity, range, mode, now).await,
            LadderCommand::Dequeue { identity } => self.dequeue(&identity, now).await,
            LadderCommand::Report { identity, outcome } => {
                self.report(&identity, outcome, now).await
            }
            LadderCommand::ExpireStale => {
                let expired = self.expire_stale(now).await?;
                Ok(CommandOutcome::success(format!(
                    "Expired {} stale match request(s).",
                    expired.len()
                )))
            }
            LadderCommand::EloLeaderboard => {
                let standings = self.elo_standings().await?;
                Ok(CommandOutcome::success(
                    render_elo_standings(&standings).join("\n"),
                ))
            }
            LadderCommand::MonthlyLeaderboard => {
                let standings = self.monthly_standings(now).await?;
                Ok(CommandOutcome::success(
                    render_monthly_standings(&standings).join("\n"),
                ))
            }
        }
    }

    /// Queue the player and try to pair them with the best waiting candidate.
    ///
    /// `range` defaults to the configured range and `mode` to `All`.
    pub async fn enqueue(
        &self,
        identity: &Identity,
        range: Option<Rating>,
        mode: Option<GameMode>,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        let timer = std::time::Instant::now();
        let result = self.try_enqueue(identity, range, mode, now).await;
        self.settle("enqueue", timer, result)
    }

    /// Remove the player's queued request
    pub async fn dequeue(&self, identity: &Identity, now: DateTime<Utc>) -> Result<CommandOutcome> {
        let timer = std::time::Instant::now();
        let result = self.try_dequeue(identity, now).await;
        self.settle("dequeue", timer, result)
    }

    /// Record, correct or cancel the reporter's most recent match
    pub async fn report(
        &self,
        identity: &Identity,
        outcome: ReportOutcome,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        let timer = std::time::Instant::now();
        let result = self.try_report(identity, outcome, now).await;
        self.settle("report", timer, result)
    }

    /// Cancel every request queued longer than the expiry threshold.
    ///
    /// Each request is re-checked and cancelled in its own transaction, so a
    /// request dequeued or paired in the meantime is skipped and a second
    /// sweep finds nothing to do.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredRequest>> {
        let timer = std::time::Instant::now();
        let cutoff = now - ChronoDuration::seconds(self.config.queue_expiry_seconds as i64);

        let stale = {
            let mut conn = self.pool.acquire().await?;
            requests::fetch_stale(cutoff, &mut conn).await?
        };
        if stale.is_empty() {
            debug!("No stale match requests older than {}", cutoff);
            return Ok(Vec::new());
        }

        let mut expired = Vec::with_capacity(stale.len());
        for request in stale {
            match self.expire_one(&request, cutoff, now).await {
                Ok(Some(entry)) => expired.push(entry),
                Ok(None) => debug!("Request {} left the queue before expiry", request.id),
                Err(e) if e.is_fatal() => {
                    error!("Corrupt state while expiring request {}: {}", request.id, e);
                    return Err(e);
                }
                Err(e) => warn!("Failed to expire request {}: {}", request.id, e),
            }
        }

        info!("Expired {} stale match request(s)", expired.len());

        let minutes = self.config.queue_expiry_minutes();
        let mut lines = Vec::with_capacity(expired.len());
        for entry in &expired {
            self.remove_queue_role(&entry.user).await;
            lines.push(format!(
                "Dequeued match request for user {} because it was {}m stale. Please requeue if you'd like to keep playing!\n",
                entry.user.display_name, minutes
            ));
        }
        for chunk in chunk_lines(&lines, self.config.announcement_chunk_size) {
            self.announce(&chunk).await;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_expired(expired.len());
            metrics.record_command("expire_stale", true, timer.elapsed());
        }
        Ok(expired)
    }

    /// All-time standings ordered by rating
    pub async fn elo_standings(&self) -> Result<Vec<Standing>> {
        let mut conn = self.pool.acquire().await?;
        elo_leaderboard(&mut conn).await
    }

    /// Standings for the month containing `now`, ordered by wins
    pub async fn monthly_standings(&self, now: DateTime<Utc>) -> Result<Vec<Standing>> {
        let mut conn = self.pool.acquire().await?;
        monthly_leaderboard(now, &mut conn).await
    }

    /// Refresh the queue depth gauge
    pub async fn observe_queue_depth(&self) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        let depth = requests::count_queued(&mut conn).await?;
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(depth);
        }
        Ok(depth)
    }

    async fn try_enqueue(
        &self,
        identity: &Identity,
        range: Option<Rating>,
        mode: Option<GameMode>,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        let range = range.unwrap_or(self.config.default_request_range);
        if range < 0 {
            return Err(LadderError::InvalidCommand {
                reason: format!("Range cannot be negative: {}", range),
            });
        }
        let mode = mode.unwrap_or(GameMode::All);

        let mut tx = store::begin_write(&self.pool).await?;
        let user = users::get_or_register(identity, self.default_rating, now, &mut tx).await?;
        let request = requests::enqueue(user.id, range, mode, now, &mut tx).await?;
        tx.commit().await?;

        info!(
            "User {} ('{}') queued request {} with range {} for {} at rating {}",
            user.id, user.display_name, request.id, range, mode, user.current_rating
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_enqueued(mode);
        }

        let queued = CommandOutcome::success(format!(
            "You have successfully joined the matchmaking queue with a range of {} elo points.",
            range
        ));

        let (created, opponent, map_order) = match self.try_pair(&user, &request, now).await {
            Ok(Some(paired)) => paired,
            Ok(None) => return Ok(queued),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                // The request is committed; a later enqueue can still pair it.
                warn!(
                    "Pairing attempt for request {} abandoned, leaving it queued: {}",
                    request.id, e
                );
                return Ok(queued);
            }
        };

        self.remove_queue_role(&opponent).await;
        self.remove_queue_role(&user).await;

        let message = format!(
            "{} joined the queue and was paired against {}. Please play a {} match and report the results when done. Your randomly assigned map order will be: [{}].",
            user.display_name,
            opponent.display_name,
            created.game_mode,
            map_order.join(", ")
        );
        self.announce(&message).await;
        Ok(CommandOutcome::success(message))
    }

    /// Pair `request` against the best candidate in one transaction.
    ///
    /// The waiting candidate takes the P1 seat.
    async fn try_pair(
        &self,
        user: &User,
        request: &MatchRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<(Match, User, Vec<String>)>> {
        let mut tx = store::begin_write(&self.pool).await?;

        let candidates = requests::find_candidates(
            request,
            user.current_rating,
            self.config.candidate_limit,
            &mut tx,
        )
        .await?;
        let pairing =
            match self
                .pairing
                .select_best_pairing(request, user.current_rating, &candidates, now)
            {
                Some(pairing) => pairing,
                None => {
                    debug!(
                        "No compatible candidates for request {} ({} scanned)",
                        request.id,
                        candidates.len()
                    );
                    return Ok(None);
                }
            };

        let created = matches::create_from_requests(
            &pairing.candidate.request,
            request,
            pairing.game_mode,
            now,
            &mut tx,
        )
        .await?;
        let opponent = users::require_user(pairing.candidate.request.requesting_user_id, &mut tx).await?;
        let map_order = maps::assign_for_mode(created.game_mode, &mut tx).await?;
        tx.commit().await?;

        info!(
            "Created match {} ({}): user {} (request {}) vs user {} (request {}), priority {:.3}",
            created.id,
            created.game_mode,
            created.p1_user_id,
            created.p1_request_id,
            created.p2_user_id,
            created.p2_request_id,
            pairing.priority
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_match_created(
                created.game_mode,
                pairing.candidate.request.seconds_waited(now),
            );
        }
        Ok(Some((created, opponent, map_order)))
    }

    async fn try_dequeue(&self, identity: &Identity, now: DateTime<Utc>) -> Result<CommandOutcome> {
        let mut tx = store::begin_write(&self.pool).await?;
        let user = users::fetch_user_by_external_id(&identity.external_id, &mut tx)
            .await?
            .ok_or_else(|| LadderError::not_found(UNREGISTERED_DEQUEUE))?;
        let cancelled = requests::cancel(user.id, now, &mut tx).await?;
        tx.commit().await?;

        info!(
            "User {} ('{}') dequeued request {}",
            user.id, user.display_name, cancelled.id
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_dequeued();
        }

        self.remove_queue_role(&user).await;
        Ok(CommandOutcome::success(format!(
            "{} dequeued successfully.",
            user.display_name
        )))
    }

    async fn try_report(
        &self,
        identity: &Identity,
        outcome: ReportOutcome,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        let mut tx = store::begin_write(&self.pool).await?;
        let reporter = users::fetch_user_by_external_id(&identity.external_id, &mut tx)
            .await?
            .ok_or_else(|| LadderError::not_found(UNREGISTERED_REPORT))?;
        let current = matches::fetch_most_recent_match(reporter.id, &mut tx)
            .await?
            .ok_or_else(|| LadderError::not_found(NO_MATCH_TO_REPORT))?;
        let side = current
            .side_of(reporter.id)
            .ok_or_else(|| LadderError::CorruptState {
                message: format!(
                    "Match {} returned for user {} who holds neither seat",
                    current.id, reporter.id
                ),
            })?;

        debug!(
            "User {} reports {} for match {} (state {}, seat {:?})",
            reporter.id, outcome, current.id, current.state, side
        );

        let resolution = match (current.state, outcome) {
            (MatchState::Cancelled, ReportOutcome::Cancel) => {
                return Ok(CommandOutcome::failure(ALREADY_CANCELLED));
            }
            (MatchState::Matched, ReportOutcome::Cancel) => {
                let updated = matches::update_state(
                    current.id,
                    MatchState::Cancelled,
                    WhoWon::Undefined,
                    now,
                    &mut tx,
                )
                .await?;
                let p1 = users::require_user(current.p1_user_id, &mut tx).await?;
                let p2 = users::require_user(current.p2_user_id, &mut tx).await?;
                Resolution::Cancelled {
                    updated,
                    p1,
                    p2,
                    restored: false,
                }
            }
            (MatchState::Completed, ReportOutcome::Cancel) => {
                self.ensure_latest_for_opponent(&current, reporter.id, &mut tx)
                    .await?;
                let (p1, p2) = self.revert_both(&current, &mut tx).await?;
                let updated = matches::update_state(
                    current.id,
                    MatchState::Cancelled,
                    WhoWon::Undefined,
                    now,
                    &mut tx,
                )
                .await?;
                Resolution::Cancelled {
                    updated,
                    p1,
                    p2,
                    restored: true,
                }
            }
            (state, ReportOutcome::Win | ReportOutcome::Loss) => {
                let corrected = state == MatchState::Completed;
                if corrected {
                    self.ensure_latest_for_opponent(&current, reporter.id, &mut tx)
                        .await?;
                    self.revert_both(&current, &mut tx).await?;
                }
                let winner = WhoWon::from_report(side, outcome == ReportOutcome::Win);
                let change = self.apply_result(&current, winner, now, &mut tx).await?;
                let updated =
                    matches::update_state(current.id, MatchState::Completed, winner, now, &mut tx)
                        .await?;
                Resolution::Recorded {
                    updated,
                    change,
                    corrected,
                }
            }
        };

        tx.commit().await?;

        let message = match &resolution {
            Resolution::Recorded {
                updated,
                change,
                corrected,
            } => {
                self.log_result(updated, change, corrected.then_some(outcome));
                describe_result(updated, change, *corrected)
            }
            Resolution::Cancelled {
                updated,
                p1,
                p2,
                restored,
            } => {
                info!(
                    "Match {} cancelled by user {} (ratings restored: {})",
                    updated.id, reporter.id, restored
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_match_cancelled();
                    if *restored {
                        metrics.record_correction(outcome);
                    }
                }
                describe_cancellation(p1, p2, *restored)
            }
        };

        self.announce(&message).await;
        Ok(CommandOutcome::success(message))
    }

    /// Refuse to rewrite a completed match once the opponent has moved on to a newer one
    async fn ensure_latest_for_opponent(
        &self,
        current: &Match,
        reporter_id: UserId,
        conn: &mut SqliteConnection,
    ) -> Result<()> {
        let Some(opponent_id) = current.opponent_of(reporter_id) else {
            return Ok(());
        };
        let opponent_latest = matches::fetch_most_recent_match(opponent_id, conn).await?;
        match opponent_latest {
            Some(latest) if latest.id == current.id => Ok(()),
            latest => {
                warn!(
                    "Refusing to rewrite match {}: user {} has since played match {:?}",
                    current.id,
                    opponent_id,
                    latest.map(|m| m.id)
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_stale_conflict();
                }
                Err(LadderError::stale(STALE_CORRECTION))
            }
        }
    }

    /// Undo the result of `current` on both players' ledgers
    async fn revert_both(
        &self,
        current: &Match,
        conn: &mut SqliteConnection,
    ) -> Result<(User, User)> {
        let p1 = self.ledger.revert(current.p1_user_id, conn).await?;
        let p2 = self.ledger.revert(current.p2_user_id, conn).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_rating_reverted();
            metrics.record_rating_reverted();
        }
        Ok((p1, p2))
    }

    /// Compute and push new ratings for both seats of `current`
    async fn apply_result(
        &self,
        current: &Match,
        winner: WhoWon,
        now: DateTime<Utc>,
        conn: &mut SqliteConnection,
    ) -> Result<RatingChange> {
        let p1 = users::require_user(current.p1_user_id, conn).await?;
        let p2 = users::require_user(current.p2_user_id, conn).await?;
        let k1 = self.ledger.k_factor_for(p1.id, current.game_mode, conn).await?;
        let k2 = self.ledger.k_factor_for(p2.id, current.game_mode, conn).await?;

        let (p1_new, p2_new) = self.ledger.calculator().compute_new_ratings(
            p1.current_rating,
            p2.current_rating,
            winner == WhoWon::P1,
            k1,
            k2,
        );

        let p1_after = self.ledger.apply(p1.id, p1_new, current.id, now, conn).await?;
        let p2_after = self.ledger.apply(p2.id, p2_new, current.id, now, conn).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_rating_applied(p1.current_rating, p1_new);
            metrics.record_rating_applied(p2.current_rating, p2_new);
        }

        Ok(RatingChange {
            p1_before: p1.current_rating,
            p2_before: p2.current_rating,
            p1: p1_after,
            p2: p2_after,
        })
    }

    async fn expire_one(
        &self,
        request: &MatchRequest,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiredRequest>> {
        let mut tx = store::begin_write(&self.pool).await?;
        let Some(expired) = requests::expire_if_stale(request.id, cutoff, now, &mut tx).await?
        else {
            return Ok(None);
        };
        let user = users::require_user(expired.requesting_user_id, &mut tx).await?;
        tx.commit().await?;

        info!(
            "Expired request {} of user {} ('{}'), queued since {}",
            expired.id, user.id, user.display_name, expired.created_at
        );
        Ok(Some(ExpiredRequest {
            request: expired,
            user,
        }))
    }

    fn log_result(&self, updated: &Match, change: &RatingChange, correction: Option<ReportOutcome>) {
        info!(
            "{} match {} ({}), winner {:?}: user {} {} -> {}, user {} {} -> {}",
            if correction.is_some() { "Corrected" } else { "Recorded" },
            updated.id,
            updated.game_mode,
            updated.winner,
            change.p1.id,
            change.p1_before,
            change.p1.current_rating,
            change.p2.id,
            change.p2_before,
            change.p2.current_rating
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_match_completed();
            if let Some(outcome) = correction {
                metrics.record_correction(outcome);
            }
        }
    }

    /// Turn user-facing errors into failure outcomes; everything else propagates
    fn settle(
        &self,
        command: &str,
        timer: std::time::Instant,
        result: Result<CommandOutcome>,
    ) -> Result<CommandOutcome> {
        let result = match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_user_facing() => {
                debug!("{} rejected: {}", command, e);
                Ok(CommandOutcome::failure(e.user_message()))
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("{} hit corrupt state: {}", command, e);
                } else {
                    warn!("{} failed: {}", command, e);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(command, e.kind());
                }
                Err(e)
            }
        };

        if let (Some(metrics), Ok(outcome)) = (&self.metrics, &result) {
            metrics.record_command(command, outcome.success, timer.elapsed());
        }
        result
    }

    async fn remove_queue_role(&self, user: &User) {
        if let Err(e) = self
            .notifier
            .remove_role(&self.config.queue_role, &user.external_id)
            .await
        {
            warn!(
                "Failed to remove role '{}' from user {}: {}",
                self.config.queue_role, user.id, e
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_notification_failure("remove_role");
            }
        }
    }

    async fn announce(&self, text: &str) {
        if let Err(e) = self.notifier.announce(&self.config.feed_channel, text).await {
            warn!(
                "Failed to announce on '{}': {}",
                self.config.feed_channel, e
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_notification_failure("announce");
            }
        }
    }
}

fn describe_result(updated: &Match, change: &RatingChange, corrected: bool) -> String {
    let (winner, loser) = match updated.winner {
        WhoWon::P2 => (&change.p2, &change.p1),
        _ => (&change.p1, &change.p2),
    };
    format!(
        "{}{} defeated {} in a {} match. New ratings: {} {} -> {}, {} {} -> {}.",
        if corrected { "Corrected result: " } else { "" },
        winner.display_name,
        loser.display_name,
        updated.game_mode,
        change.p1.display_name,
        change.p1_before,
        change.p1.current_rating,
        change.p2.display_name,
        change.p2_before,
        change.p2.current_rating
    )
}

fn describe_cancellation(p1: &User, p2: &User, restored: bool) -> String {
    let mut message = format!(
        "The match between {} and {} was cancelled.",
        p1.display_name, p2.display_name
    );
    if restored {
        message.push_str(&format!(
            " Ratings restored: {} {}, {} {}.",
            p1.display_name, p1.current_rating, p2.display_name, p2.current_rating
        ));
    }
    message
}

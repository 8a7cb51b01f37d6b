//! Common types used throughout the ladder service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Internal identifier of a registered user
pub type UserId = i64;

/// Identifier of a queue entry
pub type RequestId = i64;

/// Identifier of a paired contest
pub type MatchId = i64;

/// Identifier of a rating ledger entry
pub type LedgerEntryId = i64;

/// Elo ratings are whole points
pub type Rating = i32;

/// A stored or supplied value that does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} value: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Game format a player is willing to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    Bo1,
    Bo3,
    /// Indifferent; resolved to a concrete format at pairing time
    All,
}

impl GameMode {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Bo1 => "bo1",
            GameMode::Bo3 => "bo3",
            GameMode::All => "all",
        }
    }

    /// Resolve the format of a pairing between a requester and a chosen candidate.
    ///
    /// `All` on both sides becomes `Bo3`; `All` on one side defers to the other side.
    /// Otherwise the requester's mode wins (the candidate filter already guaranteed equality).
    pub fn resolve(requester: GameMode, candidate: GameMode) -> GameMode {
        match (requester, candidate) {
            (GameMode::All, GameMode::All) => GameMode::Bo3,
            (GameMode::All, concrete) => concrete,
            (concrete, _) => concrete,
        }
    }

    /// Number of maps drawn for a match in this mode
    pub fn map_count(self) -> usize {
        match self {
            GameMode::Bo1 => 1,
            GameMode::Bo3 => 3,
            GameMode::All => 0,
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameMode::Bo1 => write!(f, "Bo1"),
            GameMode::Bo3 => write!(f, "Bo3"),
            GameMode::All => write!(f, "All"),
        }
    }
}

impl FromStr for GameMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bo1" => Ok(GameMode::Bo1),
            "bo3" => Ok(GameMode::Bo3),
            "all" => Ok(GameMode::All),
            _ => Err(ParseEnumError::new("game mode", s)),
        }
    }
}

/// Lifecycle of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Queued,
    Cancelled,
    Completed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Queued => "queued",
            RequestState::Cancelled => "cancelled",
            RequestState::Completed => "completed",
        }
    }
}

impl FromStr for RequestState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RequestState::Queued),
            "cancelled" => Ok(RequestState::Cancelled),
            "completed" => Ok(RequestState::Completed),
            _ => Err(ParseEnumError::new("request state", s)),
        }
    }
}

/// Lifecycle of a paired contest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchState {
    Matched,
    Completed,
    Cancelled,
}

impl MatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Matched => "matched",
            MatchState::Completed => "completed",
            MatchState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matched" => Ok(MatchState::Matched),
            "completed" => Ok(MatchState::Completed),
            "cancelled" => Ok(MatchState::Cancelled),
            _ => Err(ParseEnumError::new("match state", s)),
        }
    }
}

/// Which seat of a match a user occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    P1,
    P2,
}

/// Recorded winner of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhoWon {
    P1,
    P2,
    Undefined,
}

impl WhoWon {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhoWon::P1 => "p1",
            WhoWon::P2 => "p2",
            WhoWon::Undefined => "undefined",
        }
    }

    /// Winner implied by a reporter on `side` claiming a win or a loss
    pub fn from_report(side: Side, reporter_won: bool) -> Self {
        match (side, reporter_won) {
            (Side::P1, true) | (Side::P2, false) => WhoWon::P1,
            (Side::P2, true) | (Side::P1, false) => WhoWon::P2,
        }
    }
}

impl FromStr for WhoWon {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p1" => Ok(WhoWon::P1),
            "p2" => Ok(WhoWon::P2),
            "undefined" => Ok(WhoWon::Undefined),
            _ => Err(ParseEnumError::new("winner", s)),
        }
    }
}

/// What a player reports about their most recent match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportOutcome {
    Win,
    Loss,
    Cancel,
}

impl fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportOutcome::Win => write!(f, "win"),
            ReportOutcome::Loss => write!(f, "loss"),
            ReportOutcome::Cancel => write!(f, "cancel"),
        }
    }
}

impl FromStr for ReportOutcome {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "win" => Ok(ReportOutcome::Win),
            "loss" => Ok(ReportOutcome::Loss),
            "cancel" => Ok(ReportOutcome::Cancel),
            _ => Err(ParseEnumError::new("report outcome", s)),
        }
    }
}

/// External identity supplied by the trigger layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub external_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// A registered ladder participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_id: String,
    pub display_name: String,
    /// Cache of the top non-tombstoned ledger entry
    pub current_rating: Rating,
    pub created_at: DateTime<Utc>,
}

/// An open or terminal queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub id: RequestId,
    pub requesting_user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub request_range: Rating,
    pub requested_game_mode: GameMode,
    pub state: RequestState,
}

impl MatchRequest {
    /// Seconds between creation and `now`, never negative
    pub fn seconds_waited(&self, now: DateTime<Utc>) -> f64 {
        let waited = now.signed_duration_since(self.created_at);
        (waited.num_milliseconds() as f64 / 1000.0).max(0.0)
    }
}

/// Immutable audit row for a request state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequestHistoryEntry {
    pub id: i64,
    pub match_request_id: RequestId,
    pub requesting_user_id: UserId,
    pub request_range: Rating,
    pub requested_game_mode: GameMode,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An open request together with its owner's current rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub request: MatchRequest,
    pub rating: Rating,
}

/// A paired contest between two users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: MatchState,
    pub game_mode: GameMode,
    pub p1_user_id: UserId,
    pub p2_user_id: UserId,
    pub p1_request_id: RequestId,
    pub p2_request_id: RequestId,
    pub winner: WhoWon,
}

impl Match {
    /// Seat occupied by `user_id`, if they are in this match
    pub fn side_of(&self, user_id: UserId) -> Option<Side> {
        if self.p1_user_id == user_id {
            Some(Side::P1)
        } else if self.p2_user_id == user_id {
            Some(Side::P2)
        } else {
            None
        }
    }

    /// The other participant
    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        match self.side_of(user_id)? {
            Side::P1 => Some(self.p2_user_id),
            Side::P2 => Some(self.p1_user_id),
        }
    }
}

/// Immutable snapshot of a match after a state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchHistoryEntry {
    pub id: i64,
    pub match_id: MatchId,
    pub state: MatchState,
    pub game_mode: GameMode,
    pub p1_user_id: UserId,
    pub p2_user_id: UserId,
    pub winner: WhoWon,
    pub recorded_at: DateTime<Utc>,
}

/// One rating snapshot on a user's ledger stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingLedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    pub rating: Rating,
    /// `None` for the registration seed
    pub match_id: Option<MatchId>,
    pub is_tombstoned: bool,
    pub created_at: DateTime<Utc>,
}

/// Map pool configured for a concrete game mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSet {
    pub id: i64,
    pub game_mode: GameMode,
    pub maps: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub user_id: UserId,
    pub display_name: String,
    pub current_rating: Rating,
    pub wins: i64,
    pub losses: i64,
}

/// The `(success, message)` pair handed back to the trigger layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

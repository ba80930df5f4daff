use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub type PlayerId = String;

/// Maximum player name length after normalization.
pub const MAX_NAME_LEN: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    No,
}

impl VoteChoice {
    pub fn label(&self) -> &'static str {
        match self {
            VoteChoice::Yes => "yes",
            VoteChoice::No => "no",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    WaitingForPlayers,
    InProgress,
    Complete,
}

impl RoundPhase {
    pub fn banner(&self) -> &'static str {
        match self {
            RoundPhase::WaitingForPlayers => "waiting for players",
            RoundPhase::InProgress => "round in progress",
            RoundPhase::Complete => "round complete",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tally {
    pub yes: u32,
    pub no: u32,
}

/// Source of fresh player ids. Injected so tests can assert on exact ids.
pub trait IdSource {
    fn next_id(&mut self) -> PlayerId;
}

/// Monotonic id source: p1, p2, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: u64,
}

impl IdSource for SequentialIds {
    fn next_id(&mut self) -> PlayerId {
        self.next += 1;
        format!("p{}", self.next)
    }
}

fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("name too long (max {MAX_NAME_LEN} characters)")]
    NameTooLong,
    #[error("name already taken")]
    DuplicateName,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoteError {
    #[error("player not found")]
    PlayerNotFound,
    #[error("round already complete")]
    RoundAlreadyComplete,
    #[error("player already voted this round")]
    DuplicateVote,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Vote(#[from] VoteError),
}

/// Insertion-ordered set of registered players with unique ids and
/// case-insensitively unique names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    /// Normalizes and validates `raw_name`, then appends a new player.
    /// The id comes from the caller; the roster never generates ids.
    pub fn add(&mut self, id: PlayerId, raw_name: &str) -> Result<Player, RosterError> {
        let name = normalize_name(raw_name);
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(RosterError::NameTooLong);
        }
        let lower = name.to_lowercase();
        if self.players.iter().any(|p| p.name.to_lowercase() == lower) {
            return Err(RosterError::DuplicateName);
        }

        let player = Player { id, name };
        self.players.push(player.clone());
        Ok(player)
    }

    /// Benign not-found: removing an unknown id yields None, not an error.
    pub fn remove(&mut self, id: &str) -> Option<Player> {
        let idx = self.players.iter().position(|p| p.id == id)?;
        Some(self.players.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Votes cast in the current round, at most one per registered player.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundLedger {
    votes: HashMap<PlayerId, VoteChoice>,
}

impl RoundLedger {
    pub fn cast(
        &mut self,
        roster: &Roster,
        player_id: &str,
        choice: VoteChoice,
    ) -> Result<(), VoteError> {
        if !roster.contains(player_id) {
            return Err(VoteError::PlayerNotFound);
        }
        if self.is_complete(roster) {
            return Err(VoteError::RoundAlreadyComplete);
        }
        if self.votes.contains_key(player_id) {
            return Err(VoteError::DuplicateVote);
        }
        self.votes.insert(player_id.to_string(), choice);
        Ok(())
    }

    pub fn vote_for(&self, id: &str) -> Option<VoteChoice> {
        self.votes.get(id).copied()
    }

    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        for choice in self.votes.values() {
            match choice {
                VoteChoice::Yes => tally.yes += 1,
                VoteChoice::No => tally.no += 1,
            }
        }
        tally
    }

    pub fn is_complete(&self, roster: &Roster) -> bool {
        !roster.is_empty() && self.votes.len() == roster.len()
    }

    /// Clears all votes. Idempotent; the roster is untouched.
    pub fn reset(&mut self) {
        self.votes.clear();
    }

    pub fn remove(&mut self, id: &str) {
        self.votes.remove(id);
    }

    /// Drops votes whose player is no longer in the roster. Used after
    /// loading a snapshot so no reachable state holds orphaned votes.
    pub fn retain_members(&mut self, roster: &Roster) {
        self.votes.retain(|id, _| roster.contains(id));
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

/// The whole game: the roster plus the current round. Serializes to the
/// snapshot document `{ "players": [...], "round": { "votes": {...} } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameState {
    #[serde(rename = "players")]
    pub roster: Roster,
    pub round: RoundLedger,
}

impl GameState {
    pub fn phase(&self) -> RoundPhase {
        if self.roster.is_empty() {
            RoundPhase::WaitingForPlayers
        } else if self.round.is_complete(&self.roster) {
            RoundPhase::Complete
        } else {
            RoundPhase::InProgress
        }
    }

    pub fn is_round_complete(&self) -> bool {
        self.round.is_complete(&self.roster)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Command {
    AddPlayer { name: String },
    RemovePlayer { id: PlayerId },
    CastVote { player_id: PlayerId, choice: VoteChoice },
    ResetRound,
    ResetGame,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GameEvent {
    PlayerAdded { player: Player },
    PlayerRemoved { player: Option<Player> },
    VoteCast { player: Player, choice: VoteChoice },
    RoundReset,
    GameReset,
}

impl GameEvent {
    /// Human-readable confirmation for the command that produced this event.
    pub fn message(&self) -> String {
        match self {
            GameEvent::PlayerAdded { player } => format!("player added: {}", player.name),
            GameEvent::PlayerRemoved { player: Some(p) } => format!("player removed: {}", p.name),
            GameEvent::PlayerRemoved { player: None } => "player removed".to_string(),
            GameEvent::VoteCast { player, choice } => {
                format!("{} voted {}", player.name, choice.label())
            }
            GameEvent::RoundReset => "round reset, a new round can start".to_string(),
            GameEvent::GameReset => "game reset, all players removed".to_string(),
        }
    }
}

/// Applies one command as a single state transition. On error the state is
/// left untouched and the caller surfaces the error text to the user.
pub fn apply_command(
    state: &mut GameState,
    command: Command,
    ids: &mut dyn IdSource,
) -> Result<GameEvent, CommandError> {
    match command {
        Command::AddPlayer { name } => {
            let player = state.roster.add(ids.next_id(), &name)?;
            Ok(GameEvent::PlayerAdded { player })
        }
        Command::RemovePlayer { id } => {
            let removed = state.roster.remove(&id);
            // Cascade: a departed player leaves no vote behind.
            state.round.remove(&id);
            Ok(GameEvent::PlayerRemoved { player: removed })
        }
        Command::CastVote { player_id, choice } => {
            let player = state
                .roster
                .get(&player_id)
                .cloned()
                .ok_or(VoteError::PlayerNotFound)?;
            state.round.cast(&state.roster, &player_id, choice)?;
            Ok(GameEvent::VoteCast { player, choice })
        }
        Command::ResetRound => {
            state.round.reset();
            Ok(GameEvent::RoundReset)
        }
        Command::ResetGame => {
            *state = GameState::default();
            Ok(GameEvent::GameReset)
        }
    }
}

pub mod config;
pub mod diff;
pub mod fetch;
pub mod fingerprint;
pub mod message;
pub mod notify;
pub mod overtake;
pub mod parser;
pub mod projections;
pub mod spread;
pub mod state;
pub mod store;
pub mod types;

/// Leaderboard page tracked by default (overall ranking, no style control).
pub const DEFAULT_URL: &str = "https://arena.ai/leaderboard/text/overall-no-style-control";

/// Hosts a Discord webhook URL is allowed to point at.
pub const DISCORD_WEBHOOK_HOSTS: &[&str] = &[
    "discord.com",
    "discordapp.com",
    "ptb.discord.com",
    "canary.discord.com",
];

/// Discord rejects messages over 2000 chars; stay under with headroom.
pub const MAX_DISCORD_MESSAGE_LENGTH: usize = 1900;

/// Number of models kept in each compact time-series record.
pub const TIMESERIES_TOP_N: usize = 20;

/// Rank cutoff above which vote-count churn alone does not warrant a
/// notification. Vote counts for the top models are a settlement
/// tiebreaker, so those always count.
pub const SIGNIFICANT_VOTES_TOP_N: u32 = 10;

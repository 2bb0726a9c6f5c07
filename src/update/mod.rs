//! The per-user update tick: resolve arrived travels into patches, settle
//! raid targets, then commit the acting user under per-user locks.

mod commit;
mod context;
mod patch;
mod reports;
mod runner;
mod settle;
mod travels;
mod world;

pub use commit::{CommitOutcome, CommitReport, commit_all, commit_user};
pub use context::TickContext;
pub use patch::{Field, Patch, PatchSet, QueueEdit, Staged};
pub use reports::{RaidFacts, RaidOutcome, attacker_report, defender_report, raid_reports};
pub use runner::{RunReport, TickSummary, Updater};
pub use settle::{RaidClaim, SettledTarget, Settlement, finish_raid, raid_id, settle_target};
pub use travels::{
    CompletedTravels, EXACT_DRAW_LIMIT, RaidResult, complete_travels, draw_successful_thieves,
    escape_probability, resolve_raid,
};
pub use world::{StaticWorld, TownLookup};

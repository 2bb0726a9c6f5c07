//! Narrative reports for resolved raids.

use crate::model::Report;

/// How a raid went, from the thieves' side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidOutcome {
    /// Every thief was caught.
    AllCaught,
    /// Some thieves were caught, the rest escaped with the loot.
    PartialSuccess,
    /// Every thief escaped.
    NoneCaught,
}

impl RaidOutcome {
    pub fn classify(successful: i64, caught: i64) -> Self {
        match (successful, caught) {
            (0, _) => RaidOutcome::AllCaught,
            (_, 0) => RaidOutcome::NoneCaught,
            _ => RaidOutcome::PartialSuccess,
        }
    }
}

/// Figures shared by both reports of one raid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidFacts {
    pub target_username: String,
    pub thieves: i64,
    pub successful: i64,
    pub caught: i64,
    pub loot: i64,
}

impl RaidFacts {
    pub fn outcome(&self) -> RaidOutcome {
        RaidOutcome::classify(self.successful, self.caught)
    }
}

pub const THIEF_REPORT_TITLE: &str = "Thief report";
pub const ROBBED_TITLE: &str = "We have been robbed!";
pub const CAUGHT_TITLE: &str = "We caught thieves!";

pub fn attacker_text(facts: &RaidFacts) -> String {
    let loot = group_thousands(facts.loot);
    match facts.outcome() {
        RaidOutcome::AllCaught => format!(
            "Our heist on {} was a failure. All {} thieves got caught.",
            facts.target_username, facts.thieves
        ),
        RaidOutcome::PartialSuccess => format!(
            "Our heist with {} thieves on {}'s town was successful. \
             {} thieves were caught, but {} thieves got away with {loot} coins.",
            facts.thieves, facts.target_username, facts.caught, facts.successful
        ),
        RaidOutcome::NoneCaught => format!(
            "Our heist with {} thieves on {}'s town was successful. \
             No thieves were caught, and they got away with {loot} coins.",
            facts.thieves, facts.target_username
        ),
    }
}

pub fn defender_title(facts: &RaidFacts) -> &'static str {
    match facts.outcome() {
        RaidOutcome::AllCaught => CAUGHT_TITLE,
        RaidOutcome::PartialSuccess | RaidOutcome::NoneCaught => ROBBED_TITLE,
    }
}

pub fn defender_text(facts: &RaidFacts) -> String {
    let loot = group_thousands(facts.loot);
    match facts.outcome() {
        RaidOutcome::AllCaught => format!(
            "{} thieves were caught trying to steal from our town.",
            facts.caught
        ),
        RaidOutcome::PartialSuccess => format!(
            "{} thieves were caught trying to steal from our town, \
             but {} thieves got away with {loot} of our coins!",
            facts.caught, facts.successful
        ),
        RaidOutcome::NoneCaught => format!("It looks like someone stole {loot} coins from us."),
    }
}

pub fn attacker_report(facts: &RaidFacts, created_at: i64) -> Report {
    Report::new(created_at, THIEF_REPORT_TITLE, attacker_text(facts))
}

pub fn defender_report(facts: &RaidFacts, created_at: i64) -> Report {
    Report::new(created_at, defender_title(facts), defender_text(facts))
}

/// The attacker's and the defender's report, in that order.
pub fn raid_reports(facts: &RaidFacts, created_at: i64) -> (Report, Report) {
    (
        attacker_report(facts, created_at),
        defender_report(facts, created_at),
    )
}

/// `1234567` -> `"1,234,567"`.
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

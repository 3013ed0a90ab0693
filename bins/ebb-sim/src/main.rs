//! ebb-sim — scenario replay harness for the escrow/epoch protocol.
//!
//! Replays a JSON list of timestamped operations against an in-memory
//! protocol instance (`MemoryCustody` + `StaticAccess`) and prints a state
//! report when the replay finishes. Lifecycle operations run as the
//! scenario's admin account, which holds every role.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::warn;

use ebb_core::access::StaticAccess;
use ebb_core::custody::MemoryCustody;
use ebb_core::error::EbbError;
use ebb_core::types::{AccountId, AssetKind, EpochId, LockId, PoolId, Timestamp, Track};
use ebb_epoch::{Protocol, TrackTotals};

/// Scenario replay harness for the escrow/epoch protocol.
#[derive(Parser)]
#[command(name = "ebb-sim")]
#[command(version, about = "Replay vote/reward scenarios against an in-memory protocol.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file and print the final state report.
    Run(RunArgs),
    /// Print a small example scenario to stdout.
    Example,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the JSON scenario file.
    scenario: PathBuf,

    /// Emit the report as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,

    /// Abort on the first failed step instead of recording it.
    #[arg(long)]
    strict: bool,
}

// ----------------------------------------------------------------------
// Scenario format
// ----------------------------------------------------------------------

/// A replayable scenario. Accounts are small integer seeds expanded to
/// 32-byte account ids, so scenario files stay hand-writable.
#[derive(Deserialize)]
struct Scenario {
    /// Seed of the account holding every role.
    admin: u8,
    /// Timestamp the protocol is constructed at.
    #[serde(default)]
    start: Timestamp,
    ops: Vec<Step>,
}

#[derive(Deserialize)]
struct Step {
    at: Timestamp,
    #[serde(flatten)]
    op: Op,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Op {
    CreateLock {
        account: u8,
        expiry: Timestamp,
        native: u64,
        #[serde(default)]
        paired: u64,
        #[serde(default)]
        delegate: Option<u8>,
    },
    IncreaseAmount {
        account: u8,
        lock: u64,
        #[serde(default)]
        native: u64,
        #[serde(default)]
        paired: u64,
    },
    SetDelegate {
        account: u8,
        lock: u64,
        delegate: Option<u8>,
    },
    Unlock {
        account: u8,
        lock: u64,
    },
    EmergencyUnlock {
        account: u8,
        lock: u64,
    },
    CastVote {
        account: u8,
        pool: u64,
        amount: u128,
        #[serde(default)]
        delegated: bool,
    },
    MigrateVotes {
        account: u8,
        src: u64,
        dst: u64,
        amount: u128,
        #[serde(default)]
        delegated: bool,
    },
    CreatePools {
        pools: Vec<u64>,
    },
    RemovePools {
        pools: Vec<u64>,
    },
    EndEpoch,
    VerifierChecks {
        epoch: EpochId,
        all_cleared: bool,
        #[serde(default)]
        blocked: Vec<u8>,
    },
    Allocate {
        epoch: EpochId,
        /// `(pool, reward, subsidy)` triples.
        items: Vec<(u64, u64, u64)>,
    },
    FundTrack {
        track: Track,
        amount: u64,
    },
    Finalize {
        epoch: EpochId,
    },
    ForceFinalize {
        epoch: EpochId,
    },
    Sweep {
        epoch: EpochId,
        track: Track,
    },
    RegisterDelegate {
        account: u8,
        fee_bps: u64,
    },
    UpdateDelegateFee {
        account: u8,
        fee_bps: u64,
    },
    UnregisterDelegate {
        account: u8,
    },
    ClaimReward {
        account: u8,
        epoch: EpochId,
        pools: Vec<u64>,
    },
    ClaimDelegatedReward {
        account: u8,
        delegate: u8,
        epoch: EpochId,
        pools: Vec<u64>,
    },
    ClaimDelegateFee {
        account: u8,
        epoch: EpochId,
        pools: Vec<u64>,
    },
    ClaimSubsidy {
        account: u8,
        epoch: EpochId,
        pools: Vec<u64>,
    },
    ClaimWrapped {
        account: u8,
        asset: AssetKind,
    },
    SetPaused {
        paused: bool,
    },
    SetFrozen {
        frozen: bool,
    },
}

fn acct(seed: u8) -> AccountId {
    AccountId([seed; 32])
}

fn pool_ids(raw: &[u64]) -> Vec<PoolId> {
    raw.iter().map(|&p| PoolId(p)).collect()
}

// ----------------------------------------------------------------------
// Replay
// ----------------------------------------------------------------------

struct Sim {
    protocol: Protocol,
    access: StaticAccess,
    admin: AccountId,
}

impl Sim {
    fn new(scenario: &Scenario) -> Self {
        let admin = acct(scenario.admin);
        let access = StaticAccess::superuser(admin);
        let protocol = Protocol::new(
            scenario.start,
            Box::new(MemoryCustody::new()),
            Box::new(access.clone()),
        );
        Sim { protocol, access, admin }
    }

    /// Apply one step. Returns a short outcome description for the log.
    fn apply(&mut self, at: Timestamp, op: &Op) -> Result<String, EbbError> {
        let p = &mut self.protocol;
        match op {
            Op::CreateLock { account, expiry, native, paired, delegate } => {
                let id =
                    p.create_lock(at, acct(*account), *expiry, *native, *paired, delegate.map(acct))?;
                Ok(format!("created {id}"))
            }
            Op::IncreaseAmount { account, lock, native, paired } => {
                p.increase_amount(at, acct(*account), LockId(*lock), *native, *paired)?;
                Ok(format!("increased lock#{lock}"))
            }
            Op::SetDelegate { account, lock, delegate } => {
                p.set_delegate(at, acct(*account), LockId(*lock), delegate.map(acct))?;
                Ok(format!("redelegated lock#{lock}"))
            }
            Op::Unlock { account, lock } => {
                p.unlock(at, acct(*account), LockId(*lock))?;
                Ok(format!("unlocked lock#{lock}"))
            }
            Op::EmergencyUnlock { account, lock } => {
                p.emergency_unlock(at, acct(*account), LockId(*lock))?;
                Ok(format!("emergency-unlocked lock#{lock}"))
            }
            Op::CastVote { account, pool, amount, delegated } => {
                p.cast_vote(at, acct(*account), PoolId(*pool), *amount, *delegated)?;
                Ok(format!("cast {amount} on pool#{pool}"))
            }
            Op::MigrateVotes { account, src, dst, amount, delegated } => {
                p.migrate_votes(at, acct(*account), PoolId(*src), PoolId(*dst), *amount, *delegated)?;
                Ok(format!("migrated {amount} from pool#{src} to pool#{dst}"))
            }
            Op::CreatePools { pools } => {
                let results = p.create_pools(self.admin, &pool_ids(pools))?;
                let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
                Ok(format!("created {ok}/{} pools", results.len()))
            }
            Op::RemovePools { pools } => {
                let results = p.remove_pools(self.admin, &pool_ids(pools))?;
                let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
                Ok(format!("removed {ok}/{} pools", results.len()))
            }
            Op::EndEpoch => {
                p.end_epoch(at, self.admin)?;
                Ok("epoch ended".into())
            }
            Op::VerifierChecks { epoch, all_cleared, blocked } => {
                let blocked = blocked.iter().map(|&b| acct(b)).collect();
                let cleared = p.process_verifier_checks(self.admin, *epoch, *all_cleared, blocked)?;
                Ok(format!("verifier checks: cleared={cleared}"))
            }
            Op::Allocate { epoch, items } => {
                let items: Vec<(PoolId, u64, u64)> =
                    items.iter().map(|&(pool, r, s)| (PoolId(pool), r, s)).collect();
                p.process_rewards_and_subsidies(self.admin, *epoch, &items)?;
                Ok(format!("allocated {} pools in epoch {epoch}", items.len()))
            }
            Op::FundTrack { track, amount } => {
                p.fund_track(self.admin, *track, *amount)?;
                Ok(format!("funded {track} with {amount}"))
            }
            Op::Finalize { epoch } => {
                p.finalize_epoch(at, self.admin, *epoch)?;
                Ok(format!("finalized epoch {epoch}"))
            }
            Op::ForceFinalize { epoch } => {
                p.force_finalize_epoch(at, self.admin, *epoch)?;
                Ok(format!("force-finalized epoch {epoch}"))
            }
            Op::Sweep { epoch, track } => {
                let amount = p.sweep_epoch(at, self.admin, *epoch, *track)?;
                Ok(format!("swept {amount} from epoch {epoch} {track}"))
            }
            Op::RegisterDelegate { account, fee_bps } => {
                p.register_delegate(acct(*account), *fee_bps)?;
                Ok(format!("registered delegate at {fee_bps} bps"))
            }
            Op::UpdateDelegateFee { account, fee_bps } => {
                p.update_delegate_fee(acct(*account), *fee_bps)?;
                Ok(format!("fee update to {fee_bps} bps"))
            }
            Op::UnregisterDelegate { account } => {
                p.unregister_delegate(acct(*account))?;
                Ok("delegate unregistered".into())
            }
            Op::ClaimReward { account, epoch, pools } => {
                let results = p.claim_reward(acct(*account), *epoch, &pool_ids(pools))?;
                Ok(format!("claimed {} reward", paid(&results)))
            }
            Op::ClaimDelegatedReward { account, delegate, epoch, pools } => {
                let results =
                    p.claim_delegated_reward(acct(*account), acct(*delegate), *epoch, &pool_ids(pools))?;
                Ok(format!("claimed {} delegated reward", paid(&results)))
            }
            Op::ClaimDelegateFee { account, epoch, pools } => {
                let results = p.claim_delegate_fee(acct(*account), *epoch, &pool_ids(pools))?;
                Ok(format!("claimed {} delegate fees", paid(&results)))
            }
            Op::ClaimSubsidy { account, epoch, pools } => {
                let results = p.claim_subsidy(acct(*account), *epoch, &pool_ids(pools))?;
                Ok(format!("claimed {} subsidy", paid(&results)))
            }
            Op::ClaimWrapped { account, asset } => {
                let amount = p.claim_wrapped(acct(*account), *asset)?;
                Ok(format!("claimed {amount} wrapped {asset}"))
            }
            Op::SetPaused { paused } => {
                self.access.set_paused(*paused);
                Ok(format!("paused={paused}"))
            }
            Op::SetFrozen { frozen } => {
                self.access.set_frozen(*frozen);
                Ok(format!("frozen={frozen}"))
            }
        }
    }
}

fn paid(results: &[(PoolId, Result<u64, ebb_core::error::EpochError>)]) -> u64 {
    results.iter().filter_map(|(_, r)| r.as_ref().ok().copied()).sum()
}

// ----------------------------------------------------------------------
// Report
// ----------------------------------------------------------------------

#[derive(Serialize)]
struct Report {
    current_epoch: EpochId,
    epochs: Vec<EpochReport>,
    pools: Vec<PoolReport>,
    custody: Vec<BalanceReport>,
    steps_applied: usize,
    steps_failed: usize,
}

#[derive(Serialize)]
struct EpochReport {
    number: EpochId,
    state: &'static str,
    reward: TrackTotals,
    subsidy: TrackTotals,
}

#[derive(Serialize)]
struct PoolReport {
    id: u64,
    active: bool,
    lifetime_votes: u128,
}

#[derive(Serialize)]
struct BalanceReport {
    asset: AssetKind,
    balance: u64,
}

fn build_report(sim: &Sim, applied: usize, failed: usize) -> Report {
    let engine = sim.protocol.engine();
    let current = engine.current_epoch();

    let epochs = (0..=current)
        .filter_map(|n| engine.epoch(n))
        .map(|e| EpochReport {
            number: e.number,
            state: e.state.name(),
            reward: e.reward,
            subsidy: e.subsidy,
        })
        .collect();

    let mut pools: Vec<PoolReport> = engine
        .pools()
        .iter()
        .map(|(id, pool)| PoolReport {
            id: id.0,
            active: pool.active,
            lifetime_votes: pool.lifetime_votes,
        })
        .collect();
    pools.sort_by_key(|p| p.id);

    let custody = [AssetKind::Native, AssetKind::Paired, AssetKind::Reward, AssetKind::Subsidy]
        .into_iter()
        .map(|asset| BalanceReport { asset, balance: sim.protocol.custody_balance(asset) })
        .collect();

    Report {
        current_epoch: current,
        epochs,
        pools,
        custody,
        steps_applied: applied,
        steps_failed: failed,
    }
}

fn print_report(report: &Report) {
    println!("=== REPLAY REPORT ===");
    println!("current epoch: {}", report.current_epoch);
    println!("steps applied: {} (failed: {})", report.steps_applied, report.steps_failed);
    println!("\nepochs:");
    for e in &report.epochs {
        println!(
            "  #{:<4} {:<15} reward {}/{}/{}  subsidy {}/{}/{}  (claimed/deposited/swept-out)",
            e.number,
            e.state,
            e.reward.claimed,
            e.reward.deposited,
            e.reward.withdrawn,
            e.subsidy.claimed,
            e.subsidy.deposited,
            e.subsidy.withdrawn,
        );
    }
    println!("\npools:");
    for p in &report.pools {
        let status = if p.active { "active" } else { "removed" };
        println!("  pool#{:<4} {:<8} lifetime votes {}", p.id, status, p.lifetime_votes);
    }
    println!("\ncustody:");
    for b in &report.custody {
        println!("  {:<8} {}", b.asset.to_string(), b.balance);
    }
}

// ----------------------------------------------------------------------
// Entry point
// ----------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Example => {
            println!("{EXAMPLE_SCENARIO}");
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("failed to read {}", args.scenario.display()))?;
    let scenario: Scenario =
        serde_json::from_str(&raw).context("failed to parse scenario file")?;

    let mut sim = Sim::new(&scenario);
    let mut applied = 0usize;
    let mut failed = 0usize;
    for (index, step) in scenario.ops.iter().enumerate() {
        match sim.apply(step.at, &step.op) {
            Ok(outcome) => {
                applied += 1;
                tracing::info!(step = index, at = step.at, "{outcome}");
            }
            Err(e) => {
                if args.strict {
                    bail!("step {index} (at {}) failed: {e}", step.at);
                }
                failed += 1;
                warn!(step = index, at = step.at, "step failed: {e}");
            }
        }
    }

    let report = build_report(&sim, applied, failed);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

const EXAMPLE_SCENARIO: &str = r#"{
  "admin": 200,
  "start": 0,
  "ops": [
    { "at": 0, "op": "create_pools", "pools": [1, 2] },
    { "at": 10, "op": "create_lock", "account": 1, "expiry": 62899200, "native": 10000000000 },
    { "at": 20, "op": "cast_vote", "account": 1, "pool": 1, "amount": 500 },
    { "at": 604800, "op": "end_epoch" },
    { "at": 604810, "op": "verifier_checks", "epoch": 0, "all_cleared": true },
    { "at": 604820, "op": "allocate", "epoch": 0, "items": [[1, 1000, 0], [2, 0, 0]] },
    { "at": 604830, "op": "fund_track", "track": "Reward", "amount": 1000 },
    { "at": 604840, "op": "finalize", "epoch": 0 },
    { "at": 604850, "op": "claim_reward", "account": 1, "epoch": 0, "pools": [1] }
  ]
}"#;

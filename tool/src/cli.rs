//! # CLI Interface
//!
//! Defines the command-line argument structure for `keyward` using `clap`
//! derive. Every flag that names a location, lifetime, or secret also reads
//! from a `KEYWARD_*` environment variable.

use clap::{Args, Parser, Subcommand};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Keyward key-custody operator tool.
///
/// Splits a master key among guardians, runs guardian-approved recovery,
/// and pairs devices, all against a local sled data directory.
#[derive(Parser, Debug)]
#[command(
    name = "keyward",
    about = "Keyward key-custody operator tool",
    version,
    propagate_version = true
)]
pub struct KeywardCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Directory holding the custody database.
    #[arg(long, short = 'd', global = true, env = "KEYWARD_DATA_DIR", default_value = "./keyward-data")]
    pub data_dir: PathBuf,

    /// Log output format: "pretty" or "json".
    #[arg(long, global = true, env = "KEYWARD_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Lifetime of a guardian invitation, in seconds.
    #[arg(long, global = true, env = "KEYWARD_INVITATION_TTL_SECS", default_value_t = 7 * 24 * 60 * 60)]
    pub invitation_ttl_secs: u64,

    /// Lifetime of a device pairing token, in seconds.
    #[arg(long, global = true, env = "KEYWARD_PAIRING_TTL_SECS", default_value_t = 10 * 60)]
    pub pairing_ttl_secs: u64,

    /// Lifetime of the temporary access key issued by recovery, in seconds.
    #[arg(long, global = true, env = "KEYWARD_ACCESS_KEY_TTL_SECS", default_value_t = 15 * 60)]
    pub access_key_ttl_secs: u64,
}

/// Top-level subcommands for the keyward binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an X25519 keypair for a guardian or device.
    Keygen,
    /// Split a master key into unassigned guardian shares.
    Init(InitArgs),
    /// Reserve a share and issue an invitation token for it.
    Invite(InviteArgs),
    /// Accept an invitation as a guardian.
    Accept(AcceptArgs),
    /// Decline an invitation, releasing its share.
    Decline(TokenArgs),
    /// List a subject's invitations.
    Invitations(SubjectArgs),
    /// Expire overdue invitations once, or keep sweeping until Ctrl+C.
    Sweep(SweepArgs),
    /// Guardian-approved recovery.
    #[command(subcommand)]
    Recovery(RecoveryCommand),
    /// Device pairing.
    #[command(subcommand)]
    Pair(PairCommand),
    /// List a subject's registered devices.
    Devices(SubjectArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct SubjectArgs {
    /// The account owner.
    #[arg(long, short = 's', env = "KEYWARD_SUBJECT")]
    pub subject: String,
}

#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Invitation token text.
    #[arg(long, short = 't')]
    pub token: String,
}

/// Arguments for the `init` subcommand.
#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// Shares required to recover.
    #[arg(long, short = 'k', default_value_t = 3)]
    pub threshold: u8,

    /// Shares to create, one per guardian.
    #[arg(long, short = 'n', default_value_t = 5)]
    pub shares: u8,

    /// Hex master key to split. A fresh one is generated when omitted.
    #[arg(long, env = "KEYWARD_MASTER_KEY", hide_env_values = true)]
    pub master_key: Option<String>,
}

/// Arguments for the `invite` subcommand.
#[derive(Args, Debug)]
pub struct InviteArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// Share to reserve.
    #[arg(long)]
    pub share_id: Uuid,

    /// Hex master key, needed to open the pooled share.
    #[arg(long, env = "KEYWARD_MASTER_KEY", hide_env_values = true)]
    pub master_key: String,

    /// Override the invitation lifetime, in seconds.
    #[arg(long)]
    pub ttl_secs: Option<u64>,

    /// Who the invitation is meant for, e.g. an email address.
    #[arg(long)]
    pub hint: Option<String>,
}

/// Arguments for the `accept` subcommand.
#[derive(Args, Debug)]
pub struct AcceptArgs {
    #[command(flatten)]
    pub token: TokenArgs,

    /// The accepting guardian.
    #[arg(long, short = 'g', env = "KEYWARD_GUARDIAN")]
    pub guardian: String,

    /// Guardian's hex X25519 public key, as printed by `keygen`.
    #[arg(long)]
    pub public_key: String,

    /// How to reach the guardian during recovery.
    #[arg(long)]
    pub contact: Option<String>,
}

/// Arguments for the `sweep` subcommand.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Keep sweeping on an interval instead of running once.
    #[arg(long)]
    pub watch: bool,

    /// Seconds between sweeps with `--watch`.
    #[arg(long, env = "KEYWARD_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub interval_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum RecoveryCommand {
    /// Open a recovery session.
    Initiate(SubjectArgs),
    /// Approve the active session as a guardian.
    Approve(GuardianArgs),
    /// Unwrap guardians' shares and submit them in one go.
    Submit(SubmitArgs),
    /// Show the latest session.
    Status(SubjectArgs),
    /// Abort the active session.
    Fail(FailArgs),
}

#[derive(Args, Debug)]
pub struct GuardianArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// The acting guardian.
    #[arg(long, short = 'g', env = "KEYWARD_GUARDIAN")]
    pub guardian: String,
}

/// Submitted shares are held in memory by the running process, so every
/// share needed to reach the threshold goes in one invocation.
#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// `GUARDIAN=SECRET_KEY_HEX`, once per submitting guardian.
    #[arg(long = "share", required = true, value_parser = parse_guardian_secret)]
    pub shares: Vec<GuardianSecret>,
}

/// A guardian and the hex secret key that opens their share.
#[derive(Clone)]
pub struct GuardianSecret {
    pub guardian: String,
    pub secret_key: Zeroizing<String>,
}

impl fmt::Debug for GuardianSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardianSecret")
            .field("guardian", &self.guardian)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

fn parse_guardian_secret(value: &str) -> Result<GuardianSecret, String> {
    let (guardian, secret) = value
        .split_once('=')
        .ok_or_else(|| "expected GUARDIAN=SECRET_KEY_HEX".to_string())?;
    if guardian.is_empty() || secret.is_empty() {
        return Err("expected GUARDIAN=SECRET_KEY_HEX".to_string());
    }
    Ok(GuardianSecret {
        guardian: guardian.to_string(),
        secret_key: Zeroizing::new(secret.to_string()),
    })
}

#[derive(Args, Debug)]
pub struct FailArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// Why the session is being aborted.
    #[arg(long, default_value = "aborted by operator")]
    pub reason: String,
}

#[derive(Subcommand, Debug)]
pub enum PairCommand {
    /// Provision a device and print its pairing token.
    Issue(PairIssueArgs),
    /// Spend a pairing token and print the master key.
    Redeem(PairRedeemArgs),
    /// Spend a recovery access key to provision a device.
    Enroll(PairEnrollArgs),
    /// Remove a device.
    Revoke(PairRevokeArgs),
}

#[derive(Args, Debug)]
pub struct PairIssueArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// Hex master key to hand to the device.
    #[arg(long, env = "KEYWARD_MASTER_KEY", hide_env_values = true)]
    pub master_key: String,

    /// Human-readable device name.
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Args, Debug)]
pub struct PairRedeemArgs {
    /// Pairing token text.
    #[arg(long, short = 't', env = "KEYWARD_PAIRING_TOKEN", hide_env_values = true)]
    pub token: String,
}

#[derive(Args, Debug)]
pub struct PairEnrollArgs {
    #[command(flatten)]
    pub issue: PairIssueArgs,

    /// Hex temporary access key printed by a completed recovery.
    #[arg(long, env = "KEYWARD_ACCESS_KEY", hide_env_values = true)]
    pub access_key: String,
}

#[derive(Args, Debug)]
pub struct PairRevokeArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// Device to remove.
    #[arg(long)]
    pub device_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        KeywardCli::command().debug_assert();
    }

    #[test]
    fn parses_nested_recovery_command() {
        let cli = KeywardCli::try_parse_from([
            "keyward",
            "--data-dir",
            "/tmp/kw",
            "recovery",
            "approve",
            "--subject",
            "alice",
            "--guardian",
            "bob",
        ])
        .unwrap();
        assert_eq!(cli.global.data_dir, PathBuf::from("/tmp/kw"));
        match cli.command {
            Commands::Recovery(RecoveryCommand::Approve(args)) => {
                assert_eq!(args.subject.subject, "alice");
                assert_eq!(args.guardian, "bob");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn submit_takes_repeated_guardian_secrets() {
        let cli = KeywardCli::try_parse_from([
            "keyward",
            "recovery",
            "submit",
            "--subject",
            "alice",
            "--share",
            "bob=00ff",
            "--share",
            "carol=ab12",
        ])
        .unwrap();
        match cli.command {
            Commands::Recovery(RecoveryCommand::Submit(args)) => {
                assert_eq!(args.subject.subject, "alice");
                let guardians: Vec<_> = args.shares.iter().map(|s| s.guardian.as_str()).collect();
                assert_eq!(guardians, ["bob", "carol"]);
                assert_eq!(args.shares[1].secret_key.as_str(), "ab12");
                assert!(!format!("{:?}", args.shares[0]).contains("00ff"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(KeywardCli::try_parse_from([
            "keyward", "recovery", "submit", "--subject", "alice", "--share", "bob",
        ])
        .is_err());
    }
}

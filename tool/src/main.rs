// Copyright (c) 2026 Keyward Contributors. MIT License.
// See LICENSE for details.

//! # Keyward Operator Tool
//!
//! Entry point for the `keyward` binary. Parses CLI arguments, initializes
//! logging, opens the sled data directory, and runs one custody operation.
//!
//! Command output (tokens, keys, listings) goes to stdout; logs go to stderr.

mod cli;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use zeroize::Zeroizing;

use keyward_custody::crypto::generate_master_key;
use keyward_custody::crypto::keys::{RecipientKeypair, RecipientPublicKey};
use keyward_custody::invitation::InvitationSweeper;
use keyward_custody::{
    CustodyConfig, IdentityProvider, KeyCustody, PairingToken, Principal, SharingPolicy,
    SledStore, StaticIdentity, SubmitOutcome, SystemClock,
};

use cli::{Commands, GlobalArgs, KeywardCli, PairCommand, RecoveryCommand};
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KeywardCli::parse();
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&cli.global.log_format),
    );

    match cli.command {
        Commands::Keygen => {
            keygen();
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
        command => {
            let custody = open_custody(&cli.global)?;
            run(&custody, command).await
        }
    }
}

/// Opens the sled store under the data directory and wires up custody.
fn open_custody(global: &GlobalArgs) -> Result<KeyCustody> {
    let db_path = global.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store = SledStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::debug!(path = %db_path.display(), "database opened");

    let config = CustodyConfig::default()
        .with_invitation_ttl(Duration::from_secs(global.invitation_ttl_secs))
        .with_pairing_ttl(Duration::from_secs(global.pairing_ttl_secs))
        .with_access_key_ttl(Duration::from_secs(global.access_key_ttl_secs));
    Ok(KeyCustody::with_parts(
        Arc::new(store),
        Arc::new(SystemClock),
        config,
    ))
}

async fn run(custody: &KeyCustody, command: Commands) -> Result<()> {
    match command {
        Commands::Init(args) => {
            let owner = acting_as(&args.subject.subject).await?;
            let (master_key, generated) = match args.master_key {
                Some(encoded) => (decode_secret(&encoded, "master key")?, false),
                None => (generate_master_key(), true),
            };
            let policy = SharingPolicy::new(args.threshold, args.shares)
                .context("invalid sharing policy")?;
            let ids = custody
                .invitations()
                .provision(&owner, &master_key, policy)
                .await
                .context("failed to provision shares")?;

            println!("Provisioned {} shares for {} ({}-of-{}).", ids.len(), owner, args.threshold, args.shares);
            for id in ids {
                println!("  share {id}");
            }
            if generated {
                println!("Master key (store it on a device now): {}", hex_secret(&master_key).as_str());
            }
        }
        Commands::Invite(args) => {
            let owner = acting_as(&args.subject.subject).await?;
            let master_key = decode_secret(&args.master_key, "master key")?;
            let issued = custody
                .invitations()
                .issue(
                    &owner,
                    &master_key,
                    args.share_id,
                    args.ttl_secs.map(Duration::from_secs),
                    args.hint,
                )
                .await
                .context("failed to issue invitation")?;
            println!(
                "Invitation {} expires {}",
                issued.invitation.id, issued.invitation.expires_at
            );
            println!("{}", issued.token.as_str());
        }
        Commands::Accept(args) => {
            let guardian = acting_as(&args.guardian).await?;
            let public_key = RecipientPublicKey::from_hex(&args.public_key)
                .context("invalid guardian public key")?;
            let record = custody
                .invitations()
                .accept(&args.token.token, &guardian, public_key, args.contact)
                .await
                .context("failed to accept invitation")?;
            println!("{} now guards share {}", record.guardian_id, record.share_id);
        }
        Commands::Decline(args) => {
            let invitation = custody
                .invitations()
                .decline(&args.token)
                .await
                .context("failed to decline invitation")?;
            println!("Invitation {} declined; share {} released", invitation.id, invitation.share_id);
        }
        Commands::Invitations(args) => {
            let owner = principal(&args.subject)?;
            for invitation in custody.invitations().list(&owner).await? {
                println!(
                    "{}  share={}  status={}  expires={}",
                    invitation.id, invitation.share_id, invitation.status, invitation.expires_at
                );
            }
        }
        Commands::Sweep(args) => {
            if args.watch {
                sweep_until_shutdown(custody, Duration::from_secs(args.interval_secs)).await?;
            } else {
                let released = custody
                    .invitations()
                    .sweep_expired()
                    .await
                    .context("sweep failed")?;
                println!("Released {} shares", released.len());
            }
        }
        Commands::Recovery(command) => run_recovery(custody, command).await?,
        Commands::Pair(command) => run_pairing(custody, command).await?,
        Commands::Devices(args) => {
            let owner = principal(&args.subject)?;
            for device in custody.devices().list(&owner).await? {
                println!(
                    "{}  label={}  registered={}  last_access={}",
                    device.device_id,
                    device.label.as_deref().unwrap_or("-"),
                    device.registered_at,
                    device.last_access_at
                );
            }
        }
        Commands::Keygen => keygen(),
        Commands::Version => print_version(),
    }
    Ok(())
}

async fn run_recovery(custody: &KeyCustody, command: RecoveryCommand) -> Result<()> {
    let recovery = custody.recovery();
    match command {
        RecoveryCommand::Initiate(args) => {
            let owner = principal(&args.subject)?;
            let session = recovery.initiate(&owner).await.context("failed to start recovery")?;
            println!("Recovery session {} opened; {} guardians must respond", session.id(), session.threshold());
        }
        RecoveryCommand::Approve(args) => {
            let owner = principal(&args.subject.subject)?;
            let guardian = acting_as(&args.guardian).await?;
            let session = recovery
                .approve(&owner, &guardian)
                .await
                .context("failed to record approval")?;
            println!(
                "{} approvals of {} ({})",
                session.approved_guardians().len(),
                session.threshold(),
                session.status()
            );
        }
        RecoveryCommand::Submit(args) => {
            let owner = principal(&args.subject.subject)?;
            let record = custody
                .subject(&owner)
                .await?
                .with_context(|| format!("no custody record for {owner}"))?;

            for submission in args.shares {
                let guardian = acting_as(&submission.guardian).await?;
                let keys = RecipientKeypair::from_secret_hex(&submission.secret_key)
                    .with_context(|| format!("invalid secret key for {guardian}"))?;
                let assigned = record
                    .guardian(&guardian)
                    .with_context(|| format!("{guardian} is not a guardian for {owner}"))?;
                let share = assigned
                    .open_share(&keys)
                    .with_context(|| format!("secret key does not open {guardian}'s share"))?;

                match recovery.submit_share(&owner, &guardian, share).await? {
                    SubmitOutcome::Pending { collected, threshold } => {
                        println!("{guardian}: {collected} of {threshold} shares collected");
                    }
                    SubmitOutcome::Completed(outcome) => {
                        println!("Recovery complete.");
                        println!("Master key: {}", hex_secret(&outcome.master_key).as_str());
                        println!(
                            "Access key: {} (single use, expires {})",
                            hex_secret(&outcome.access_key[..]).as_str(),
                            outcome.access_key_expires_at
                        );
                        return Ok(());
                    }
                }
            }
            tracing::warn!(
                subject = %owner,
                "threshold not reached; submitted shares are dropped when this process exits"
            );
        }
        RecoveryCommand::Status(args) => {
            let owner = principal(&args.subject)?;
            let session = recovery.status(&owner).await?;
            println!("Session    {}", session.id());
            println!("Status     {}", session.status());
            println!("Requested  {}", session.requested_at());
            println!("Approvals  {} of {}", session.approved_guardians().len(), session.threshold());
            println!("Shares     {} of {}", session.collected_shares().len(), session.threshold());
            if let Some(reason) = session.failure_reason() {
                println!("Failure    {reason}");
            }
        }
        RecoveryCommand::Fail(args) => {
            let owner = principal(&args.subject.subject)?;
            let session = recovery.fail(&owner, &args.reason).await?;
            println!("Recovery session {} failed: {}", session.id(), args.reason);
        }
    }
    Ok(())
}

async fn run_pairing(custody: &KeyCustody, command: PairCommand) -> Result<()> {
    let devices = custody.devices();
    match command {
        PairCommand::Issue(args) => {
            let owner = principal(&args.subject.subject)?;
            let master_key = decode_secret(&args.master_key, "master key")?;
            let token = devices
                .issue(&owner, &master_key, args.label)
                .await
                .context("failed to issue pairing token")?;
            print_pairing_token(&token)?;
        }
        PairCommand::Redeem(args) => {
            let token = PairingToken::from_text(args.token.trim()).context("invalid pairing token")?;
            let master_key = devices.redeem(token).await.context("failed to redeem pairing token")?;
            println!("{}", hex_secret(&master_key).as_str());
        }
        PairCommand::Enroll(args) => {
            let owner = principal(&args.issue.subject.subject)?;
            let master_key = decode_secret(&args.issue.master_key, "master key")?;
            let access_key = decode_secret(&args.access_key, "access key")?;
            let token = devices
                .enroll_recovered(&owner, &access_key, &master_key, args.issue.label)
                .await
                .context("failed to enroll device")?;
            print_pairing_token(&token)?;
        }
        PairCommand::Revoke(args) => {
            let owner = principal(&args.subject.subject)?;
            let device = devices.revoke(&owner, args.device_id).await?;
            println!("Device {} revoked", device.device_id);
        }
    }
    Ok(())
}

/// Runs the invitation sweeper until Ctrl+C or SIGTERM.
async fn sweep_until_shutdown(custody: &KeyCustody, interval: Duration) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = InvitationSweeper::new(custody.invitations().clone(), interval).spawn(shutdown_rx);

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping sweeper");
    // The receiver may already be gone if the task ended on its own.
    let _ = shutdown_tx.send(true);
    sweeper.await.context("sweeper task panicked")?;
    Ok(())
}

fn keygen() {
    let keys = RecipientKeypair::generate();
    println!("Public key : {}", keys.public_key().to_hex());
    println!("Secret key : {}", keys.secret_hex().as_str());
}

fn print_pairing_token(token: &PairingToken) -> Result<()> {
    let text = token.to_text()?;
    println!("Device {} (token expires {})", token.device_id, token.expires_at);
    println!("{}", text.as_str());
    Ok(())
}

fn principal(id: &str) -> Result<Principal> {
    Principal::parse(id).with_context(|| format!("invalid principal {id:?}"))
}

/// The principal performing the command, as the identity provider reports it.
async fn acting_as(id: &str) -> Result<Principal> {
    StaticIdentity::new(principal(id)?)
        .authenticate()
        .await
        .context("caller is not authenticated")
}

fn decode_secret(encoded: &str, what: &str) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = Zeroizing::new(
        hex::decode(encoded.trim()).with_context(|| format!("{what} is not valid hex"))?,
    );
    if bytes.is_empty() {
        bail!("{what} is empty");
    }
    Ok(bytes)
}

fn hex_secret(bytes: &[u8]) -> Zeroizing<String> {
    Zeroizing::new(hex::encode(bytes))
}

/// Prints version information to stdout.
fn print_version() {
    println!("keyward {}", env!("CARGO_PKG_VERSION"));
    println!("tokens  v{}", keyward_custody::config::TOKEN_VERSION);
    println!("wrap    v{}", keyward_custody::config::WRAP_FORMAT_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

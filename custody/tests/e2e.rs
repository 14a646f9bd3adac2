//! End-to-end tests for Keyward custody.
//!
//! These drive the public API the way a client would: provision a master
//! key, invite guardians, lose every device, recover through the guardians,
//! and enroll a new device. Each test builds its own store and clock.

use std::sync::Arc;
use std::time::Duration;

use keyward_custody::crypto::generate_master_key;
use keyward_custody::crypto::keys::RecipientKeypair;
use keyward_custody::sharing::pool_key;
use keyward_custody::{
    CustodyConfig, CustodyStore, GuardianRecord, InvitationError, InvitationStatus, KeyCustody,
    ManualClock, MemoryStore, PairingError, PairingToken, Principal, RecoveryError,
    RecoveryStatus, Share, SharingPolicy, SledStore, SubjectRecord, SubmitOutcome,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Guardian {
    id: Principal,
    keys: RecipientKeypair,
    record: GuardianRecord,
}

fn principal(name: &str) -> Principal {
    Principal::parse(name).unwrap()
}

fn custody_over(store: Arc<dyn CustodyStore>) -> (KeyCustody, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let custody = KeyCustody::with_parts(store, clock.clone(), CustodyConfig::default());
    (custody, clock)
}

/// Split `master_key` for `owner` and have one guardian accept each share.
async fn enroll_guardians(
    custody: &KeyCustody,
    owner: &Principal,
    master_key: &[u8],
    total: u8,
    threshold: u8,
) -> Vec<Guardian> {
    let invitations = custody.invitations();
    let share_ids = invitations
        .provision(owner, master_key, SharingPolicy::new(threshold, total).unwrap())
        .await
        .unwrap();

    let mut guardians = Vec::new();
    for (i, share_id) in share_ids.into_iter().enumerate() {
        let id = principal(&format!("guardian-{i}"));
        let keys = RecipientKeypair::generate();
        let issued = invitations
            .issue(owner, master_key, share_id, None, Some(format!("guardian-{i}@example.com")))
            .await
            .unwrap();
        let record = invitations
            .accept(&issued.token, &id, keys.public_key(), None)
            .await
            .unwrap();
        guardians.push(Guardian { id, keys, record });
    }
    guardians
}

// ---------------------------------------------------------------------------
// 1. Full Recovery Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_recovery_lifecycle() {
    let (custody, _clock) = custody_over(Arc::new(MemoryStore::new()));
    let owner = principal("alice");
    let master_key = generate_master_key();

    // First device, then guardians.
    let first = custody
        .devices()
        .issue(&owner, &master_key, Some("laptop".into()))
        .await
        .unwrap();
    let guardians = enroll_guardians(&custody, &owner, &master_key, 5, 3).await;

    // The laptop is lost.
    custody.devices().revoke(&owner, first.device_id).await.unwrap();
    assert!(custody.devices().list(&owner).await.unwrap().is_empty());

    let recovery = custody.recovery();
    let session = recovery.initiate(&owner).await.unwrap();
    assert_eq!(session.status(), RecoveryStatus::Requested);
    assert_eq!(session.threshold(), 3);

    // Guardians 1, 3 and 4 respond.
    let responders = [&guardians[1], &guardians[3], &guardians[4]];
    for g in responders {
        recovery.approve(&owner, &g.id).await.unwrap();
    }
    assert_eq!(
        recovery.status(&owner).await.unwrap().status(),
        RecoveryStatus::ApprovalComplete
    );

    let mut outcome = None;
    for g in responders {
        let share = g.record.open_share(&g.keys).unwrap();
        if let SubmitOutcome::Completed(done) =
            recovery.submit_share(&owner, &g.id, share).await.unwrap()
        {
            outcome = Some(done);
        }
    }
    let outcome = outcome.expect("third share completes recovery");
    assert_eq!(outcome.master_key.as_slice(), master_key.as_slice());
    assert_eq!(outcome.session.status(), RecoveryStatus::Completed);

    // Enroll a replacement device and move its token across as text.
    let token = custody
        .devices()
        .enroll_recovered(
            &owner,
            &outcome.access_key[..],
            &outcome.master_key,
            Some("new phone".into()),
        )
        .await
        .unwrap();
    let text = token.to_text().unwrap();
    let key = custody
        .devices()
        .redeem(PairingToken::from_text(&text).unwrap())
        .await
        .unwrap();
    assert_eq!(key.as_slice(), master_key.as_slice());

    let record = custody.subject(&owner).await.unwrap().unwrap();
    let stored = record.recovery.unwrap();
    assert_eq!(stored.collected_shares().len(), 3);
    assert!(stored.temp_access_key().unwrap().consumed);
}

// ---------------------------------------------------------------------------
// 2. Below Threshold
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_stalls_below_threshold() {
    let (custody, _clock) = custody_over(Arc::new(MemoryStore::new()));
    let owner = principal("alice");
    let master_key = generate_master_key();
    let guardians = enroll_guardians(&custody, &owner, &master_key, 5, 3).await;

    let recovery = custody.recovery();
    recovery.initiate(&owner).await.unwrap();
    for g in &guardians[..2] {
        recovery.approve(&owner, &g.id).await.unwrap();
        let share = g.record.open_share(&g.keys).unwrap();
        let outcome = recovery.submit_share(&owner, &g.id, share).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Pending { threshold: 3, .. }));
    }
    assert_eq!(
        recovery.status(&owner).await.unwrap().status(),
        RecoveryStatus::InProgress
    );

    // A guardian who has not approved cannot slip a share in.
    let late = &guardians[2];
    let err = recovery
        .submit_share(&owner, &late.id, late.record.open_share(&late.keys).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RecoveryError::ApprovalRequired(_)));

    // Aborting frees the subject for a new attempt.
    let failed = recovery.fail(&owner, "owner cancelled").await.unwrap();
    assert_eq!(failed.status(), RecoveryStatus::Failed);
    recovery.initiate(&owner).await.unwrap();
}

// ---------------------------------------------------------------------------
// 3. Share Exclusivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_share_is_reserved_by_one_invitation_at_a_time() {
    let (custody, _clock) = custody_over(Arc::new(MemoryStore::new()));
    let owner = principal("alice");
    let master_key = generate_master_key();
    let invitations = custody.invitations();
    let share_ids = invitations
        .provision(&owner, &master_key, SharingPolicy::new(2, 3).unwrap())
        .await
        .unwrap();

    let first = invitations
        .issue(&owner, &master_key, share_ids[0], None, None)
        .await
        .unwrap();
    assert!(matches!(
        invitations.issue(&owner, &master_key, share_ids[0], None, None).await,
        Err(InvitationError::ShareAlreadyReserved(_))
    ));

    // Declining frees it again.
    invitations.decline(&first.token).await.unwrap();
    let second = invitations
        .issue(&owner, &master_key, share_ids[0], None, None)
        .await
        .unwrap();

    // After acceptance the share leaves the pool entirely.
    let keys = RecipientKeypair::generate();
    invitations
        .accept(&second.token, &principal("bob"), keys.public_key(), None)
        .await
        .unwrap();
    assert!(matches!(
        invitations.issue(&owner, &master_key, share_ids[0], None, None).await,
        Err(InvitationError::UnknownShare(_))
    ));
}

// ---------------------------------------------------------------------------
// 4. Expiry Releases Shares
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overdue_invitation_releases_its_share() {
    let (custody, clock) = custody_over(Arc::new(MemoryStore::new()));
    let owner = principal("alice");
    let master_key = generate_master_key();
    let invitations = custody.invitations();
    let share_ids = invitations
        .provision(&owner, &master_key, SharingPolicy::new(2, 2).unwrap())
        .await
        .unwrap();

    let issued = invitations
        .issue(&owner, &master_key, share_ids[1], Some(Duration::from_secs(3600)), None)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3600));

    let released = invitations.sweep_expired().await.unwrap();
    assert_eq!(released, vec![share_ids[1]]);

    let listed = invitations.list(&owner).await.unwrap();
    assert_eq!(listed[0].status, InvitationStatus::Expired);

    let keys = RecipientKeypair::generate();
    assert!(matches!(
        invitations
            .accept(&issued.token, &principal("bob"), keys.public_key(), None)
            .await,
        Err(InvitationError::InvitationExpired(_))
    ));

    // The share can be offered to someone else.
    invitations
        .issue(&owner, &master_key, share_ids[1], None, None)
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// 5. Device Pairing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pairing_token_expires() {
    let (custody, clock) = custody_over(Arc::new(MemoryStore::new()));
    let owner = principal("alice");
    let master_key = generate_master_key();

    let token = custody
        .devices()
        .issue(&owner, &master_key, None)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(11 * 60));

    assert!(matches!(
        custody.devices().redeem(token).await,
        Err(PairingError::TokenExpired)
    ));
}

#[tokio::test]
async fn self_registered_device_unlocks_with_its_own_key() {
    let (custody, _clock) = custody_over(Arc::new(MemoryStore::new()));
    let owner = principal("alice");
    let master_key = generate_master_key();
    let device_keys = RecipientKeypair::generate();

    let device = custody
        .devices()
        .register(&owner, device_keys.public_key(), &master_key, Some("desktop".into()))
        .await
        .unwrap();
    let key = custody
        .devices()
        .unlock(&owner, device.device_id, &device_keys)
        .await
        .unwrap();
    assert_eq!(key.as_slice(), master_key.as_slice());
}

// ---------------------------------------------------------------------------
// 6. Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_survives_on_sled() {
    let store = Arc::new(SledStore::open_temporary().unwrap());
    let (custody, _clock) = custody_over(store.clone());
    let owner = principal("alice");
    let master_key = generate_master_key();
    let guardians = enroll_guardians(&custody, &owner, &master_key, 3, 2).await;
    assert_eq!(store.subject_count(), 1);

    // A second facade over the same store sees everything the first wrote.
    let (reopened, _clock) = custody_over(store);
    let recovery = reopened.recovery();
    recovery.initiate(&owner).await.unwrap();

    let mut completed = None;
    for g in &guardians[..2] {
        recovery.approve(&owner, &g.id).await.unwrap();
        let share = g.record.open_share(&g.keys).unwrap();
        if let SubmitOutcome::Completed(done) =
            recovery.submit_share(&owner, &g.id, share).await.unwrap()
        {
            completed = Some(done);
        }
    }
    let done = completed.expect("two of three shares complete recovery");
    assert_eq!(done.master_key.as_slice(), master_key.as_slice());
}

// ---------------------------------------------------------------------------
// 7. Nothing Combinable at Rest
// ---------------------------------------------------------------------------

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Every share the store could leak, recovered here with the master key.
fn pool_shares(record: &SubjectRecord, master_key: &[u8]) -> Vec<Share> {
    let key = pool_key(master_key);
    record
        .unassigned_shares
        .iter()
        .map(|sealed| sealed.open(&key).unwrap())
        .collect()
}

#[tokio::test]
async fn raw_store_never_holds_a_plaintext_share() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let (custody, _clock) = custody_over(store.clone());
    let owner = principal("alice");
    let master_key = generate_master_key();

    custody
        .invitations()
        .provision(&owner, &master_key, SharingPolicy::new(3, 5).unwrap())
        .await
        .unwrap();
    let record = custody.subject(&owner).await.unwrap().unwrap();
    let shares = pool_shares(&record, &master_key);
    assert_eq!(shares.len(), 5);

    let raw = bincode::serialize(&record).unwrap();
    for share in &shares {
        assert!(!contains(&raw, &share.y));
    }

    // Invite and accept everyone, then submit one share short of the threshold.
    let mut guardians = Vec::new();
    for (i, share) in shares.iter().enumerate() {
        let id = principal(&format!("guardian-{i}"));
        let keys = RecipientKeypair::generate();
        let issued = custody
            .invitations()
            .issue(&owner, &master_key, share.id, None, None)
            .await
            .unwrap();
        let record = custody
            .invitations()
            .accept(&issued.token, &id, keys.public_key(), None)
            .await
            .unwrap();
        guardians.push(Guardian { id, keys, record });
    }

    let recovery = custody.recovery();
    recovery.initiate(&owner).await.unwrap();
    for g in &guardians[..2] {
        recovery.approve(&owner, &g.id).await.unwrap();
        let share = g.record.open_share(&g.keys).unwrap();
        recovery.submit_share(&owner, &g.id, share).await.unwrap();
    }
    drop(custody);
    drop(store);

    // Read the database files straight off disk.
    let mut on_disk = Vec::new();
    for entry in walk(dir.path()) {
        on_disk.extend(std::fs::read(entry).unwrap());
    }
    for share in &shares {
        assert!(!contains(&on_disk, &share.y));
    }
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}

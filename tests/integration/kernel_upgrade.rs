#![allow(missing_docs)]

use std::sync::Arc;

use penumbra::{
    db::SystemGraphRuntimeRepository,
    upgrade::{
        DbmsRuntimeRepository, DbmsRuntimeVersion, DeferralReason, InMemoryRuntimeRepository,
        UpgradeEvent, UpgradeState,
    },
    Config, Database, KernelVersion, Result,
};
use tempfile::tempdir;

fn config() -> Config {
    Config::default()
        .page_size(4096)
        .page_cache_pages(64)
        .initial_kernel_version(KernelVersion::V1)
        .max_concurrent_transactions(10)
        .upgrade_lock_timeout_ms(50)
}

fn open_at_v1(dir: &std::path::Path) -> Result<(Database, Arc<InMemoryRuntimeRepository>)> {
    let runtime = Arc::new(InMemoryRuntimeRepository::new(DbmsRuntimeVersion::V1));
    let db = Database::open_with_runtime(dir, config(), runtime.clone())?;
    Ok((db, runtime))
}

fn write_one_node(db: &Database) -> Result<()> {
    let mut tx = db.begin_write()?;
    tx.create_node()?;
    tx.commit()?;
    Ok(())
}

#[test]
fn nothing_happens_until_the_runtime_is_raised() -> Result<()> {
    let dir = tempdir()?;
    let (db, _runtime) = open_at_v1(dir.path())?;
    write_one_node(&db)?;
    assert_eq!(db.kernel_version()?, KernelVersion::V1);
    assert_eq!(db.upgrade_state()?, UpgradeState::AtOldVersion);
    assert_eq!(db.upgrade_stats().attempts, 0);
    assert!(db.upgrade_events().is_empty());
    Ok(())
}

#[test]
fn first_write_after_runtime_bump_upgrades_and_rotates_the_log() -> Result<()> {
    let dir = tempdir()?;
    let (db, runtime) = open_at_v1(dir.path())?;
    write_one_node(&db)?;
    let segments_before = db.log_files().segment_versions()?.len();

    runtime.set_version(DbmsRuntimeVersion::V3)?;
    assert_eq!(db.upgrade_state()?, UpgradeState::UpgradePending);
    assert_eq!(db.kernel_version()?, KernelVersion::V1, "a bump alone changes nothing");

    let before = db.last_committed_tx();
    write_one_node(&db)?;
    assert_eq!(db.kernel_version()?, KernelVersion::V3);
    assert_eq!(db.upgrade_state()?, UpgradeState::AtNewVersion);
    assert_eq!(db.last_committed_tx().0, before.0 + 2, "upgrade and trigger both commit");
    match db.upgrade_events().as_slice() {
        [UpgradeEvent::Completed { from, to, tx_id }] => {
            assert_eq!((*from, *to), (KernelVersion::V1, KernelVersion::V3));
            assert_eq!(tx_id.0, before.0 + 1, "the upgrade commits ahead of its trigger");
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert!(db.log_files().segment_versions()?.len() > segments_before);
    assert_eq!(db.log_files().current_kernel_version(), Some(KernelVersion::V3));

    // Nothing more to do once the versions match.
    write_one_node(&db)?;
    assert_eq!(db.upgrade_stats().completions, 1);
    assert_eq!(db.upgrade_stats().attempts, 1);
    Ok(())
}

#[test]
fn exhausted_budget_defers_the_upgrade_without_failing_the_write() -> Result<()> {
    let dir = tempdir()?;
    let (db, runtime) = open_at_v1(dir.path())?;
    runtime.set_version(DbmsRuntimeVersion::V3)?;

    let readers = (0..9)
        .map(|_| db.begin_read())
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(db.active_transactions(), 9);
    write_one_node(&db)?;
    assert_eq!(db.kernel_version()?, KernelVersion::V1);
    assert_eq!(db.upgrade_state()?, UpgradeState::UpgradePending);
    let events = db.upgrade_events();
    assert!(matches!(
        events.as_slice(),
        [UpgradeEvent::Deferred {
            reason: DeferralReason::MaxConcurrentTransactions,
            ..
        }]
    ));
    assert!(events[0]
        .to_string()
        .contains("maximum concurrently executed transactions"));

    for reader in readers {
        reader.rollback()?;
    }
    write_one_node(&db)?;
    assert_eq!(db.kernel_version()?, KernelVersion::V3);
    let stats = db.upgrade_stats();
    assert_eq!((stats.attempts, stats.deferrals, stats.completions), (2, 1, 1));
    Ok(())
}

#[test]
fn concurrent_writer_defers_the_upgrade_with_a_lock_conflict() -> Result<()> {
    let dir = tempdir()?;
    let (db, runtime) = open_at_v1(dir.path())?;
    write_one_node(&db)?;
    runtime.set_version(DbmsRuntimeVersion::V2)?;

    let mut first = db.begin_write()?;
    first.create_node()?;
    let mut second = db.begin_write()?;
    second.create_node()?;
    first.commit()?;
    assert_eq!(db.kernel_version()?, KernelVersion::V1);
    assert!(db
        .upgrade_events()
        .iter()
        .any(|event| matches!(
            event,
            UpgradeEvent::Deferred {
                reason: DeferralReason::LockConflict,
                ..
            }
        )));

    // The second writer is alone now and may upgrade.
    second.commit()?;
    assert_eq!(db.kernel_version()?, KernelVersion::V2);
    assert!(db.begin_read()?.node_exists(penumbra::NodeId(0))?);
    Ok(())
}

#[test]
fn upgraded_store_recovers_at_the_new_version() -> Result<()> {
    let dir = tempdir()?;
    {
        let (db, runtime) = open_at_v1(dir.path())?;
        write_one_node(&db)?;
        runtime.set_version(DbmsRuntimeVersion::V3)?;
        write_one_node(&db)?;
        assert_eq!(db.kernel_version()?, KernelVersion::V3);
    }
    let db = Database::open(dir.path(), config())?;
    assert_eq!(db.kernel_version()?, KernelVersion::V3);
    let tx = db.begin_read()?;
    assert!(tx.node_exists(penumbra::NodeId(0))?);
    Ok(())
}

#[test]
fn system_graph_runtime_drives_an_upgrade() -> Result<()> {
    let system_dir = tempdir()?;
    let data_dir = tempdir()?;
    let runtime = Arc::new(SystemGraphRuntimeRepository::open(
        system_dir.path(),
        Config::default().page_size(4096).page_cache_pages(32),
        DbmsRuntimeVersion::V1,
    )?);
    let db = Database::open_with_runtime(data_dir.path(), config(), runtime.clone())?;
    write_one_node(&db)?;
    assert_eq!(db.kernel_version()?, KernelVersion::V1);

    runtime.set_version(DbmsRuntimeVersion::V2)?;
    assert!(runtime.set_version(DbmsRuntimeVersion::V1).is_err());
    write_one_node(&db)?;
    assert_eq!(db.kernel_version()?, KernelVersion::V2);
    assert_eq!(db.runtime().version()?, DbmsRuntimeVersion::V2);
    Ok(())
}

#[test]
fn racing_writers_see_exactly_one_upgrade_in_log_order() -> Result<()> {
    use penumbra::command::{Command, CommandReaderFactory};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WRITERS: usize = 8;
    const WRITES: usize = 30;

    let dir = tempdir()?;
    let (db, runtime) = open_at_v1(dir.path())?;
    let committed = AtomicUsize::new(0);

    std::thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                scope.spawn(|| -> Result<()> {
                    let mut done = 0;
                    while done < WRITES {
                        match write_one_node(&db) {
                            Ok(()) => {
                                done += 1;
                                committed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) if err.is_retryable() => continue,
                            Err(err) => return Err(err),
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        while committed.load(Ordering::Relaxed) < WRITERS * WRITES / 4
            && !handles.iter().all(|handle| handle.is_finished())
        {
            std::thread::yield_now();
        }
        runtime.set_version(DbmsRuntimeVersion::V3)?;
        for handle in handles {
            handle.join().expect("writer thread panicked")?;
        }
        Ok(())
    })?;
    write_one_node(&db)?;
    assert_eq!(db.kernel_version()?, KernelVersion::V3);

    let factory = CommandReaderFactory;
    let mut upgrade_at = None;
    let scan = db.log_files().scan()?;
    for (position, logged) in scan.transactions.iter().enumerate() {
        let tx = &logged.transaction;
        let commands = factory.read_all(tx.kernel_version, &tx.commands)?;
        if commands
            .iter()
            .any(|command| matches!(command, Command::UpgradeKernelVersion { .. }))
        {
            assert!(upgrade_at.is_none(), "second upgrade at tx {}", tx.tx_id);
            upgrade_at = Some(position);
            // The transaction that triggered the upgrade is logged right after it.
            let next = &scan.transactions[position + 1].transaction;
            let next_commands = factory.read_all(next.kernel_version, &next.commands)?;
            assert!(next_commands
                .iter()
                .all(|command| !matches!(command, Command::UpgradeKernelVersion { .. })));
        }
        let expected = if upgrade_at.is_some() {
            KernelVersion::V3
        } else {
            KernelVersion::V1
        };
        assert_eq!(tx.kernel_version, expected, "tx {}", tx.tx_id);
    }
    assert!(upgrade_at.is_some());
    assert_eq!(db.upgrade_stats().completions, 1);
    Ok(())
}

//! # Launcher Flows
//!
//! Reconciliation of a single launcher against scripted topology snapshots.
//! Dispatch is recorded rather than routed, so every test inspects exactly
//! which receivers were bound and which proxies reached the registry.
//!
//! ## Topologies Tested:
//!
//! 1. **Provider**: local node in a workflow DON that hosts capabilities
//! 2. **Consumer**: local workflow DON calling a remote capability DON
//! 3. **Visibility**: private DONs on either side are ignored
//! 4. **Failure**: configuration, resolution and dispatch errors unwind cleanly
//! 5. **Concurrency**: overlapping launches leave exactly one snapshot wired

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cw_01_capability_registry::{CapabilityRegistry, RegistryError};
    use cw_02_launcher::testing::{
        don_info, random_hashed_id, random_peer, random_peers, MockTarget, MockTrigger,
        RecordingDispatcher, SnapshotBuilder, StaticPeer,
    };
    use cw_02_launcher::{CapabilityLauncherApi, LaunchError, Launcher, LauncherConfig};
    use shared_bus::DispatchError;
    use shared_types::{
        Capability, CapabilityType, Don, HashedCapabilityId, PeerId, TopologySnapshot,
    };

    const TRIGGER_ID: &str = "streams-trigger@1.0.0";
    const TARGET_ID: &str = "write-chain@1.0.0";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Harness {
        local: PeerId,
        peer: Arc<StaticPeer>,
        dispatcher: Arc<RecordingDispatcher>,
        registry: Arc<CapabilityRegistry>,
        launcher: Launcher,
    }

    fn harness(local: PeerId) -> Harness {
        let peer = StaticPeer::new(local);
        let dispatcher = RecordingDispatcher::new();
        let registry = Arc::new(CapabilityRegistry::new());
        let launcher = Launcher::new(
            LauncherConfig::default(),
            peer.clone(),
            dispatcher.clone(),
            Arc::clone(&registry),
        );
        Harness {
            local,
            peer,
            dispatcher,
            registry,
            launcher,
        }
    }

    /// Hashed IDs for the streams trigger and the write target.
    fn hashes() -> (HashedCapabilityId, HashedCapabilityId) {
        (random_hashed_id(), random_hashed_id())
    }

    fn with_descriptors(
        trigger: HashedCapabilityId,
        target: HashedCapabilityId,
    ) -> SnapshotBuilder {
        SnapshotBuilder::new()
            .capability(trigger, "streams-trigger", "1.0.0", CapabilityType::Trigger)
            .capability(target, "write-chain", "1.0.0", CapabilityType::Target)
    }

    /// Local node in workflow DON 1; DON 2 hosts both capabilities remotely.
    fn consumer_topology(local: PeerId) -> (TopologySnapshot, Vec<PeerId>) {
        let (trigger, target) = hashes();
        let mut workflow_members = random_peers(3);
        workflow_members.push(local);
        let capability_members = random_peers(4);

        let snapshot = with_descriptors(trigger, target)
            .don(don_info(1, &workflow_members, true, true, &[]))
            .don(don_info(
                2,
                &capability_members,
                true,
                false,
                &[trigger, target],
            ))
            .build();
        (snapshot, capability_members)
    }

    fn kinds(dispatcher: &RecordingDispatcher) -> Vec<(String, String, &'static str)> {
        dispatcher
            .registered()
            .into_iter()
            .map(|r| (r.capability_id, r.don_id, r.kind))
            .collect()
    }

    // =============================================================================
    // PROVIDER WIRING
    // =============================================================================

    #[tokio::test]
    async fn test_private_don_is_ignored() {
        let h = harness(random_peer());
        let (trigger, target) = hashes();
        let mut members = random_peers(3);
        members.push(h.local);

        // Nothing is registered locally; a public DON would fail with a
        // configuration error.
        let snapshot = with_descriptors(trigger, target)
            .don(don_info(1, &members, false, true, &[trigger, target]))
            .build();

        h.launcher.launch(&snapshot).await.unwrap();

        assert!(h.dispatcher.registered().is_empty());
        let node = h.launcher.local_node().unwrap();
        assert!(node.workflow_don.is_none());
        assert!(node.capability_dons.is_empty());
    }

    #[tokio::test]
    async fn test_local_trigger_and_target_are_published() {
        let h = harness(random_peer());
        let (trigger, target) = hashes();
        let mut members = random_peers(3);
        members.push(h.local);

        h.registry
            .add(Capability::Trigger(MockTrigger::new(TRIGGER_ID)))
            .unwrap();
        h.registry
            .add(Capability::Executable(MockTarget::new(TARGET_ID)))
            .unwrap();

        let snapshot = with_descriptors(trigger, target)
            .don(don_info(1, &members, true, true, &[trigger, target]))
            .build();
        h.launcher.launch(&snapshot).await.unwrap();

        assert_eq!(
            kinds(&h.dispatcher),
            vec![
                (TRIGGER_ID.to_string(), "1".to_string(), "trigger_publisher"),
                (TARGET_ID.to_string(), "1".to_string(), "target_server"),
            ]
        );
        // Providers never add registry entries.
        assert_eq!(h.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_local_node_reports_single_workflow_don() {
        let h = harness(random_peer());
        let (trigger, target) = hashes();
        let mut members = random_peers(3);
        members.push(h.local);

        h.registry
            .add(Capability::Trigger(MockTrigger::new(TRIGGER_ID)))
            .unwrap();

        let snapshot = with_descriptors(trigger, target)
            .don(don_info(1, &members, true, true, &[trigger]))
            .build();
        h.launcher.launch(&snapshot).await.unwrap();

        let expected = Don {
            id: 1,
            members: members.clone(),
            f: 1,
        };
        let node = h.launcher.local_node().unwrap();
        assert_eq!(node.peer_id, h.local);
        assert_eq!(node.workflow_don, Some(expected.clone()));
        assert_eq!(node.capability_dons, vec![expected]);
    }

    // =============================================================================
    // CONSUMER WIRING
    // =============================================================================

    #[tokio::test]
    async fn test_remote_capabilities_are_proxied() {
        let h = harness(random_peer());
        let (snapshot, capability_members) = consumer_topology(h.local);

        h.launcher.launch(&snapshot).await.unwrap();

        assert_eq!(
            kinds(&h.dispatcher),
            vec![
                (TRIGGER_ID.to_string(), "2".to_string(), "trigger_subscriber"),
                (TARGET_ID.to_string(), "2".to_string(), "target_client"),
            ]
        );
        assert!(h.registry.get_trigger(TRIGGER_ID).is_ok());
        assert!(h.registry.get_executable(TARGET_ID).is_ok());

        let connections = h.peer.last_update().unwrap();
        assert!(connections.contains(&h.local));
        assert!(capability_members.iter().all(|p| connections.contains(p)));
    }

    #[tokio::test]
    async fn test_private_capability_don_is_not_consumed() {
        let h = harness(random_peer());
        let (trigger, target) = hashes();
        let mut workflow_members = random_peers(3);
        workflow_members.push(h.local);
        let public_members = random_peers(4);
        let private_members = random_peers(4);

        let snapshot = with_descriptors(trigger, target)
            .don(don_info(1, &workflow_members, true, true, &[]))
            .don(don_info(2, &public_members, true, false, &[trigger]))
            .don(don_info(3, &private_members, false, false, &[target]))
            .build();
        h.launcher.launch(&snapshot).await.unwrap();

        assert_eq!(
            kinds(&h.dispatcher),
            vec![(TRIGGER_ID.to_string(), "2".to_string(), "trigger_subscriber")]
        );
        assert_eq!(
            h.registry.get(TARGET_ID).unwrap_err(),
            RegistryError::NotFound(TARGET_ID.to_string())
        );

        let connections = h.peer.last_update().unwrap();
        assert!(private_members.iter().all(|p| !connections.contains(p)));
    }

    #[tokio::test]
    async fn test_no_workflow_don_skips_consumers() {
        let h = harness(random_peer());
        let (trigger, target) = hashes();
        let mut members = random_peers(3);
        members.push(h.local);

        let snapshot = with_descriptors(trigger, target)
            .don(don_info(1, &members, true, false, &[]))
            .don(don_info(2, &random_peers(4), true, false, &[trigger, target]))
            .build();
        h.launcher.launch(&snapshot).await.unwrap();

        assert!(h.dispatcher.registered().is_empty());
        assert!(h.registry.is_empty());
        let node = h.launcher.local_node().unwrap();
        assert!(node.workflow_don.is_none());
        assert_eq!(node.capability_dons.len(), 1);
    }

    #[tokio::test]
    async fn test_relaunch_and_close_are_idempotent() {
        let h = harness(random_peer());
        let (snapshot, _) = consumer_topology(h.local);

        h.launcher.launch(&snapshot).await.unwrap();
        h.launcher.launch(&snapshot).await.unwrap();

        assert_eq!(h.dispatcher.active_count(), 2);
        assert_eq!(h.registry.len(), 2);
        assert_eq!(h.launcher.active_count().await, 2);

        h.launcher.close().await.unwrap();
        h.launcher.close().await.unwrap();

        assert_eq!(h.dispatcher.active_count(), 0);
        assert!(h.registry.is_empty());
    }

    // =============================================================================
    // CONCURRENCY
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_launches_leave_one_snapshot_wired() {
        let h = harness(random_peer());
        let (trigger, target) = hashes();
        let mut workflow_members = random_peers(3);
        workflow_members.push(h.local);
        let workflow = don_info(1, &workflow_members, true, true, &[]);

        // Same workflow DON; the capability moves between DON 2 and DON 3.
        let first = with_descriptors(trigger, target)
            .don(workflow.clone())
            .don(don_info(2, &random_peers(4), true, false, &[trigger]))
            .build();
        let second = with_descriptors(trigger, target)
            .don(workflow)
            .don(don_info(3, &random_peers(4), true, false, &[target]))
            .build();
        let first_wiring = (TRIGGER_ID.to_string(), "2".to_string(), "trigger_subscriber");
        let second_wiring = (TARGET_ID.to_string(), "3".to_string(), "target_client");

        for _ in 0..20 {
            let launcher = &h.launcher;
            let (a, b) = tokio::join!(launcher.launch(&first), launcher.launch(&second));
            a.unwrap();
            b.unwrap();

            let active: Vec<(String, String, &'static str)> = h
                .launcher
                .active_kinds()
                .await
                .into_iter()
                .map(|(id, don, kind)| (id, don, kind.as_str()))
                .collect();
            assert_eq!(active.len(), 1);
            let winner = active[0].clone();
            assert!(winner == first_wiring || winner == second_wiring);

            assert_eq!(h.dispatcher.active_count(), 1);
            assert!(h.dispatcher.is_bound(&winner.0, &winner.1));
            assert_eq!(
                h.dispatcher.registered().len(),
                h.dispatcher.removed().len() + 1
            );

            assert_eq!(h.registry.len(), 1);
            assert!(h.registry.get(&winner.0).is_ok());
        }

        h.launcher.close().await.unwrap();
        assert_eq!(h.dispatcher.active_count(), 0);
        assert!(h.registry.is_empty());
    }

    // =============================================================================
    // FAILURES
    // =============================================================================

    #[tokio::test]
    async fn test_unregistered_local_capability_is_configuration_error() {
        let h = harness(random_peer());
        let (trigger, target) = hashes();
        let mut members = random_peers(3);
        members.push(h.local);

        let snapshot = with_descriptors(trigger, target)
            .don(don_info(1, &members, true, true, &[target]))
            .build();

        match h.launcher.launch(&snapshot).await {
            Err(LaunchError::Configuration {
                capability_id,
                don_id,
            }) => {
                assert_eq!(capability_id, TARGET_ID);
                assert_eq!(don_id, 1);
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
        assert!(h.dispatcher.registered().is_empty());
        assert!(matches!(
            h.launcher.local_node(),
            Err(LaunchError::NotLaunched)
        ));
    }

    #[tokio::test]
    async fn test_undescribed_hash_is_resolution_error() {
        let h = harness(random_peer());
        let mut members = random_peers(3);
        members.push(h.local);
        let unknown = random_hashed_id();

        let snapshot = SnapshotBuilder::new()
            .don(don_info(1, &members, true, true, &[]))
            .don(don_info(2, &random_peers(4), true, false, &[unknown]))
            .build();

        match h.launcher.launch(&snapshot).await {
            Err(LaunchError::Resolution { hashed_id, don_id }) => {
                assert_eq!(hashed_id, unknown);
                assert_eq!(don_id, 2);
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_rejection_unwinds_started_wiring() {
        let h = harness(random_peer());
        let (snapshot, _) = consumer_topology(h.local);
        h.dispatcher.reject_capability(TARGET_ID);

        let err = h.launcher.launch(&snapshot).await.unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Dispatch(DispatchError::Rejected { .. })
        ));

        // The subscriber came up first and must be gone again.
        assert_eq!(h.dispatcher.active_count(), 0);
        assert!(h
            .dispatcher
            .removed()
            .contains(&(TRIGGER_ID.to_string(), "2".to_string())));
        assert!(h.registry.is_empty());
        assert_eq!(h.launcher.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_proxy_conflicting_with_local_implementation() {
        let h = harness(random_peer());
        let (snapshot, _) = consumer_topology(h.local);
        let local = Capability::Executable(MockTarget::new(TARGET_ID));
        h.registry.add(local.clone()).unwrap();

        let err = h.launcher.launch(&snapshot).await.unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Registry(RegistryError::DuplicateCapability(ref id)) if id == TARGET_ID
        ));

        // The local implementation survives and the trigger proxy is withdrawn.
        assert!(h.registry.get(TARGET_ID).unwrap().same_implementation(&local));
        assert!(h.registry.get(TRIGGER_ID).is_err());
    }

    #[tokio::test]
    async fn test_malformed_capability_config_is_rejected() {
        let h = harness(random_peer());
        let (trigger, target) = hashes();
        let mut workflow_members = random_peers(3);
        workflow_members.push(h.local);

        let mut capability_don = don_info(2, &random_peers(4), true, false, &[target]);
        capability_don.capability_configurations[0].config = b"not json".to_vec();

        let snapshot = with_descriptors(trigger, target)
            .don(don_info(1, &workflow_members, true, true, &[]))
            .don(capability_don)
            .build();

        assert!(matches!(
            h.launcher.launch(&snapshot).await,
            Err(LaunchError::InvalidCapability { don_id: 2, .. })
        ));
    }
}

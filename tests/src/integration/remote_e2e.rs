//! # Cross-Node Wiring
//!
//! A workflow node reconciled by a launcher talks to a three-member
//! capability DON over one in-process network. Capability DON members run
//! their provider wiring directly so each can host its own mock.
//!
//! ## Flows Tested:
//!
//! 1. **Execute**: proxy call fans out, F+1 matching replies settle it
//! 2. **Execute errors**: F+1 matching errors surface as a remote error
//! 3. **Trigger**: events are delivered once, after F+1 members agree
//! 4. **Late members**: members that missed earlier events still agree on later ones

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cw_01_capability_registry::CapabilityRegistry;
    use cw_02_launcher::testing::{
        don_info, random_hashed_id, random_peer, random_peers, request, MockTarget, MockTrigger,
        SnapshotBuilder, StaticPeer,
    };
    use cw_02_launcher::{
        Binding, CapabilityLauncherApi, Launcher, LauncherConfig, SubService, TargetServer,
        TriggerPublisher,
    };
    use serde_json::json;
    use shared_bus::{Dispatcher, InMemoryDispatcher, InMemoryNetwork};
    use shared_types::{
        CapabilityError, CapabilityResponse, CapabilityType, Don, DonInfo, ExecutableCapability,
        PeerId, TopologySnapshot, TriggerCapability,
    };
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    const TRIGGER_ID: &str = "streams-trigger@1.0.0";
    const TARGET_ID: &str = "write-chain@1.0.0";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// The workflow side: one node in DON 1 with its own launcher.
    struct WorkflowNode {
        dispatcher: Arc<InMemoryDispatcher>,
        registry: Arc<CapabilityRegistry>,
        launcher: Launcher,
    }

    impl WorkflowNode {
        fn join(network: &Arc<InMemoryNetwork>, peer: PeerId) -> Self {
            let dispatcher = InMemoryDispatcher::join(network, peer);
            let registry = Arc::new(CapabilityRegistry::new());
            let launcher = Launcher::new(
                LauncherConfig::default(),
                StaticPeer::new(peer),
                dispatcher.clone(),
                Arc::clone(&registry),
            );
            Self {
                dispatcher,
                registry,
                launcher,
            }
        }
    }

    /// A capability DON member: its dispatcher and the provider it runs.
    struct Member {
        dispatcher: Arc<InMemoryDispatcher>,
        service: Arc<dyn SubService>,
    }

    struct Topology {
        snapshot: TopologySnapshot,
        workflow_don: DonInfo,
        capability_don: DonInfo,
        workflow_peer: PeerId,
    }

    fn topology(capability_type: CapabilityType) -> Topology {
        let hashed = random_hashed_id();
        let name = match capability_type {
            CapabilityType::Trigger => "streams-trigger",
            _ => "write-chain",
        };
        let workflow_peer = random_peer();
        let workflow_don = don_info(1, &[workflow_peer], true, true, &[]);
        let capability_don = don_info(2, &random_peers(3), true, false, &[hashed]);

        let snapshot = SnapshotBuilder::new()
            .capability(hashed, name, "1.0.0", capability_type)
            .don(workflow_don.clone())
            .don(capability_don.clone())
            .build();

        Topology {
            snapshot,
            workflow_don,
            capability_don,
            workflow_peer,
        }
    }

    fn serve(
        network: &Arc<InMemoryNetwork>,
        topology: &Topology,
        peer: PeerId,
        target: Arc<MockTarget>,
    ) -> Member {
        let dispatcher = InMemoryDispatcher::join(network, peer);
        let server = Arc::new(TargetServer::new(
            Binding::new(TARGET_ID, Don::from(&topology.capability_don), peer),
            target,
            vec![Don::from(&topology.workflow_don)],
            dispatcher.clone(),
            &LauncherConfig::default(),
        ));
        dispatcher
            .set_receiver(TARGET_ID, "2", server.clone())
            .unwrap();
        Member {
            dispatcher,
            service: server,
        }
    }

    fn publish(
        network: &Arc<InMemoryNetwork>,
        topology: &Topology,
        peer: PeerId,
        trigger: Arc<MockTrigger>,
    ) -> Member {
        let dispatcher = InMemoryDispatcher::join(network, peer);
        let publisher = Arc::new(TriggerPublisher::new(
            Binding::new(TRIGGER_ID, Don::from(&topology.capability_don), peer),
            trigger,
            vec![Don::from(&topology.workflow_don)],
            dispatcher.clone(),
            &LauncherConfig::default(),
        ));
        dispatcher
            .set_receiver(TRIGGER_ID, "2", publisher.clone())
            .unwrap();
        Member {
            dispatcher,
            service: publisher,
        }
    }

    async fn start_all(members: &[Member]) {
        for member in members {
            member.service.start().await.unwrap();
        }
    }

    async fn stop_all(members: &[Member]) {
        for member in members {
            member.service.stop().await.unwrap();
        }
    }

    async fn eventually(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    // =============================================================================
    // EXECUTE
    // =============================================================================

    #[tokio::test]
    async fn test_remote_execute_settles_on_quorum() {
        let network = InMemoryNetwork::new();
        let topology = topology(CapabilityType::Target);
        let workflow = WorkflowNode::join(&network, topology.workflow_peer);

        let targets: Vec<Arc<MockTarget>> = (0..3).map(|_| MockTarget::new(TARGET_ID)).collect();
        let members: Vec<Member> = topology
            .capability_don
            .node_p2p_ids
            .iter()
            .zip(&targets)
            .map(|(peer, target)| serve(&network, &topology, *peer, Arc::clone(target)))
            .collect();
        start_all(&members).await;

        workflow.launcher.launch(&topology.snapshot).await.unwrap();
        let proxy = workflow.registry.get_executable(TARGET_ID).unwrap();

        let mut stream = proxy
            .execute(request("wf-payments", json!({ "amount": 5 })))
            .await
            .unwrap();
        let response = stream.next().await.unwrap();

        assert_eq!(response.value, json!({ "echo": { "amount": 5 } }));
        assert!(targets.iter().map(|t| t.executions()).sum::<usize>() >= 2);
        assert!(workflow.dispatcher.messages_delivered() >= 2);

        workflow.launcher.close().await.unwrap();
        stop_all(&members).await;
    }

    #[tokio::test]
    async fn test_matching_remote_errors_surface() {
        let network = InMemoryNetwork::new();
        let topology = topology(CapabilityType::Target);
        let workflow = WorkflowNode::join(&network, topology.workflow_peer);

        let targets: Vec<Arc<MockTarget>> = (0..3).map(|_| MockTarget::new(TARGET_ID)).collect();
        targets[0].fail_with(CapabilityError::Unavailable("chain halted".to_string()));
        targets[1].fail_with(CapabilityError::Unavailable("chain halted".to_string()));

        let members: Vec<Member> = topology
            .capability_don
            .node_p2p_ids
            .iter()
            .zip(&targets)
            .map(|(peer, target)| serve(&network, &topology, *peer, Arc::clone(target)))
            .collect();
        start_all(&members).await;

        workflow.launcher.launch(&topology.snapshot).await.unwrap();
        let proxy = workflow.registry.get_executable(TARGET_ID).unwrap();

        match proxy.execute(request("wf-payments", json!(null))).await {
            Err(CapabilityError::Remote(message)) => assert!(message.contains("chain halted")),
            Err(other) => panic!("expected remote error, got {other:?}"),
            Ok(_) => panic!("expected remote error, got a response"),
        }

        workflow.launcher.close().await.unwrap();
        stop_all(&members).await;
    }

    // =============================================================================
    // TRIGGER
    // =============================================================================

    #[tokio::test]
    async fn test_remote_trigger_delivers_each_event_once() {
        let network = InMemoryNetwork::new();
        let topology = topology(CapabilityType::Trigger);
        let workflow = WorkflowNode::join(&network, topology.workflow_peer);

        let triggers: Vec<Arc<MockTrigger>> =
            (0..3).map(|_| MockTrigger::new(TRIGGER_ID)).collect();
        let members: Vec<Member> = topology
            .capability_don
            .node_p2p_ids
            .iter()
            .zip(&triggers)
            .map(|(peer, trigger)| publish(&network, &topology, *peer, Arc::clone(trigger)))
            .collect();
        start_all(&members).await;

        workflow.launcher.launch(&topology.snapshot).await.unwrap();
        let proxy = workflow.registry.get_trigger(TRIGGER_ID).unwrap();
        let mut events = proxy
            .register_trigger(request("wf-prices", json!(null)))
            .await
            .unwrap();

        assert!(eventually(|| triggers.iter().all(|t| t.registrations() == 1)).await);

        let first = CapabilityResponse::ok(json!({ "price": 42 }));
        for trigger in &triggers {
            trigger.emit(first.clone());
        }
        let delivered = timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, first);

        // One member alone is below quorum.
        let second = CapabilityResponse::ok(json!({ "price": 43 }));
        triggers[0].emit(second.clone());
        assert!(timeout(Duration::from_millis(100), events.next())
            .await
            .is_err());

        triggers[1].emit(second.clone());
        let delivered = timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, second);

        workflow.launcher.close().await.unwrap();
        stop_all(&members).await;
        assert!(members.iter().all(|m| m.dispatcher.dead_lettered() == 0));
    }

    #[tokio::test]
    async fn test_late_member_agrees_on_later_events() {
        let network = InMemoryNetwork::new();
        let topology = topology(CapabilityType::Trigger);
        let workflow = WorkflowNode::join(&network, topology.workflow_peer);

        let triggers: Vec<Arc<MockTrigger>> =
            (0..3).map(|_| MockTrigger::new(TRIGGER_ID)).collect();
        let members: Vec<Member> = topology
            .capability_don
            .node_p2p_ids
            .iter()
            .zip(&triggers)
            .map(|(peer, trigger)| publish(&network, &topology, *peer, Arc::clone(trigger)))
            .collect();
        start_all(&members).await;

        workflow.launcher.launch(&topology.snapshot).await.unwrap();
        let proxy = workflow.registry.get_trigger(TRIGGER_ID).unwrap();
        let mut events = proxy
            .register_trigger(request("wf-prices", json!(null)))
            .await
            .unwrap();
        assert!(eventually(|| triggers.iter().all(|t| t.registrations() == 1)).await);

        // Only the first member sees the early event, as if the others had
        // registered after it was emitted.
        triggers[0].emit(CapabilityResponse::ok(json!({ "price": 41 })));
        let next = CapabilityResponse::ok(json!({ "price": 42 }));
        triggers[0].emit(next.clone());
        triggers[1].emit(next.clone());

        let delivered = timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, next);
        assert!(timeout(Duration::from_millis(100), events.next())
            .await
            .is_err());

        workflow.launcher.close().await.unwrap();
        stop_all(&members).await;
    }
}

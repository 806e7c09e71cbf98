use std::sync::Arc;

use test_timeout::tokio_timeout_test;

use super::{settle, ID};
use crate::details::StaticResolver;
use crate::error::SessionError;
use crate::factory::SessionFactory;
use crate::session::SessionDeps;
use crate::transport::mock::{MockConnector, RecordingRegistry, ScriptedProbe};

fn factory(details: &str) -> (SessionFactory, Arc<MockConnector>) {
    let (connector, _peers) = MockConnector::new();
    let deps = SessionDeps {
        connector: connector.clone(),
        probe: ScriptedProbe::new([], 200),
        registry: Arc::new(RecordingRegistry::default()),
    };
    let resolver = Arc::new(StaticResolver::new(details));
    (SessionFactory::new("localhost", resolver, deps).with_tls(false), connector)
}

#[tokio_timeout_test(10, paused)]
async fn malformed_details_fail_before_any_transport_opens() {
    let (factory, connector) = factory("garbage");

    let result = factory.create(ID).await;

    assert!(matches!(result, Err(SessionError::InvalidDetails(_))));
    settle().await;
    assert_eq!(connector.connects(), 0);
}


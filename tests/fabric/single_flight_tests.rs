//! Concurrent resolves of one container key share a single start.

use futures::future::join_all;
use mockable::DefaultClock;
use reactor_fabric::container::adapters::InMemoryContainerRuntime;
use reactor_fabric::container::services::{ContainerSupervisor, SupervisorSettings};
use reactor_fabric::registry::{ContainerStrategy, ServiceDefinition, ServiceName};
use reactor_fabric::session::{ClientContext, SessionId};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

fn service(name: &str, strategy: ContainerStrategy) -> ServiceDefinition {
    let service_name = ServiceName::new(name).expect("valid service name");
    ServiceDefinition::new(service_name, "example/tool:1")
        .expect("valid definition")
        .with_strategy(strategy)
}

fn supervisor(
    runtime: &Arc<InMemoryContainerRuntime>,
) -> ContainerSupervisor<InMemoryContainerRuntime, DefaultClock> {
    ContainerSupervisor::new(
        Arc::clone(runtime),
        Arc::new(DefaultClock),
        SupervisorSettings::default().with_poll_interval(Duration::from_millis(1)),
    )
}

#[rstest]
#[case(ContainerStrategy::PerSession)]
#[case(ContainerStrategy::SmartRefresh)]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_resolves_start_one_container(#[case] strategy: ContainerStrategy) {
    let runtime = Arc::new(InMemoryContainerRuntime::new());
    runtime
        .set_create_delay(Duration::from_millis(100))
        .expect("configure delay");
    let supervisor = supervisor(&runtime);
    let definition = service("git", strategy);
    let context = ClientContext::new(SessionId::new(), Vec::new());

    let resolves = (1..=10).map(|sequence| {
        let worker = supervisor.clone();
        let worker_definition = definition.clone();
        let worker_context = context.clone();
        tokio::spawn(async move {
            worker
                .resolve(&worker_definition, &worker_context, sequence)
                .await
        })
    });
    let outcomes = join_all(resolves).await;

    let ids: Vec<String> = outcomes
        .into_iter()
        .map(|joined| {
            joined
                .expect("task should not panic")
                .expect("resolve should succeed")
                .id()
                .to_owned()
        })
        .collect();
    assert_eq!(ids.len(), 10);
    assert!(ids.windows(2).all(|pair| pair.first() == pair.last()));
    assert_eq!(runtime.counters().expect("counters").created, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn different_keys_start_in_parallel() {
    let runtime = Arc::new(InMemoryContainerRuntime::new());
    runtime
        .set_create_delay(Duration::from_millis(300))
        .expect("configure delay");
    let supervisor = supervisor(&runtime);
    let definition = service("git", ContainerStrategy::PerSession);
    let contexts: Vec<ClientContext> = (0..4)
        .map(|_| ClientContext::new(SessionId::new(), Vec::new()))
        .collect();

    let started = tokio::time::Instant::now();
    let outcomes = join_all(
        contexts
            .iter()
            .map(|context| supervisor.resolve(&definition, context, 1)),
    )
    .await;

    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(runtime.counters().expect("counters").created, 4);
    assert!(started.elapsed() < Duration::from_millis(1_000));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_waiters_share_a_failed_start() {
    let runtime = Arc::new(InMemoryContainerRuntime::new());
    runtime
        .set_create_delay(Duration::from_millis(100))
        .expect("configure delay");
    runtime
        .exit_on_start("example/tool:1", 2)
        .expect("configure exit");
    let supervisor = supervisor(&runtime);
    let definition = service("git", ContainerStrategy::PerSession);
    let context = ClientContext::new(SessionId::new(), Vec::new());

    let outcomes = join_all((1..=5).map(|sequence| supervisor.resolve(&definition, &context, sequence))).await;

    assert!(outcomes.iter().all(Result::is_err));
    assert_eq!(runtime.counters().expect("counters").created, 1);
    assert_eq!(runtime.counters().expect("counters").live, 0);
}

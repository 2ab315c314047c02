//! Process entry point: wires the session registry, the capability
//! backends it needs, and the bus control surface together, then runs
//! until signalled to stop.
//!
//! Grounded on the teacher's own `main.rs` shape
//! (`tracing_subscriber::fmt::init()` followed by handing control to a
//! long-lived runner) but replacing the `iced` GUI event loop with a
//! headless dispatcher: this binary has no window, only a bus-facing
//! daemon.

use std::sync::Arc;

use tracing::info;

use media_hub_core::apparmor::DefaultUriAuthorizer;
use media_hub_core::config::Config;
use media_hub_core::control_surface;
use media_hub_core::dispatcher;
use media_hub_core::output_observer::OutputObserver;
use media_hub_core::power::PowerArbiter;
use media_hub_core::registry::SessionRegistry;
use media_hub_core::testing::{
    StubAppContextResolver, StubCallMonitor, StubEngine, StubOutputObserver, StubPowerBackend,
};
use media_hub_core::DispatcherHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    // The registry is generic over `Engine`/`PowerBackend`/`AppContextResolver`
    // so any backend satisfying those traits can be plugged in; no concrete
    // GStreamer, AccountsService, telephony, or AppArmor-query backend ships
    // in this crate, so the production binary is wired against the same
    // in-memory doubles the scenario tests use until a real platform backend
    // is added.
    let context_resolver = Arc::new(StubAppContextResolver::unconfined());
    let authorizer: Arc<dyn media_hub_core::apparmor::UriAuthorizer> =
        Arc::new(DefaultUriAuthorizer::new(Vec::new()));
    let power = PowerArbiter::new(StubPowerBackend::new());
    let registry = SessionRegistry::new(context_resolver, authorizer, power, StubEngine::new);

    let handle = dispatcher::spawn(registry);

    let output_observer =
        StubOutputObserver::new(media_hub_core::output_observer::OutputState::Speaker);
    spawn_output_forwarder(output_observer, handle.clone());

    let call_monitor = StubCallMonitor::new();
    spawn_call_forwarder(call_monitor, handle.clone());

    let connection = control_surface::serve(handle, &config.service_name()).await?;
    info!(service = %config.service_name(), "media-hub-core listening on the session bus");

    // The object server keeps running as long as `connection` is alive and
    // the process isn't signalled to stop; there is no other work for the
    // main task to do.
    shutdown_signal().await;
    info!("shutting down");
    drop(connection);
    Ok(())
}

fn spawn_output_forwarder(observer: Arc<StubOutputObserver>, handle: DispatcherHandle) {
    let mut changes = observer.subscribe();
    tokio::spawn(async move {
        handle.notify_output_state_changed(*changes.borrow());
        loop {
            if changes.changed().await.is_err() {
                break;
            }
            handle.notify_output_state_changed(*changes.borrow());
        }
    });
}

fn spawn_call_forwarder(monitor: Arc<StubCallMonitor>, handle: DispatcherHandle) {
    let mut events = monitor.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => handle.notify_call_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

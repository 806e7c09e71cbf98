use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;

use tether_session::{
    CreditedConsumer, SessionDeps, SessionError, SessionFactory, SessionHandle, SessionId,
    SessionState, StaticResolver, TerminalRegistry,
};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::{FileConfig, Settings};
use crate::error::AppError;
use crate::input::{spawn_stdin_pump, InputEnd, RawModeGuard};
use crate::registry::Registry;
use crate::render::{RenderWorker, TerminalSink};

const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Attaches the local terminal to one remote session until the host ends it
/// or the user detaches.
pub async fn run(cli: Cli) -> Result<(), AppError> {
    let file = FileConfig::load(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, &file)?;
    let id = SessionId(cli.id);

    let registry = Arc::new(Registry::new());
    let deps = SessionDeps::websocket(registry.clone())?;
    let resolver = Arc::new(StaticResolver::new(cli.details.clone()));
    let factory = SessionFactory::new(settings.host.clone(), resolver, deps)
        .with_tls(settings.tls)
        .with_options(settings.session.clone());

    let session = factory.create(id).await?;
    registry.insert(session.clone());
    info!(target: "tether::app", terminal = %id, host = %settings.host, "attaching");

    let (sink, render) = TerminalSink::spawn(io::stdout())?;
    session.attach(CreditedConsumer::new(
        sink,
        session.flow_signal(),
        settings.credit,
    ));
    if let Ok((cols, rows)) = crossterm::terminal::size() {
        session.resize(rows, cols);
    }

    let interactive = io::stdin().is_terminal() && io::stdout().is_terminal();
    let _raw_guard = RawModeGuard::new(interactive);
    let input_done = spawn_stdin_pump(session.clone())?;

    let outcome = tokio::select! {
        _ = registry.wait_until_empty() => {
            info!(target: "tether::app", terminal = %id, "terminal closed by host");
            Ok(())
        }
        end = input_done => {
            let end = end.unwrap_or(InputEnd::Eof);
            info!(target: "tether::app", terminal = %id, reason = ?end, "detaching");
            close(&session, registry.as_ref()).await;
            Ok(())
        }
        failure = wait_for_failure(&session) => {
            session.destroy();
            Err(AppError::SessionFailed(failure))
        }
    };
    drain_output(render).await;
    outcome
}

async fn close(session: &SessionHandle, registry: &Registry) {
    session.destroy();
    registry.remove_terminal(session.id());
    if tokio::time::timeout(CLOSE_GRACE, session.wait_for_state(SessionState::Destroyed))
        .await
        .is_err()
    {
        warn!(target: "tether::app", terminal = %session.id(), "session did not close in time");
    }
}

/// Waits for output still queued for stdout. The render thread exits once
/// the session has dropped its consumer.
async fn drain_output(render: RenderWorker) {
    let joined = tokio::task::spawn_blocking(move || render.join());
    if tokio::time::timeout(CLOSE_GRACE, joined).await.is_err() {
        warn!(target: "tether::app", "terminal output still pending at exit");
    }
}

/// Resolves with the error that leaves the session disconnected for good.
async fn wait_for_failure(session: &SessionHandle) -> Arc<SessionError> {
    let mut snapshot = session.subscribe();
    let failure = match snapshot
        .wait_for(|snap| snap.state == SessionState::Disconnected && snap.failure.is_some())
        .await
    {
        Ok(snap) => snap.failure.clone(),
        Err(_) => None,
    };
    failure.unwrap_or_else(|| Arc::new(SessionError::Destroyed))
}

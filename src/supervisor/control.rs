//! Operator commands for the supervisor and the signals that produce them.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// One more worker, up to the maximum
    AddWorker,
    /// Stop every worker and rebuild the pool at the minimum
    ScaleDown,
    ReopenLogs,
    /// Let in-flight jobs finish, then exit
    Shutdown,
}

impl ControlCommand {
    /// `USR1` add, `USR2` scale down, `HUP` reopen logs, `INT`/`TERM` shut down
    pub fn from_signal(kind: SignalKind) -> Option<Self> {
        match kind {
            k if k == SignalKind::user_defined1() => Some(Self::AddWorker),
            k if k == SignalKind::user_defined2() => Some(Self::ScaleDown),
            k if k == SignalKind::hangup() => Some(Self::ReopenLogs),
            k if k == SignalKind::interrupt() || k == SignalKind::terminate() => {
                Some(Self::Shutdown)
            }
            _ => None,
        }
    }
}

/// Feed OS signals into `commands` until the receiver goes away
pub fn spawn_signal_listener(
    commands: mpsc::UnboundedSender<ControlCommand>,
) -> std::io::Result<JoinHandle<()>> {
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut term = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let kind = tokio::select! {
                _ = usr1.recv() => SignalKind::user_defined1(),
                _ = usr2.recv() => SignalKind::user_defined2(),
                _ = hup.recv() => SignalKind::hangup(),
                _ = int.recv() => SignalKind::interrupt(),
                _ = term.recv() => SignalKind::terminate(),
            };
            let Some(command) = ControlCommand::from_signal(kind) else {
                continue;
            };
            info!(?command, "📡 SUPERVISOR: Signal received");
            if commands.send(command).is_err() {
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_mapping() {
        assert_eq!(
            ControlCommand::from_signal(SignalKind::user_defined1()),
            Some(ControlCommand::AddWorker)
        );
        assert_eq!(
            ControlCommand::from_signal(SignalKind::user_defined2()),
            Some(ControlCommand::ScaleDown)
        );
        assert_eq!(
            ControlCommand::from_signal(SignalKind::hangup()),
            Some(ControlCommand::ReopenLogs)
        );
        assert_eq!(
            ControlCommand::from_signal(SignalKind::terminate()),
            Some(ControlCommand::Shutdown)
        );
        assert_eq!(ControlCommand::from_signal(SignalKind::alarm()), None);
    }
}

//! Process lifecycle for the mount daemon: shutdown and reload signals.

use std::fmt;
use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

/// A process signal the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    /// Reload hot-updatable configuration.
    Hangup,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
        })
    }
}

/// Registered handlers for SIGINT, SIGTERM and SIGHUP.
///
/// Once created, the default disposition of these signals is replaced for
/// the rest of the process lifetime.
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

impl SignalListener {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Next signal, or `None` once the handlers are gone.
    pub async fn recv(&mut self) -> Option<Signal> {
        tokio::select! {
            s = self.interrupt.recv() => s.map(|_| Signal::Interrupt),
            s = self.terminate.recv() => s.map(|_| Signal::Terminate),
            s = self.hangup.recv() => s.map(|_| Signal::Hangup),
        }
    }
}

/// Wait for SIGINT or SIGTERM, calling `on_reload` for every SIGHUP seen
/// on the way.
pub async fn wait_for_shutdown_signal(
    listener: &mut SignalListener,
    mut on_reload: impl FnMut(),
) -> Option<Signal> {
    loop {
        match listener.recv().await? {
            Signal::Hangup => {
                tracing::info!("received SIGHUP, reloading");
                on_reload();
            }
            sig => {
                tracing::info!(signal = %sig, "received shutdown signal");
                return Some(sig);
            }
        }
    }
}

/// Exit the process with status 1 on the next SIGINT or SIGTERM.
///
/// Armed after the first shutdown signal so a hung unmount can be cut short.
pub fn force_exit_on_second_signal(mut listener: SignalListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(sig) = listener.recv().await {
            if sig != Signal::Hangup {
                tracing::warn!(signal = %sig, "force exiting");
                std::process::exit(1);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn raise(sig: libc::c_int) {
        assert_eq!(unsafe { libc::raise(sig) }, 0);
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
        assert_eq!(Signal::Hangup.to_string(), "SIGHUP");
    }

    #[tokio::test]
    async fn test_reload_then_shutdown() {
        let mut listener = SignalListener::new().unwrap();
        let reloads = Arc::new(AtomicUsize::new(0));

        let counter = reloads.clone();
        let waiter = tokio::spawn(async move {
            wait_for_shutdown_signal(&mut listener, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
        });

        raise(libc::SIGHUP);
        tokio::time::timeout(Duration::from_secs(5), async {
            while reloads.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!waiter.is_finished());

        raise(libc::SIGTERM);
        let sig = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sig, Some(Signal::Terminate));
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
    }
}
